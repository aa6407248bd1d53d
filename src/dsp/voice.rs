//! Voice — one sounding note: source, filter and envelope.
//!
//! A `VoiceState` is created on note-on and owned by the track renderer
//! until its envelope returns to `Idle`.

use rand::Rng;
use rand_pcg::Pcg32;

use crate::plan::{DrumVoice, InstrumentKind};

use super::envelope::{Curve, Envelope, EnvelopeCurves, Stage};
use super::filter::{FilterMode, SvfFilter};
use super::oscillator::{Oscillator, Waveform, midi_to_frequency};

/// Sound design for a tonal instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    pub waveform: Waveform,
    /// Second oscillator detuned by this many cents, if any.
    pub unison_cents: Option<f64>,
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    pub curves: EnvelopeCurves,
    pub filter: FilterMode,
    pub cutoff: f64,
    pub resonance: f64,
    /// Output level before velocity.
    pub level: f64,
}

impl Patch {
    /// Built-in patch for a tonal instrument. Drums have none; their
    /// hits are synthesized per `DrumVoice`.
    pub fn for_instrument(kind: InstrumentKind) -> Option<Patch> {
        let patch = match kind {
            InstrumentKind::Pad => Patch {
                waveform: Waveform::Sawtooth,
                unison_cents: Some(7.0),
                attack: 0.4,
                decay: 0.6,
                sustain: 0.8,
                release: 1.2,
                curves: EnvelopeCurves {
                    attack: Curve::Linear,
                    decay: Curve::Exponential,
                    release: Curve::Exponential,
                },
                filter: FilterMode::Lowpass,
                cutoff: 2400.0,
                resonance: 0.15,
                level: 0.35,
            },
            InstrumentKind::Lead => Patch {
                waveform: Waveform::Square,
                unison_cents: None,
                attack: 0.01,
                decay: 0.2,
                sustain: 0.7,
                release: 0.25,
                curves: EnvelopeCurves {
                    attack: Curve::Linear,
                    decay: Curve::Exponential,
                    release: Curve::Exponential,
                },
                filter: FilterMode::Lowpass,
                cutoff: 4000.0,
                resonance: 0.3,
                level: 0.45,
            },
            InstrumentKind::Pluck => Patch {
                waveform: Waveform::Sawtooth,
                unison_cents: None,
                attack: 0.002,
                decay: 0.25,
                sustain: 0.0,
                release: 0.2,
                curves: EnvelopeCurves::uniform(Curve::Exponential),
                filter: FilterMode::Lowpass,
                cutoff: 3000.0,
                resonance: 0.35,
                level: 0.5,
            },
            InstrumentKind::Bass => Patch {
                waveform: Waveform::Sawtooth,
                unison_cents: None,
                attack: 0.005,
                decay: 0.15,
                sustain: 0.8,
                release: 0.12,
                curves: EnvelopeCurves::uniform(Curve::Linear),
                filter: FilterMode::Lowpass,
                cutoff: 700.0,
                resonance: 0.25,
                level: 0.7,
            },
            InstrumentKind::Fx => Patch {
                waveform: Waveform::Triangle,
                unison_cents: Some(12.0),
                attack: 0.05,
                decay: 0.3,
                sustain: 0.6,
                release: 0.8,
                curves: EnvelopeCurves::uniform(Curve::Exponential),
                filter: FilterMode::Bandpass,
                cutoff: 2000.0,
                resonance: 0.5,
                level: 0.4,
            },
            InstrumentKind::Drums => return None,
        };
        Some(patch)
    }
}

// ── Sources ─────────────────────────────────────────────────

const KICK_START_HZ: f64 = 150.0;
const KICK_END_HZ: f64 = 45.0;
const KICK_SWEEP_SECONDS: f64 = 0.04;
const SNARE_BODY_HZ: f64 = 180.0;

#[derive(Debug, Clone)]
enum Source {
    Tone {
        osc: Oscillator,
        unison: Option<Oscillator>,
    },
    /// Sine with an exponential downward pitch sweep.
    Kick {
        osc: Oscillator,
        sweep: f64,
        sweep_decay: f64,
    },
    /// Noise plus a triangle body.
    Snare { noise: Pcg32, body: Oscillator },
    Noise { noise: Pcg32 },
}

fn white(noise: &mut Pcg32) -> f64 {
    noise.random::<f64>() * 2.0 - 1.0
}

impl Source {
    fn next_sample(&mut self) -> f64 {
        match self {
            Source::Tone { osc, unison } => match unison {
                Some(u) => 0.5 * (osc.next_sample() + u.next_sample()),
                None => osc.next_sample(),
            },
            Source::Kick {
                osc,
                sweep,
                sweep_decay,
            } => {
                osc.frequency = KICK_END_HZ + *sweep;
                *sweep *= *sweep_decay;
                osc.next_sample()
            }
            Source::Snare { noise, body } => 0.6 * white(noise) + 0.5 * body.next_sample(),
            Source::Noise { noise } => white(noise),
        }
    }
}

// ── Voice ───────────────────────────────────────────────────

/// A single voice: source shaped by a filter and an ADSR envelope.
#[derive(Debug, Clone)]
pub struct VoiceState {
    source: Source,
    filter: SvfFilter,
    pub envelope: Envelope,
    /// Velocity × patch level.
    gain: f64,
    /// Sample offset of the note-on.
    pub start_sample: usize,
    /// Sample offset when this voice should be released (gate off).
    pub release_sample: usize,
}

impl VoiceState {
    /// Start a tonal note.
    pub fn tonal(patch: &Patch, pitch: u8, velocity: f64, sample_rate: f64) -> Self {
        let freq = midi_to_frequency(pitch as f64);
        let mut osc = Oscillator::new(patch.waveform, sample_rate);
        osc.frequency = freq;
        let unison = patch.unison_cents.map(|cents| {
            let mut u = Oscillator::new(patch.waveform, sample_rate).with_phase(0.25);
            u.frequency = freq;
            u.detune = cents;
            u
        });
        let envelope = Envelope::new(sample_rate)
            .with_adsr(patch.attack, patch.decay, patch.sustain, patch.release, Curve::Linear)
            .with_curves(patch.curves);
        let filter = SvfFilter::new(patch.filter, sample_rate).with_params(patch.cutoff, patch.resonance);
        VoiceState::start(Source::Tone { osc, unison }, filter, envelope, velocity * patch.level)
    }

    /// Start a drum hit. `noise` must be seeded per hit for reproducibility.
    pub fn drum(voice: DrumVoice, velocity: f64, sample_rate: f64, noise: Pcg32) -> Self {
        let env = |decay: f64| Envelope::new(sample_rate).with_adsr(0.001, decay, 0.0, 0.05, Curve::Exponential);
        let (source, filter, envelope, level) = match voice {
            DrumVoice::Kick => {
                let mut osc = Oscillator::new(Waveform::Sine, sample_rate);
                osc.frequency = KICK_START_HZ;
                let source = Source::Kick {
                    osc,
                    sweep: KICK_START_HZ - KICK_END_HZ,
                    sweep_decay: (-1.0 / (KICK_SWEEP_SECONDS * sample_rate)).exp(),
                };
                let filter = SvfFilter::new(FilterMode::Lowpass, sample_rate).with_params(5000.0, 0.0);
                (source, filter, env(0.35), 1.0)
            }
            DrumVoice::Snare => {
                let mut body = Oscillator::new(Waveform::Triangle, sample_rate);
                body.frequency = SNARE_BODY_HZ;
                let filter = SvfFilter::new(FilterMode::Bandpass, sample_rate).with_params(1800.0, 0.2);
                (Source::Snare { noise, body }, filter, env(0.18), 1.2)
            }
            DrumVoice::Clap => {
                let filter = SvfFilter::new(FilterMode::Bandpass, sample_rate).with_params(1200.0, 0.4);
                (Source::Noise { noise }, filter, env(0.12), 1.2)
            }
            DrumVoice::Hats | DrumVoice::OpenHat => {
                let decay = if voice == DrumVoice::OpenHat { 0.3 } else { 0.05 };
                let filter = SvfFilter::new(FilterMode::Highpass, sample_rate).with_params(7000.0, 0.1);
                (Source::Noise { noise }, filter, env(decay), 0.5)
            }
        };
        VoiceState::start(source, filter, envelope, velocity * level)
    }

    fn start(source: Source, filter: SvfFilter, mut envelope: Envelope, gain: f64) -> Self {
        envelope.gate_on();
        VoiceState {
            source,
            filter,
            envelope,
            gain,
            start_sample: 0,
            release_sample: usize::MAX,
        }
    }

    /// Set the note-on and gate-off sample offsets.
    pub fn scheduled(mut self, start_sample: usize, release_sample: usize) -> Self {
        self.start_sample = start_sample;
        self.release_sample = release_sample;
        self
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        if self.envelope.is_finished() {
            return 0.0;
        }
        let raw = self.source.next_sample();
        let filtered = self.filter.process(raw);
        filtered * self.envelope.next_sample() * self.gain
    }

    /// Release the note.
    pub fn note_off(&mut self) {
        self.envelope.gate_off();
    }

    /// Fast release for voice stealing.
    pub fn steal(&mut self) {
        self.envelope.force_release();
    }

    /// Still sounding and not yet released.
    pub fn is_held(&self) -> bool {
        !matches!(self.envelope.stage(), Stage::Release | Stage::Idle)
    }

    /// Envelope back at `Idle`; the slot can be reclaimed.
    pub fn is_finished(&self) -> bool {
        self.envelope.is_finished()
    }

    pub fn set_cutoff(&mut self, hz: f64) {
        self.filter.set_cutoff(hz);
    }

    pub fn set_resonance(&mut self, resonance: f64) {
        self.filter.set_resonance(resonance);
    }
}
