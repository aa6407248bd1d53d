//! Audio Engine — renders the scheduled event list to one buffer per track.
//!
//! Each track is rendered independently (and in parallel) from its own
//! slice of the event list. Notes are started at their exact sample offset
//! and summed into the track buffer; voices live in a slot arena and are
//! reclaimed as soon as their envelope reaches `Idle`.

use rayon::prelude::*;

use crate::config::RenderConfig;
use crate::error::{RenderError, Result};
use crate::plan::{AutomationTarget, DrumVoice, Plan};
use crate::rng;
use crate::scheduler::{EventKind, EventList};

use super::buffer::AudioBuffer;
use super::voice::{Patch, VoiceState};

/// Lower end of the cutoff automation range.
pub const MIN_CUTOFF_HZ: f64 = 40.0;
/// Upper end of the cutoff automation range.
pub const MAX_CUTOFF_HZ: f64 = 16_000.0;

const GAIN_SMOOTHING_SECONDS: f64 = 0.005;

/// Map a normalized cutoff in [0, 1] exponentially onto 40 Hz..16 kHz.
pub fn cutoff_hz(value: f64) -> f64 {
    MIN_CUTOFF_HZ * (MAX_CUTOFF_HZ / MIN_CUTOFF_HZ).powf(value.clamp(0.0, 1.0))
}

/// Number of samples rendered: the arrangement plus the configured tail.
pub fn render_length(events: &EventList, config: &RenderConfig) -> usize {
    ((events.total_seconds + config.tail_seconds) * config.sample_rate as f64).round() as usize
}

/// Gate-off offset of a note starting at `start`. Saturates instead of
/// overflowing for durations longer than the address space.
fn release_sample(start: usize, duration: f64, sample_rate: f64) -> usize {
    start.saturating_add((duration * sample_rate).round() as usize)
}

/// Slot arena of sounding voices.
///
/// At most `limit` voices hold their gate at once; starting one more
/// fast-releases the oldest held voice. Finished voices free their slot,
/// which the next started voice reuses.
#[derive(Debug)]
pub struct VoicePool {
    slots: Vec<Option<VoiceState>>,
    limit: usize,
    stolen: usize,
}

impl VoicePool {
    pub fn new(limit: usize) -> Self {
        VoicePool {
            slots: Vec::new(),
            limit,
            stolen: 0,
        }
    }

    /// Voices not yet released.
    pub fn held_count(&self) -> usize {
        self.slots.iter().flatten().filter(|v| v.is_held()).count()
    }

    /// Voices released early to stay within the limit.
    pub fn stolen(&self) -> usize {
        self.stolen
    }

    /// Allocated slots, free or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn start(&mut self, voice: VoiceState) {
        if self.held_count() >= self.limit {
            if let Some(oldest) = self
                .slots
                .iter_mut()
                .flatten()
                .filter(|v| v.is_held())
                .min_by_key(|v| v.start_sample)
            {
                oldest.steal();
                self.stolen += 1;
            }
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(voice),
            None => self.slots.push(Some(voice)),
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VoiceState> {
        self.slots.iter_mut().flatten()
    }

    /// Sum one sample of every voice at offset `i`. Voices whose gate-off
    /// offset has passed are released; finished ones are reclaimed.
    pub fn next_sample(&mut self, i: usize) -> f64 {
        let mut acc = 0.0;
        for slot in self.slots.iter_mut() {
            let mut done = false;
            if let Some(v) = slot {
                if i >= v.release_sample && v.is_held() {
                    v.note_off();
                }
                acc += v.next_sample();
                done = v.is_finished();
            }
            if done {
                *slot = None;
            }
        }
        acc
    }
}

/// Render every track of `plan`, returned in plan order.
pub fn render_tracks(plan: &Plan, events: &EventList, config: &RenderConfig) -> Result<Vec<AudioBuffer>> {
    let len = render_length(events, config);
    let job = || {
        (0..plan.tracks.len())
            .into_par_iter()
            .map(|index| render_track(plan, events, config, index, len))
            .collect::<Result<Vec<_>>>()
    };

    let buffers = match config.workers {
        Some(workers) => rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()?
            .install(job)?,
        None => job()?,
    };

    tracing::debug!(tracks = buffers.len(), samples = len, "synthesized tracks");
    Ok(buffers)
}

/// Render one track into a buffer of `len` samples.
pub fn render_track(
    plan: &Plan,
    events: &EventList,
    config: &RenderConfig,
    index: usize,
    len: usize,
) -> Result<AudioBuffer> {
    let track = &plan.tracks[index];
    let sample_rate = config.sample_rate as f64;
    let voice_limit = config.quality.unwrap_or(plan.quality).voice_limit();
    let patch = Patch::for_instrument(track.instrument);

    let mut cutoff = track.cutoff.map(cutoff_hz);
    let mut resonance = track.resonance;
    let mut gain = 1.0;
    let mut gain_target = 1.0;
    let gain_smoothing = (-1.0 / (GAIN_SMOOTHING_SECONDS * sample_rate)).exp();

    let cues: Vec<(usize, &EventKind)> = events
        .for_track(index)
        .map(|e| ((e.time * sample_rate).round() as usize, &e.kind))
        .collect();

    let mut voices = VoicePool::new(voice_limit);
    let mut out = AudioBuffer::silent(&track.name, config.sample_rate, len);
    let mut next_cue = 0;
    let mut ordinal: u64 = 0;

    for i in 0..len {
        while let Some(&(at, kind)) = cues.get(next_cue) {
            if at > i {
                break;
            }
            next_cue += 1;
            match kind {
                EventKind::Note {
                    pitch,
                    velocity,
                    duration,
                } => {
                    let voice = match patch {
                        Some(mut p) => {
                            if let Some(hz) = cutoff {
                                p.cutoff = hz;
                            }
                            if let Some(r) = resonance {
                                p.resonance = r;
                            }
                            VoiceState::tonal(&p, *pitch, *velocity, sample_rate)
                        }
                        None => {
                            let drum = DrumVoice::from_midi_note(*pitch).ok_or_else(|| {
                                RenderError::validation(
                                    format!("tracks[{index}].events"),
                                    format!("note {pitch} is not a drum voice"),
                                )
                            })?;
                            let noise = rng::stream(plan.seed, "noise", ((index as u64) << 32) | ordinal);
                            VoiceState::drum(drum, *velocity, sample_rate, noise)
                        }
                    };
                    voices.start(voice.scheduled(i, release_sample(i, *duration, sample_rate)));
                    ordinal += 1;
                }
                EventKind::Automation { parameter, value } => match parameter {
                    // Drum hits keep their own filters.
                    AutomationTarget::Cutoff if patch.is_some() => {
                        let hz = cutoff_hz(*value);
                        cutoff = Some(hz);
                        for v in voices.iter_mut() {
                            v.set_cutoff(hz);
                        }
                    }
                    AutomationTarget::Resonance if patch.is_some() => {
                        resonance = Some(*value);
                        for v in voices.iter_mut() {
                            v.set_resonance(*value);
                        }
                    }
                    AutomationTarget::Gain => gain_target = *value,
                    _ => {}
                },
            }
        }

        let acc = voices.next_sample(i);
        gain = gain_target + (gain - gain_target) * gain_smoothing;
        out.samples[i] = acc * gain;
    }

    out.check_finite("synthesis")?;

    if voices.stolen() > 0 {
        tracing::warn!(
            track = %track.name,
            stolen = voices.stolen(),
            voice_limit,
            "voice limit reached, oldest notes released early"
        );
    }

    let peak = out.peak();
    if peak > 1.0 {
        tracing::warn!(track = %track.name, peak, "track exceeded full scale, normalizing");
        out.scale(1.0 / peak);
    }

    Ok(out)
}
