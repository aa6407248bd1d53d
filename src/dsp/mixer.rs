//! Mix bus — sums track buffers through sends, effects and ducking into
//! the master, then normalizes and soft-clips it.
//!
//! The bus runs in stereo internally (tracks are equal-power panned, the
//! reverb and delay are stereo) and folds down to mono at the very end.
//! Tracks are always summed in plan order so the floating-point result
//! does not depend on how synthesis was scheduled.

use std::f64::consts::FRAC_PI_4;

use crate::config::RenderConfig;
use crate::error::{RenderError, Result};
use crate::plan::Plan;

use super::buffer::AudioBuffer;
use super::delay::Delay;
use super::ducker::Ducker;
use super::filter::{FilterMode, SvfFilter};
use super::reverb::Reverb;

/// Soft clipper is the identity below this level.
pub const CLIP_KNEE: f64 = 0.95;

/// Knee soft clipper: identity up to `CLIP_KNEE`, then a tanh curve that
/// approaches but never exceeds 1. Monotonic, odd and continuous in slope.
pub fn soft_clip(x: f64) -> f64 {
    let a = x.abs();
    if a <= CLIP_KNEE {
        return x;
    }
    let span = 1.0 - CLIP_KNEE;
    let shaped = CLIP_KNEE + span * ((a - CLIP_KNEE) / span).tanh();
    shaped.copysign(x)
}

/// Equal-power pan law. `pan` in [-1, 1] → (left gain, right gain).
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Scale factor that brings `peak` to `target`. Silence is left alone.
pub fn normalization_gain(peak: f64, target: f64) -> f64 {
    if peak > 0.0 { target / peak } else { 1.0 }
}

/// Sums low frequencies of both channels into one shared band.
#[derive(Debug, Clone)]
pub struct BassMono {
    low_l: SvfFilter,
    low_r: SvfFilter,
}

impl BassMono {
    pub fn new(crossover_hz: f64, sample_rate: f64) -> Self {
        let split = SvfFilter::new(FilterMode::Lowpass, sample_rate).with_params(crossover_hz, 0.0);
        Self {
            low_l: split.clone(),
            low_r: split,
        }
    }

    #[inline]
    pub fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        let low_l = self.low_l.process(left);
        let low_r = self.low_r.process(right);
        let mid = 0.5 * (low_l + low_r);
        (left - low_l + mid, right - low_r + mid)
    }
}

/// The master effects and summing bus for one render.
pub struct MixBus<'a> {
    plan: &'a Plan,
    config: &'a RenderConfig,
    reverb: Reverb,
    delay: Delay,
    ducker: Option<(usize, Ducker)>,
    bass: BassMono,
}

impl<'a> MixBus<'a> {
    pub fn new(plan: &'a Plan, config: &'a RenderConfig) -> Self {
        let sr = config.sample_rate as f64;
        let mix = &plan.mix;
        let reverb = Reverb::with_params(sr, mix.reverb.t60, mix.reverb.damping_hz);
        let delay = Delay::with_params(
            sr,
            mix.delay.time_beats * plan.seconds_per_beat(),
            mix.delay.taps as usize,
            mix.delay.feedback,
            mix.delay.lowpass_hz,
        );
        let ducker = mix.ducking.as_ref().map(|d| {
            (
                d.source,
                Ducker::with_params(sr, d.depth, d.attack_ms / 1000.0, d.release_ms / 1000.0),
            )
        });
        Self {
            plan,
            config,
            reverb,
            delay,
            ducker,
            bass: BassMono::new(config.mono_bass_crossover_hz, sr),
        }
    }

    /// Mix `tracks` (one per plan track, in plan order, `len` samples each)
    /// into the normalized master buffer.
    pub fn process(&mut self, tracks: &[AudioBuffer], len: usize) -> Result<AudioBuffer> {
        if tracks.len() != self.plan.tracks.len() {
            return Err(RenderError::validation(
                "track_buffers",
                format!("expected {} buffers, got {}", self.plan.tracks.len(), tracks.len()),
            ));
        }
        for buf in tracks {
            if buf.len() != len || buf.sample_rate != self.config.sample_rate {
                return Err(RenderError::validation(
                    "track_buffers",
                    format!(
                        "buffer '{}' has {} samples at {} Hz, expected {len} at {} Hz",
                        buf.name,
                        buf.len(),
                        buf.sample_rate,
                        self.config.sample_rate
                    ),
                ));
            }
        }

        let pans: Vec<(f64, f64)> = self.plan.tracks.iter().map(|t| pan_gains(t.pan)).collect();
        let reverb_return = self.plan.mix.reverb.return_level;
        let delay_return = self.plan.mix.delay.return_level;
        let mut master = AudioBuffer::silent("master", self.config.sample_rate, len);

        for i in 0..len {
            let (mut src_l, mut src_r) = (0.0, 0.0);
            let (mut rest_l, mut rest_r) = (0.0, 0.0);
            let mut reverb_send = 0.0;
            let mut delay_send = 0.0;
            let mut sidechain = 0.0;

            for (t, (track, buf)) in self.plan.tracks.iter().zip(tracks).enumerate() {
                let x = buf.samples[i] * track.gain;
                let (gl, gr) = pans[t];
                reverb_send += x * track.sends.reverb;
                delay_send += x * track.sends.delay;
                match &self.ducker {
                    Some((source, _)) if *source == t => {
                        sidechain = x;
                        src_l += x * gl;
                        src_r += x * gr;
                    }
                    _ => {
                        rest_l += x * gl;
                        rest_r += x * gr;
                    }
                }
            }

            let (rev_l, rev_r) = self.reverb.process(reverb_send, reverb_send);
            let (del_l, del_r) = self.delay.process(delay_send);
            let duck = match &mut self.ducker {
                Some((_, ducker)) => ducker.process(sidechain),
                None => 1.0,
            };

            let l = src_l + duck * (rest_l + reverb_return * rev_l + delay_return * del_l);
            let r = src_r + duck * (rest_r + reverb_return * rev_r + delay_return * del_r);
            let (l, r) = self.bass.process(l, r);
            master.samples[i] = 0.5 * (l + r);
        }

        master.check_finite("mix")?;

        let peak = master.peak();
        let gain = normalization_gain(peak, self.config.target_peak_linear());
        for s in &mut master.samples {
            *s = soft_clip(*s * gain);
        }
        tracing::debug!(peak, gain, samples = len, "mixed master");

        Ok(master)
    }
}
