pub mod analysis;
pub mod automation;
pub mod config;
pub mod dsp;
pub mod error;
pub mod midi;
pub mod output;
pub mod plan;
pub mod rhythm;
pub mod rng;
pub mod scheduler;
pub mod wav;

use std::path::Path;

use wasm_bindgen::prelude::*;

use crate::config::RenderConfig;
use crate::dsp::buffer::AudioBuffer;
use crate::dsp::engine::{render_length, render_tracks};
use crate::dsp::mixer::MixBus;
use crate::error::{RenderError, Result};
use crate::plan::Plan;
use crate::scheduler::EventList;
use crate::wav::Dither;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A finished render: the normalized mono master and the events behind it.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub master: AudioBuffer,
    pub events: EventList,
    /// Dither to use when this master is written out.
    pub dither: Dither,
}

impl Rendered {
    /// Write the master as a 24-bit WAV using the render's dither setting.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        wav::write_wav(&self.master.samples, self.master.sample_rate, path, self.dither)?;
        tracing::info!(path = %path.display(), "wav exported");
        Ok(())
    }

    /// The master as in-memory WAV bytes.
    pub fn wav_bytes(&self) -> Result<Vec<u8>> {
        wav::encode_wav(&self.master.samples, self.master.sample_rate, self.dither)
    }
}

/// Dither for a render: TPDF seeded from the plan, or none.
pub fn dither_for(plan: &Plan, config: &RenderConfig) -> Dither {
    if config.dither {
        Dither::Tpdf {
            seed: rng::derive_seed(plan.seed, "dither", 0),
        }
    } else {
        Dither::None
    }
}

/// Schedule, synthesize and mix `plan` into a master buffer.
pub fn render(plan: &Plan, config: &RenderConfig) -> Result<Rendered> {
    config.validate()?;
    let events = scheduler::schedule(plan)?;
    let len = render_length(&events, config);
    let tracks = render_tracks(plan, &events, config)?;
    let master = MixBus::new(plan, config).process(&tracks, len)?;

    tracing::info!(
        tracks = tracks.len(),
        notes = events.note_count(),
        seconds = master.duration_seconds(),
        "render complete"
    );

    Ok(Rendered {
        master,
        events,
        dither: dither_for(plan, config),
    })
}

/// Write `events` as a Standard MIDI File at `path`.
pub fn export_midi(plan: &Plan, events: &EventList, path: &Path) -> Result<()> {
    midi::write_midi(plan, events, path)?;
    tracing::info!(path = %path.display(), events = events.events.len(), "midi exported");
    Ok(())
}

/// Write `master` as an undithered 24-bit WAV at `sample_rate`.
pub fn write_wav(master: &AudioBuffer, sample_rate: u32, path: &Path) -> Result<()> {
    if master.sample_rate != sample_rate {
        return Err(RenderError::validation(
            "sample_rate",
            format!("buffer is at {} Hz, not {sample_rate} Hz", master.sample_rate),
        ));
    }
    wav::write_wav(&master.samples, sample_rate, path, Dither::None)?;
    tracing::info!(path = %path.display(), "wav exported");
    Ok(())
}

fn js_err(e: RenderError) -> JsValue {
    JsValue::from_str(&format!("{e}"))
}

fn render_json(plan_json: &str, sample_rate: u32) -> Result<Rendered> {
    let plan = Plan::from_json(plan_json)?;
    let config = RenderConfig {
        sample_rate,
        ..RenderConfig::default()
    };
    render(&plan, &config)
}

/// WASM-exposed: return the plansynth-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: schedule a JSON plan into its event list.
#[wasm_bindgen]
pub fn schedule_plan(plan_json: &str) -> std::result::Result<JsValue, JsValue> {
    let plan = Plan::from_json(plan_json).map_err(js_err)?;
    let events = scheduler::schedule(&plan).map_err(js_err)?;
    serde_wasm_bindgen::to_value(&events).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render a JSON plan to WAV bytes.
#[wasm_bindgen]
pub fn render_plan_wav(plan_json: &str, sample_rate: u32) -> std::result::Result<Vec<u8>, JsValue> {
    render_json(plan_json, sample_rate)
        .and_then(|r| r.wav_bytes())
        .map_err(js_err)
}

/// WASM-exposed: render a JSON plan to mono f32 samples for playback.
#[wasm_bindgen]
pub fn render_plan_samples(plan_json: &str, sample_rate: u32) -> std::result::Result<Vec<f32>, JsValue> {
    let rendered = render_json(plan_json, sample_rate).map_err(js_err)?;
    Ok(rendered.master.samples.iter().map(|&s| s as f32).collect())
}

/// WASM-exposed: encode a JSON plan's events as a Standard MIDI File.
#[wasm_bindgen]
pub fn render_plan_midi(plan_json: &str) -> std::result::Result<Vec<u8>, JsValue> {
    let plan = Plan::from_json(plan_json).map_err(js_err)?;
    let events = scheduler::schedule(&plan).map_err(js_err)?;
    midi::encode_midi(&plan, &events).map_err(js_err)
}
