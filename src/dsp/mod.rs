//! DSP — pure Rust synthesis and effects for offline rendering.
//!
//! Everything here runs in f64 and is deterministic for a given plan seed,
//! so the same plan renders identically natively and under WASM.

pub mod buffer;
pub mod delay;
pub mod ducker;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod mixer;
pub mod oscillator;
pub mod reverb;
pub mod voice;
