//! WAV encoder — mono 24-bit PCM with optional TPDF dither.
//!
//! The writer always produces the canonical 44-byte header layout. The
//! reader accepts what the writer produces (PCM, mono, 24-bit), skipping any
//! extra chunks, and reports everything else as an encoding error.

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::dsp::buffer::AudioBuffer;
use crate::error::{RenderError, Result};
use crate::output::write_atomic;
use crate::rng;

/// Largest positive 24-bit sample value; 1.0 maps here.
pub const FULL_SCALE: f64 = 8_388_607.0;
const MIN_SAMPLE: f64 = -8_388_608.0;

const HEADER_LEN: usize = 44;
const BYTES_PER_SAMPLE: usize = 3;

/// Dither applied before quantization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Dither {
    #[default]
    None,
    /// Triangular-PDF noise of ±1 LSB, from a seeded stream.
    Tpdf { seed: u64 },
}

/// Quantize one sample to a signed 24-bit integer. `dither` is in LSB units.
pub fn quantize(sample: f64, dither: f64) -> i32 {
    let v = (sample.clamp(-1.0, 1.0) * FULL_SCALE + dither).round();
    v.clamp(MIN_SAMPLE, FULL_SCALE) as i32
}

/// Encode mono samples as a 24-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f64], sample_rate: u32, dither: Dither) -> Result<Vec<u8>> {
    let data_size = samples.len() * BYTES_PER_SAMPLE;
    let pad = data_size % 2;
    let riff_size = u32::try_from(36 + data_size + pad).map_err(|_| {
        RenderError::encoding("wav", 4, format!("{} samples do not fit in a RIFF file", samples.len()))
    })?;
    let byte_rate = sample_rate
        .checked_mul(BYTES_PER_SAMPLE as u32)
        .ok_or_else(|| RenderError::encoding("wav", 28, format!("sample rate {sample_rate} is too large")))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + data_size + pad);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&riff_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&(BYTES_PER_SAMPLE as u16).to_le_bytes()); // block align
    buf.extend_from_slice(&24u16.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&(data_size as u32).to_le_bytes());

    let mut noise = match dither {
        Dither::Tpdf { seed } => Some(rng::stream(seed, "dither", 0)),
        Dither::None => None,
    };
    for (i, &s) in samples.iter().enumerate() {
        if !s.is_finite() {
            return Err(RenderError::encoding(
                "wav",
                HEADER_LEN + i * BYTES_PER_SAMPLE,
                format!("sample {i} is not finite"),
            ));
        }
        // Digital silence stays silent.
        let d = match noise.as_mut() {
            Some(n) if s != 0.0 => n.random::<f64>() + n.random::<f64>() - 1.0,
            _ => 0.0,
        };
        let q = quantize(s, d);
        buf.extend_from_slice(&q.to_le_bytes()[..BYTES_PER_SAMPLE]);
    }
    if pad == 1 {
        buf.push(0);
    }

    Ok(buf)
}

/// Encode and atomically write a WAV file.
pub fn write_wav(samples: &[f64], sample_rate: u32, path: &Path, dither: Dither) -> Result<()> {
    let bytes = encode_wav(samples, sample_rate, dither)?;
    write_atomic(path, &bytes)?;
    tracing::debug!(path = %path.display(), samples = samples.len(), ?dither, "wrote wav");
    Ok(())
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Decode a mono 24-bit PCM WAV file into samples in [-1, 1].
pub fn decode_wav(name: &str, bytes: &[u8]) -> Result<AudioBuffer> {
    let err = |offset: usize, msg: &str| RenderError::encoding("wav", offset, msg);

    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(err(0, "missing RIFF/WAVE header"));
    }

    let mut pos = 12;
    let mut sample_rate = None;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32_at(bytes, pos + 4) as usize;
        let body = pos + 8;
        let end = body
            .checked_add(size)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| err(pos, "chunk runs past end of file"))?;

        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(err(body, "fmt chunk too short"));
                }
                if u16_at(bytes, body) != 1 {
                    return Err(err(body, "only PCM is supported"));
                }
                if u16_at(bytes, body + 2) != 1 {
                    return Err(err(body + 2, "only mono is supported"));
                }
                if u16_at(bytes, body + 14) != 24 {
                    return Err(err(body + 14, "only 24-bit samples are supported"));
                }
                sample_rate = Some(u32_at(bytes, body + 4));
            }
            b"data" => {
                let sr = sample_rate.ok_or_else(|| err(pos, "data chunk before fmt chunk"))?;
                if size % BYTES_PER_SAMPLE != 0 {
                    return Err(err(pos + 4, "data size is not a whole number of samples"));
                }
                let samples = bytes[body..end]
                    .chunks_exact(BYTES_PER_SAMPLE)
                    .map(|b| {
                        // Sign-extend from 24 bits.
                        let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                        v as f64 / FULL_SCALE
                    })
                    .collect();
                return Ok(AudioBuffer::from_samples(name, sr, samples));
            }
            _ => {}
        }
        // Chunks are word aligned.
        pos = end + size % 2;
    }

    Err(err(pos, "no data chunk"))
}

/// Read a WAV file written by [`write_wav`].
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let bytes = std::fs::read(path).map_err(|e| RenderError::io(path, e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    decode_wav(&name, &bytes)
}
