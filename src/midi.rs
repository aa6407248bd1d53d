//! MIDI encoder — writes the event list as a Standard MIDI File.
//!
//! Output is format 1 with a single track at 480 ticks per quarter note.
//! The track opens with tempo and time-signature meta events, then carries
//! every note as a Note-On/Note-Off pair and every automation point as a
//! Control Change, and closes with End of Track.

use std::path::Path;

use crate::error::{RenderError, Result};
use crate::output::write_atomic;
use crate::plan::{AutomationTarget, InstrumentKind, Plan};
use crate::scheduler::{EventKind, EventList};

/// Ticks per quarter note.
pub const DIVISION: u16 = 480;

/// Largest value a 4-byte variable-length quantity can hold.
pub const MAX_VLQ: u32 = 0x0FFF_FFFF;

const DRUM_CHANNEL: u8 = 9;

// Status bytes
const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const META: u8 = 0xFF;

// Meta types
const META_TEMPO: u8 = 0x51;
const META_TIME_SIGNATURE: u8 = 0x58;
const META_END_OF_TRACK: u8 = 0x2F;

/// Controller number a track parameter is exported on.
pub fn controller(target: AutomationTarget) -> u8 {
    match target {
        AutomationTarget::Cutoff => 74,
        AutomationTarget::Resonance => 71,
        AutomationTarget::Gain => 7,
    }
}

/// Encode `value` as a MIDI variable-length quantity: 7 bits per byte,
/// most significant group first, continuation bit set on all but the last.
pub fn encode_vlq(value: u32) -> Result<Vec<u8>> {
    if value > MAX_VLQ {
        return Err(RenderError::encoding(
            "midi",
            0,
            format!("{value} exceeds the variable-length quantity limit {MAX_VLQ}"),
        ));
    }
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    groups.reverse();
    Ok(groups)
}

/// Decode a variable-length quantity from the front of `bytes`.
/// Returns the value and the number of bytes consumed.
pub fn decode_vlq(bytes: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if i == 4 {
            return Err(RenderError::encoding("midi", i, "variable-length quantity longer than 4 bytes"));
        }
        value = (value << 7) | (b & 0x7F) as u32;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(RenderError::encoding(
        "midi",
        bytes.len(),
        "truncated variable-length quantity",
    ))
}

/// Channel per track: drums on 9, everything else in declaration order
/// over the remaining fifteen channels.
pub fn track_channels(plan: &Plan) -> Vec<u8> {
    let mut next = 0u8;
    plan.tracks
        .iter()
        .map(|t| {
            if t.instrument == InstrumentKind::Drums {
                return DRUM_CHANNEL;
            }
            let ch = next;
            next = (next + 1) % 16;
            if next == DRUM_CHANNEL {
                next += 1;
            }
            ch
        })
        .collect()
}

/// Convert normalized velocity to a Note-On velocity. Zero would read as a
/// Note-Off, so the floor is 1.
pub fn note_velocity(v: f64) -> u8 {
    (v * 127.0).round().clamp(1.0, 127.0) as u8
}

fn controller_value(v: f64) -> u8 {
    (v * 127.0).round().clamp(0.0, 127.0) as u8
}

/// One channel message at an absolute tick.
struct Message {
    tick: u64,
    is_note_off: bool,
    bytes: [u8; 3],
}

fn to_ticks(seconds: f64, seconds_per_beat: f64) -> u64 {
    (seconds / seconds_per_beat * DIVISION as f64).round().max(0.0) as u64
}

fn push_meta(track: &mut Vec<u8>, kind: u8, data: &[u8]) {
    track.extend_from_slice(&[0, META, kind, data.len() as u8]);
    track.extend_from_slice(data);
}

/// Encode the event list as SMF bytes.
pub fn encode_midi(plan: &Plan, events: &EventList) -> Result<Vec<u8>> {
    let channels = track_channels(plan);
    let spb = events.seconds_per_beat;

    let mut messages = Vec::with_capacity(events.events.len() * 2);
    for event in &events.events {
        let channel = *channels.get(event.track).ok_or_else(|| {
            RenderError::validation("events", format!("event refers to missing track {}", event.track))
        })?;
        let start = to_ticks(event.time, spb);
        match &event.kind {
            EventKind::Note {
                pitch,
                velocity,
                duration,
            } => {
                let pitch = (*pitch).min(127);
                messages.push(Message {
                    tick: start,
                    is_note_off: false,
                    bytes: [NOTE_ON | channel, pitch, note_velocity(*velocity)],
                });
                // A note always lasts at least one tick so its Note-Off sorts after its Note-On.
                messages.push(Message {
                    tick: to_ticks(event.time + duration, spb).max(start + 1),
                    is_note_off: true,
                    bytes: [NOTE_OFF | channel, pitch, 0],
                });
            }
            EventKind::Automation { parameter, value } => messages.push(Message {
                tick: start,
                is_note_off: false,
                bytes: [CONTROL_CHANGE | channel, controller(*parameter), controller_value(*value)],
            }),
        }
    }
    // Note-Offs first so a repeated pitch is released before it restarts.
    messages.sort_by_key(|m| (m.tick, !m.is_note_off));

    let mut track = Vec::with_capacity(messages.len() * 5 + 32);

    let tempo = (60_000_000.0 / plan.bpm).round() as u32;
    if tempo > 0xFF_FFFF {
        return Err(RenderError::encoding(
            "midi",
            0,
            format!("tempo of {} BPM cannot be encoded", plan.bpm),
        ));
    }
    push_meta(&mut track, META_TEMPO, &tempo.to_be_bytes()[1..]);

    let ts = plan.time_signature;
    push_meta(
        &mut track,
        META_TIME_SIGNATURE,
        &[ts.numerator, ts.denominator.trailing_zeros() as u8, 24, 8],
    );

    let mut last = 0u64;
    for m in &messages {
        let delta = u32::try_from(m.tick - last).ok().filter(|d| *d <= MAX_VLQ).ok_or_else(|| {
            RenderError::encoding("midi", track.len(), format!("delta of {} ticks is too long", m.tick - last))
        })?;
        track.extend(encode_vlq(delta)?);
        track.extend_from_slice(&m.bytes);
        last = m.tick;
    }
    push_meta(&mut track, META_END_OF_TRACK, &[]);

    let track_len = u32::try_from(track.len())
        .map_err(|_| RenderError::encoding("midi", 18, "track chunk exceeds 4 GiB"))?;

    let mut out = Vec::with_capacity(22 + track.len());
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // format 1
    out.extend_from_slice(&1u16.to_be_bytes()); // one track
    out.extend_from_slice(&DIVISION.to_be_bytes());
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&track_len.to_be_bytes());
    out.extend(track);

    tracing::debug!(messages = messages.len(), bytes = out.len(), "encoded midi");
    Ok(out)
}

/// Encode and atomically write a MIDI file.
pub fn write_midi(plan: &Plan, events: &EventList, path: &Path) -> Result<()> {
    let bytes = encode_midi(plan, events)?;
    write_atomic(path, &bytes)
}
