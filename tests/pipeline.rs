//! End-to-end checks: plan in, WAV and MIDI files out.

use approx::assert_abs_diff_eq;
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use plansynth_core::analysis::AudioMetrics;
use plansynth_core::config::RenderConfig;
use plansynth_core::midi::{decode_vlq, encode_midi};
use plansynth_core::plan::Plan;
use plansynth_core::scheduler::{EventKind, schedule};
use plansynth_core::wav::read_wav;
use plansynth_core::{export_midi, render, write_wav};
use serde_json::json;

fn kick_plan() -> Plan {
    Plan::from_value(json!({
        "bpm": 120,
        "time_signature": "4/4",
        "length_bars": 1,
        "quality": "draft",
        "root_midi": 60,
        "scale": "major",
        "progression": [1],
        "tracks": [ { "name": "drums", "instrument_type": "drums" } ],
        "drums": { "kick": [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0] }
    }))
    .unwrap()
}

fn full_plan() -> Plan {
    Plan::from_value(json!({
        "seed": 42,
        "bpm": 110,
        "time_signature": "4/4",
        "length_bars": 2,
        "quality": "standard",
        "root_midi": 57,
        "scale": "minor",
        "progression": [1, 6],
        "arp_rules": { "direction": "up_down", "range": 2 },
        "humanize": { "timing_ms": 4.0, "velocity": 0.05 },
        "tracks": [
            { "name": "drums", "instrument_type": "drums", "sends": { "reverb": 0.1 } },
            { "name": "bass", "instrument_type": "bass", "gain": 0.9 },
            { "name": "pad", "instrument_type": "pad", "pan": -0.3, "sends": { "reverb": 0.5 } },
            { "name": "lead", "instrument_type": "lead", "pan": 0.4, "sends": { "delay": 0.4 } }
        ],
        "drums": {
            "kick": [1, 0, 0, 0],
            "snare": { "pulses": 2, "steps": 16, "rotation": 4 },
            "hats": [0, 1]
        },
        "automation": [
            { "track": "pad", "parameter": "cutoff", "curve": "s_curve", "start": 0.3, "end": 0.8, "bars": 2 }
        ],
        "mix": { "ducking": { "source": "drums", "depth": 0.4 } }
    }))
    .unwrap()
}

fn fast_config() -> RenderConfig {
    RenderConfig {
        sample_rate: 22050,
        tail_seconds: 0.5,
        ..RenderConfig::default()
    }
}

#[test]
fn single_kick_event_and_midi_ordering() {
    let plan = kick_plan();
    let events = schedule(&plan).unwrap();
    assert_eq!(events.events.len(), 1);
    let kick = &events.events[0];
    assert_eq!(kick.time, 0.0);
    assert!(matches!(kick.kind, EventKind::Note { pitch: 36, .. }));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kick.mid");
    export_midi(&plan, &events, &path).unwrap();
    let smf = std::fs::read(&path).unwrap();

    let track = &smf[22..];
    // Tempo, then time signature, both at delta 0.
    assert_eq!(&track[..4], &[0x00, 0xFF, 0x51, 0x03]);
    assert_eq!(&track[7..11], &[0x00, 0xFF, 0x58, 0x04]);
    let (delta, used) = decode_vlq(&track[15..]).unwrap();
    assert_eq!((delta, used), (0, 1));
    assert_eq!(track[16] & 0xF0, 0x90);
    assert_eq!(track[17], 36);
}

#[test]
fn silent_plan_writes_all_zero_wav() {
    let plan = Plan::from_value(json!({
        "bpm": 100,
        "time_signature": "3/4",
        "length_bars": 2,
        "quality": "draft",
        "root_midi": 60,
        "scale": "major",
        "progression": [1],
        "tracks": [
            { "name": "drums", "instrument_type": "drums" },
            { "name": "pad", "instrument_type": "pad" }
        ],
        "drums": {}
    }))
    .unwrap();
    let rendered = render(&plan, &fast_config()).unwrap();
    assert!(rendered.master.samples.iter().all(|&s| s == 0.0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silence.wav");
    // Dither is on by default; silence must still encode as zeros.
    rendered.write_wav(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes[44..].iter().all(|&b| b == 0));
    assert!(read_wav(&path).unwrap().samples.iter().all(|&s| s == 0.0));
}

#[test]
fn output_is_independent_of_worker_count() {
    let plan = full_plan();
    let one = render(&plan, &RenderConfig { workers: Some(1), ..fast_config() }).unwrap();
    let four = render(&plan, &RenderConfig { workers: Some(4), ..fast_config() }).unwrap();
    let global = render(&plan, &fast_config()).unwrap();
    let a = one.wav_bytes().unwrap();
    assert_eq!(a, four.wav_bytes().unwrap());
    assert_eq!(a, global.wav_bytes().unwrap());
}

#[test]
fn render_is_repeatable() {
    let plan = full_plan();
    let a = render(&plan, &fast_config()).unwrap();
    let b = render(&plan, &fast_config()).unwrap();
    assert_eq!(a.events, b.events);
    assert_eq!(a.master, b.master);
}

#[test]
fn master_is_normalized_and_bounded() {
    let config = fast_config();
    let rendered = render(&full_plan(), &config).unwrap();
    let peak = rendered.master.peak();
    assert_abs_diff_eq!(peak, config.target_peak_linear(), epsilon = 1e-9);
    assert!(rendered.master.samples.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    let expected_len = ((rendered.events.total_seconds + config.tail_seconds) * 22050.0).round() as usize;
    assert_eq!(rendered.master.len(), expected_len);
}

#[test]
fn wav_round_trip_preserves_peak_and_rms() {
    let config = RenderConfig {
        dither: false,
        ..fast_config()
    };
    let rendered = render(&full_plan(), &config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("master.wav");
    write_wav(&rendered.master, config.sample_rate, &path).unwrap();

    let direct = AudioMetrics::from_buffer(&rendered.master);
    let decoded = AudioMetrics::from_buffer(&read_wav(&path).unwrap());
    let lsb = 1.0 / 8_388_607.0;
    assert_abs_diff_eq!(decoded.peak, direct.peak, epsilon = lsb);
    assert_abs_diff_eq!(decoded.rms, direct.rms, epsilon = lsb);

    // An independent decoder agrees on the samples.
    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 24);
    let hound_peak = reader
        .samples::<i32>()
        .map(|s| (s.unwrap() as f64 / 8_388_607.0).abs())
        .fold(0.0, f64::max);
    assert_abs_diff_eq!(hound_peak, direct.peak, epsilon = lsb);
}

#[test]
fn wrong_sample_rate_is_rejected() {
    let rendered = render(&kick_plan(), &fast_config()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.wav");
    assert!(write_wav(&rendered.master, 44100, &path).is_err());
    assert!(!path.exists());
}

#[test]
fn invalid_plan_fails_before_rendering() {
    let err = Plan::from_value(json!({
        "bpm": 120,
        "time_signature": "4/3",
        "length_bars": 1,
        "quality": "draft",
        "root_midi": 60,
        "scale": "major",
        "progression": [1],
        "tracks": [],
        "drums": {}
    }))
    .unwrap_err();
    assert!(err.to_string().contains("time_signature"), "{err}");
}

#[test]
fn midly_reads_exported_file() {
    let plan = full_plan();
    let events = schedule(&plan).unwrap();
    let bytes = encode_midi(&plan, &events).unwrap();
    let smf = Smf::parse(&bytes).unwrap();

    assert_eq!(smf.header.format, midly::Format::Parallel);
    match smf.header.timing {
        Timing::Metrical(t) => assert_eq!(t.as_int(), 480),
        other => panic!("unexpected timing {other:?}"),
    }
    assert_eq!(smf.tracks.len(), 1);
    let track = &smf.tracks[0];

    match track[0].kind {
        TrackEventKind::Meta(MetaMessage::Tempo(t)) => assert_eq!(t.as_int(), 545_455),
        other => panic!("expected tempo first, got {other:?}"),
    }
    assert!(matches!(
        track[1].kind,
        TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8))
    ));
    assert!(matches!(
        track.last().map(|e| e.kind),
        Some(TrackEventKind::Meta(MetaMessage::EndOfTrack))
    ));

    let mut note_ons = 0;
    let mut drum_note_ons = 0;
    for event in track.iter() {
        if let TrackEventKind::Midi { channel, message: MidiMessage::NoteOn { vel, .. } } = event.kind {
            assert!(vel.as_int() >= 1);
            note_ons += 1;
            if channel.as_int() == 9 {
                drum_note_ons += 1;
            }
        }
    }
    assert_eq!(note_ons, events.note_count());
    assert_eq!(drum_note_ons, events.for_track(0).filter(|e| matches!(e.kind, EventKind::Note { .. })).count());
}
