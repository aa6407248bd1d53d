//! Plan types — the fully specified musical input to the renderer.
//!
//! A `PlanSpec` is what arrives over JSON. `Plan::from_spec` validates it
//! exactly once and produces a `Plan` whose fields are all present and in
//! range; nothing downstream re-checks them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::automation::CurveShape;
use crate::config::Quality;
use crate::error::{RenderError, Result};

// ── Closed vocabularies ─────────────────────────────────────

/// Instrument model of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Pad,
    Lead,
    Pluck,
    Bass,
    Drums,
    Fx,
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pad" => Ok(InstrumentKind::Pad),
            "lead" => Ok(InstrumentKind::Lead),
            "pluck" => Ok(InstrumentKind::Pluck),
            "bass" => Ok(InstrumentKind::Bass),
            "drums" => Ok(InstrumentKind::Drums),
            "fx" => Ok(InstrumentKind::Fx),
            other => Err(format!(
                "unknown instrument type '{other}' (expected pad, lead, pluck, bass, drums or fx)"
            )),
        }
    }
}

/// Scale used to turn progression degrees into pitches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
}

impl Scale {
    /// Semitone offsets of the seven scale degrees from the root.
    pub fn intervals(self) -> [i32; 7] {
        match self {
            Scale::Major => [0, 2, 4, 5, 7, 9, 11],
            Scale::Minor => [0, 2, 3, 5, 7, 8, 10],
            Scale::Dorian => [0, 2, 3, 5, 7, 9, 10],
            Scale::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            Scale::Lydian => [0, 2, 4, 6, 7, 9, 11],
            Scale::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
            Scale::Locrian => [0, 1, 3, 5, 6, 8, 10],
            Scale::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
        }
    }

    /// Semitone offset of a zero-based scale step, continuing into
    /// higher (or lower) octaves.
    pub fn step_offset(self, step: i32) -> i32 {
        let octave = step.div_euclid(7);
        let index = step.rem_euclid(7) as usize;
        octave * 12 + self.intervals()[index]
    }
}

impl FromStr for Scale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "major" | "ionian" => Ok(Scale::Major),
            "minor" | "aeolian" => Ok(Scale::Minor),
            "dorian" => Ok(Scale::Dorian),
            "phrygian" => Ok(Scale::Phrygian),
            "lydian" => Ok(Scale::Lydian),
            "mixolydian" => Ok(Scale::Mixolydian),
            "locrian" => Ok(Scale::Locrian),
            "harmonic_minor" => Ok(Scale::HarmonicMinor),
            other => Err(format!("unknown scale '{other}'")),
        }
    }
}

/// Drum voices addressable from the `drums` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumVoice {
    Kick,
    Snare,
    Clap,
    Hats,
    OpenHat,
}

impl DrumVoice {
    /// General MIDI percussion note.
    pub fn midi_note(self) -> u8 {
        match self {
            DrumVoice::Kick => 36,
            DrumVoice::Snare => 38,
            DrumVoice::Clap => 39,
            DrumVoice::Hats => 42,
            DrumVoice::OpenHat => 46,
        }
    }

    pub fn from_midi_note(note: u8) -> Option<Self> {
        match note {
            36 => Some(DrumVoice::Kick),
            38 => Some(DrumVoice::Snare),
            39 => Some(DrumVoice::Clap),
            42 => Some(DrumVoice::Hats),
            46 => Some(DrumVoice::OpenHat),
            _ => None,
        }
    }

    pub fn velocity(self) -> f64 {
        match self {
            DrumVoice::Kick => 1.0,
            DrumVoice::Snare | DrumVoice::Clap => 0.8,
            DrumVoice::Hats | DrumVoice::OpenHat => 0.6,
        }
    }

    /// Nominal hit length in beats.
    pub fn length_beats(self) -> f64 {
        match self {
            DrumVoice::Hats => 0.5,
            _ => 1.0,
        }
    }
}

impl FromStr for DrumVoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "kick" => Ok(DrumVoice::Kick),
            "snare" => Ok(DrumVoice::Snare),
            "clap" => Ok(DrumVoice::Clap),
            "hats" | "hat" | "closed_hat" => Ok(DrumVoice::Hats),
            "open_hat" => Ok(DrumVoice::OpenHat),
            other => Err(format!("unknown drum voice '{other}'")),
        }
    }
}

impl fmt::Display for DrumVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrumVoice::Kick => "kick",
            DrumVoice::Snare => "snare",
            DrumVoice::Clap => "clap",
            DrumVoice::Hats => "hats",
            DrumVoice::OpenHat => "open_hat",
        };
        f.write_str(name)
    }
}

/// Continuous track parameters that automation can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationTarget {
    Cutoff,
    Resonance,
    Gain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArpDirection {
    #[default]
    Up,
    Down,
    UpDown,
}

// ── Nested sections (shared by raw input and validated plan) ─────

fn default_range() -> u8 {
    1
}
fn default_gate() -> f64 {
    0.8
}
fn default_rate() -> u32 {
    2
}

/// How chord tones are walked for arpeggiated tracks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArpRules {
    #[serde(default)]
    pub direction: ArpDirection,
    /// Octaves the arpeggio spans.
    #[serde(default = "default_range")]
    pub range: u8,
    /// Fraction of each step the note sounds, (0, 1].
    #[serde(default = "default_gate")]
    pub gate: f64,
    /// Grid steps per arpeggio note.
    #[serde(default = "default_rate")]
    pub rate: u32,
}

impl Default for ArpRules {
    fn default() -> Self {
        ArpRules {
            direction: ArpDirection::Up,
            range: default_range(),
            gate: default_gate(),
            rate: default_rate(),
        }
    }
}

/// Bounded timing/velocity jitter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Humanize {
    /// Maximum timing offset in milliseconds (either direction).
    pub timing_ms: f64,
    /// Maximum velocity offset (either direction).
    pub velocity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sends {
    pub reverb: f64,
    pub delay: f64,
}

fn default_velocity() -> f64 {
    0.8
}
fn default_beats() -> f64 {
    1.0
}

/// An explicit note on a track, positioned in beats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteSpec {
    pub beat: f64,
    pub note: u32,
    #[serde(default = "default_velocity")]
    pub velocity: f64,
    #[serde(default = "default_beats")]
    pub beats: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSpec {
    /// Decay time to -60 dB, in seconds.
    pub t60: f64,
    /// Corner of the in-loop damping low-pass.
    pub damping_hz: f64,
    /// Level of the reverb return in the master sum.
    #[serde(rename = "return")]
    pub return_level: f64,
}

impl Default for ReverbSpec {
    fn default() -> Self {
        ReverbSpec {
            t60: 1.8,
            damping_hz: 6000.0,
            return_level: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySpec {
    /// Spacing between taps, in beats.
    pub time_beats: f64,
    pub feedback: f64,
    pub taps: u32,
    pub lowpass_hz: f64,
    #[serde(rename = "return")]
    pub return_level: f64,
}

impl Default for DelaySpec {
    fn default() -> Self {
        DelaySpec {
            time_beats: 0.75,
            feedback: 0.35,
            taps: 2,
            lowpass_hz: 4500.0,
            return_level: 0.6,
        }
    }
}

fn default_depth() -> f64 {
    0.5
}
fn default_attack_ms() -> f64 {
    2.0
}
fn default_release_ms() -> f64 {
    120.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuckingSpec {
    /// Name of the track whose level drives the ducking.
    pub source: String,
    #[serde(default = "default_depth")]
    pub depth: f64,
    #[serde(default = "default_attack_ms")]
    pub attack_ms: f64,
    #[serde(default = "default_release_ms")]
    pub release_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSpec {
    pub reverb: ReverbSpec,
    pub delay: DelaySpec,
    pub ducking: Option<DuckingSpec>,
}

// ── Raw input ───────────────────────────────────────────────

/// One drum lane: either explicit steps or a Euclidean rhythm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DrumLaneSpec {
    Steps(Vec<u8>),
    Euclid {
        pulses: u32,
        steps: u32,
        #[serde(default)]
        rotation: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub name: String,
    pub instrument_type: String,
    #[serde(default)]
    pub gain: Option<f64>,
    #[serde(default)]
    pub pan: f64,
    #[serde(default)]
    pub sends: Sends,
    #[serde(default)]
    pub events: Vec<NoteSpec>,
    #[serde(default)]
    pub arp: Option<ArpRules>,
    #[serde(default)]
    pub cutoff: Option<f64>,
    #[serde(default)]
    pub resonance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLaneSpec {
    pub track: String,
    pub parameter: AutomationTarget,
    #[serde(default)]
    pub curve: CurveShape,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub start_bar: u32,
    pub bars: u32,
}

/// The plan as it arrives over JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub seed: u64,
    pub bpm: f64,
    pub time_signature: String,
    pub length_bars: u32,
    pub quality: Quality,
    pub root_midi: u32,
    pub scale: String,
    pub progression: Vec<u32>,
    pub tracks: Vec<TrackSpec>,
    pub drums: BTreeMap<String, DrumLaneSpec>,
    #[serde(default)]
    pub steps_per_beat: Option<u32>,
    #[serde(default)]
    pub arp_rules: Option<ArpRules>,
    #[serde(default)]
    pub humanize: Option<Humanize>,
    #[serde(default)]
    pub automation: Vec<AutomationLaneSpec>,
    #[serde(default)]
    pub mix: MixSpec,
    /// Keys this crate does not interpret, kept for collaborators.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

// ── Validated plan ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl FromStr for TimeSignature {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not of the form N/D"))?;
        let numerator: u8 = num
            .trim()
            .parse()
            .map_err(|_| format!("numerator '{num}' is not a number"))?;
        let denominator: u8 = den
            .trim()
            .parse()
            .map_err(|_| format!("denominator '{den}' is not a number"))?;
        if !(1..=32).contains(&numerator) {
            return Err(format!("numerator {numerator} is outside 1..=32"));
        }
        if !denominator.is_power_of_two() || denominator > 32 {
            return Err(format!("denominator {denominator} must be a power of two up to 32"));
        }
        Ok(TimeSignature {
            numerator,
            denominator,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrumPattern {
    Steps(Vec<bool>),
    Euclid { pulses: u32, steps: u32, rotation: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrumLane {
    pub voice: DrumVoice,
    pub pattern: DrumPattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub instrument: InstrumentKind,
    pub gain: f64,
    pub pan: f64,
    pub sends: Sends,
    pub events: Vec<NoteSpec>,
    pub arp: Option<ArpRules>,
    pub cutoff: Option<f64>,
    pub resonance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutomationLane {
    /// Index into `Plan::tracks`.
    pub track: usize,
    pub parameter: AutomationTarget,
    pub curve: CurveShape,
    pub start: f64,
    pub end: f64,
    pub start_bar: u32,
    pub bars: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ducking {
    /// Index into `Plan::tracks`.
    pub source: usize,
    pub depth: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mix {
    pub reverb: ReverbSpec,
    pub delay: DelaySpec,
    pub ducking: Option<Ducking>,
}

/// A fully specified, validated plan. Read-only to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub seed: u64,
    pub bpm: f64,
    pub time_signature: TimeSignature,
    pub length_bars: u32,
    pub quality: Quality,
    pub root_midi: u8,
    pub scale: Scale,
    pub progression: Vec<u8>,
    pub steps_per_beat: u32,
    pub arp_rules: Option<ArpRules>,
    pub humanize: Option<Humanize>,
    pub tracks: Vec<Track>,
    /// Drum lanes in `DrumVoice` order.
    pub drums: Vec<DrumLane>,
    pub automation: Vec<AutomationLane>,
    pub mix: Mix,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// Finest grid resolution accepted.
pub const MAX_STEPS_PER_BEAT: u32 = 64;
/// Longest arrangement accepted, in seconds.
pub const MAX_SONG_SECONDS: f64 = 3600.0;
/// Longest delay line accepted (tap spacing times taps), in seconds.
pub const MAX_DELAY_SECONDS: f64 = 60.0;

fn check_unit(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(RenderError::validation(field, format!("{value} is outside 0..=1")));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(RenderError::validation(field, format!("{value} must be a positive number")));
    }
    Ok(())
}

fn validate_arp(field: &str, arp: &ArpRules) -> Result<()> {
    if !(1..=4).contains(&arp.range) {
        return Err(RenderError::validation(
            format!("{field}.range"),
            format!("{} is outside 1..=4", arp.range),
        ));
    }
    if !(arp.gate > 0.0 && arp.gate <= 1.0) {
        return Err(RenderError::validation(
            format!("{field}.gate"),
            format!("{} is outside (0, 1]", arp.gate),
        ));
    }
    if arp.rate == 0 {
        return Err(RenderError::validation(format!("{field}.rate"), "must be at least 1"));
    }
    Ok(())
}

impl Plan {
    /// Parse and validate a JSON plan.
    pub fn from_json(json: &str) -> Result<Plan> {
        let spec: PlanSpec = serde_json::from_str(json)?;
        Plan::from_spec(spec)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Plan> {
        let spec: PlanSpec = serde_json::from_value(value)?;
        Plan::from_spec(spec)
    }

    /// Convert raw input into a validated plan. This is the only place
    /// plan fields are checked.
    pub fn from_spec(spec: PlanSpec) -> Result<Plan> {
        if !(spec.bpm.is_finite() && spec.bpm > 0.0 && spec.bpm <= 999.0) {
            return Err(RenderError::validation(
                "bpm",
                format!("{} is outside (0, 999]", spec.bpm),
            ));
        }
        let time_signature: TimeSignature = spec
            .time_signature
            .parse()
            .map_err(|m: String| RenderError::validation("time_signature", m))?;
        if spec.length_bars == 0 {
            return Err(RenderError::validation("length_bars", "must be at least 1"));
        }
        if spec.root_midi > 127 {
            return Err(RenderError::validation(
                "root_midi",
                format!("{} is outside 0..=127", spec.root_midi),
            ));
        }
        let scale: Scale = spec
            .scale
            .parse()
            .map_err(|m: String| RenderError::validation("scale", m))?;
        if spec.progression.is_empty() {
            return Err(RenderError::validation("progression", "must contain at least one degree"));
        }
        let mut progression = Vec::with_capacity(spec.progression.len());
        for (i, &degree) in spec.progression.iter().enumerate() {
            if !(1..=7).contains(&degree) {
                return Err(RenderError::validation(
                    format!("progression[{i}]"),
                    format!("degree {degree} is outside 1..=7"),
                ));
            }
            progression.push(degree as u8);
        }

        let seconds_per_beat = 60.0 / spec.bpm;
        let beats_per_bar = time_signature.numerator as f64 * 4.0 / time_signature.denominator as f64;
        let song_beats = spec.length_bars as f64 * beats_per_bar;
        if song_beats * seconds_per_beat > MAX_SONG_SECONDS {
            return Err(RenderError::validation(
                "length_bars",
                format!(
                    "{} bars at {} BPM last longer than {MAX_SONG_SECONDS} seconds",
                    spec.length_bars, spec.bpm
                ),
            ));
        }

        let steps_per_beat = spec.steps_per_beat.unwrap_or(4);
        if !(1..=MAX_STEPS_PER_BEAT).contains(&steps_per_beat) {
            return Err(RenderError::validation(
                "steps_per_beat",
                format!("{steps_per_beat} is outside 1..={MAX_STEPS_PER_BEAT}"),
            ));
        }
        let grid = steps_per_beat
            .checked_mul(time_signature.numerator as u32 * 4)
            .ok_or_else(|| RenderError::validation("steps_per_beat", "step grid is too fine"))?;
        if grid % time_signature.denominator as u32 != 0 {
            return Err(RenderError::validation(
                "steps_per_beat",
                format!(
                    "{steps_per_beat} steps per beat do not fill a {}/{} bar evenly",
                    time_signature.numerator, time_signature.denominator
                ),
            ));
        }

        (grid / time_signature.denominator as u32)
            .checked_mul(spec.length_bars)
            .ok_or_else(|| RenderError::validation("length_bars", "too many grid steps"))?;

        if let Some(arp) = &spec.arp_rules {
            validate_arp("arp_rules", arp)?;
        }
        if let Some(h) = &spec.humanize {
            if !(h.timing_ms.is_finite() && (0.0..=50.0).contains(&h.timing_ms)) {
                return Err(RenderError::validation(
                    "humanize.timing_ms",
                    format!("{} is outside 0..=50", h.timing_ms),
                ));
            }
            if !(0.0..=0.5).contains(&h.velocity) {
                return Err(RenderError::validation(
                    "humanize.velocity",
                    format!("{} is outside 0..=0.5", h.velocity),
                ));
            }
        }

        let tracks = validate_tracks(&spec.tracks, song_beats)?;
        let track_index = |name: &str| tracks.iter().position(|t| t.name == name);

        let mut drums = Vec::with_capacity(spec.drums.len());
        for (name, lane) in &spec.drums {
            let field = format!("drums.{name}");
            let voice: DrumVoice = name
                .parse()
                .map_err(|m: String| RenderError::validation(&field, m))?;
            if drums.iter().any(|d: &DrumLane| d.voice == voice) {
                return Err(RenderError::validation(&field, format!("{voice} is given twice")));
            }
            let pattern = match lane {
                DrumLaneSpec::Steps(steps) => DrumPattern::Steps(steps.iter().map(|&s| s != 0).collect()),
                DrumLaneSpec::Euclid {
                    pulses,
                    steps,
                    rotation,
                } => DrumPattern::Euclid {
                    pulses: *pulses,
                    steps: *steps,
                    rotation: *rotation,
                },
            };
            drums.push(DrumLane { voice, pattern });
        }
        drums.sort_by_key(|d| d.voice);
        if !drums.is_empty() && !tracks.iter().any(|t| t.instrument == InstrumentKind::Drums) {
            return Err(RenderError::validation(
                "drums",
                "drum lanes are given but no track has instrument_type 'drums'",
            ));
        }

        let mut automation = Vec::with_capacity(spec.automation.len());
        for (i, lane) in spec.automation.iter().enumerate() {
            let field = format!("automation[{i}]");
            let track = track_index(&lane.track).ok_or_else(|| {
                RenderError::validation(format!("{field}.track"), format!("no track named '{}'", lane.track))
            })?;
            check_unit(&format!("{field}.start"), lane.start)?;
            check_unit(&format!("{field}.end"), lane.end)?;
            if lane.bars == 0 {
                return Err(RenderError::validation(format!("{field}.bars"), "must be at least 1"));
            }
            automation.push(AutomationLane {
                track,
                parameter: lane.parameter,
                curve: lane.curve,
                start: lane.start,
                end: lane.end,
                start_bar: lane.start_bar,
                bars: lane.bars,
            });
        }

        let mix = validate_mix(&spec.mix, seconds_per_beat, track_index)?;

        Ok(Plan {
            seed: spec.seed,
            bpm: spec.bpm,
            time_signature,
            length_bars: spec.length_bars,
            quality: spec.quality,
            root_midi: spec.root_midi as u8,
            scale,
            progression,
            steps_per_beat,
            arp_rules: spec.arp_rules,
            humanize: spec.humanize,
            tracks,
            drums,
            automation,
            mix,
            extensions: spec.extensions,
        })
    }

    /// Length of one quarter-note beat.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Bar length measured in quarter-note beats.
    pub fn beats_per_bar(&self) -> f64 {
        self.time_signature.numerator as f64 * 4.0 / self.time_signature.denominator as f64
    }

    /// Grid steps in one bar. Validation guarantees this divides evenly
    /// and that `total_steps` fits in a `u32`.
    pub fn steps_per_bar(&self) -> u32 {
        self.steps_per_beat * self.time_signature.numerator as u32 * 4
            / self.time_signature.denominator as u32
    }

    pub fn total_steps(&self) -> u32 {
        self.steps_per_bar() * self.length_bars
    }

    pub fn seconds_per_step(&self) -> f64 {
        self.seconds_per_beat() / self.steps_per_beat as f64
    }

    pub fn total_seconds(&self) -> f64 {
        self.length_bars as f64 * self.beats_per_bar() * self.seconds_per_beat()
    }

    /// Index of the track that receives drum lane hits.
    pub fn drum_track(&self) -> Option<usize> {
        self.tracks.iter().position(|t| t.instrument == InstrumentKind::Drums)
    }
}

fn validate_tracks(specs: &[TrackSpec], song_beats: f64) -> Result<Vec<Track>> {
    let mut tracks: Vec<Track> = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let field = format!("tracks[{i}]");
        if spec.name.trim().is_empty() {
            return Err(RenderError::validation(format!("{field}.name"), "must not be empty"));
        }
        if tracks.iter().any(|t| t.name == spec.name) {
            return Err(RenderError::validation(
                format!("{field}.name"),
                format!("duplicate track name '{}'", spec.name),
            ));
        }
        let instrument: InstrumentKind = spec
            .instrument_type
            .parse()
            .map_err(|m: String| RenderError::validation(format!("{field}.instrument_type"), m))?;
        let gain = spec.gain.unwrap_or(0.8);
        if !(gain.is_finite() && gain >= 0.0) {
            return Err(RenderError::validation(format!("{field}.gain"), format!("{gain} must be >= 0")));
        }
        if !(-1.0..=1.0).contains(&spec.pan) {
            return Err(RenderError::validation(
                format!("{field}.pan"),
                format!("{} is outside -1..=1", spec.pan),
            ));
        }
        check_unit(&format!("{field}.sends.reverb"), spec.sends.reverb)?;
        check_unit(&format!("{field}.sends.delay"), spec.sends.delay)?;
        if let Some(cutoff) = spec.cutoff {
            check_unit(&format!("{field}.cutoff"), cutoff)?;
        }
        if let Some(res) = spec.resonance {
            check_unit(&format!("{field}.resonance"), res)?;
        }
        if let Some(arp) = &spec.arp {
            validate_arp(&format!("{field}.arp"), arp)?;
        }
        for (j, note) in spec.events.iter().enumerate() {
            let nf = format!("{field}.events[{j}]");
            if !(note.beat.is_finite() && note.beat >= 0.0) {
                return Err(RenderError::validation(format!("{nf}.beat"), format!("{} must be >= 0", note.beat)));
            }
            if note.note > 127 {
                return Err(RenderError::validation(
                    format!("{nf}.note"),
                    format!("{} is outside 0..=127", note.note),
                ));
            }
            check_unit(&format!("{nf}.velocity"), note.velocity)?;
            check_positive(&format!("{nf}.beats"), note.beats)?;
            if note.beats > song_beats {
                return Err(RenderError::validation(
                    format!("{nf}.beats"),
                    format!("{} is longer than the song ({song_beats} beats)", note.beats),
                ));
            }
            if instrument == InstrumentKind::Drums && DrumVoice::from_midi_note(note.note as u8).is_none() {
                return Err(RenderError::validation(
                    format!("{nf}.note"),
                    format!("note {} is not a drum voice (36, 38, 39, 42, 46)", note.note),
                ));
            }
        }
        tracks.push(Track {
            name: spec.name.clone(),
            instrument,
            gain,
            pan: spec.pan,
            sends: spec.sends,
            events: spec.events.clone(),
            arp: spec.arp,
            cutoff: spec.cutoff,
            resonance: spec.resonance,
        });
    }
    Ok(tracks)
}

fn validate_mix(
    spec: &MixSpec,
    seconds_per_beat: f64,
    track_index: impl Fn(&str) -> Option<usize>,
) -> Result<Mix> {
    check_positive("mix.reverb.t60", spec.reverb.t60)?;
    check_positive("mix.reverb.damping_hz", spec.reverb.damping_hz)?;
    check_unit("mix.reverb.return", spec.reverb.return_level)?;
    check_positive("mix.delay.time_beats", spec.delay.time_beats)?;
    if spec.delay.time_beats > 8.0 {
        return Err(RenderError::validation(
            "mix.delay.time_beats",
            format!("{} exceeds 8 beats", spec.delay.time_beats),
        ));
    }
    check_unit("mix.delay.feedback", spec.delay.feedback)?;
    if !(1..=8).contains(&spec.delay.taps) {
        return Err(RenderError::validation(
            "mix.delay.taps",
            format!("{} is outside 1..=8", spec.delay.taps),
        ));
    }
    let line_seconds = spec.delay.time_beats * seconds_per_beat * spec.delay.taps as f64;
    if line_seconds > MAX_DELAY_SECONDS {
        return Err(RenderError::validation(
            "mix.delay.time_beats",
            format!(
                "{} taps of {} beats span {line_seconds} seconds, more than {MAX_DELAY_SECONDS}",
                spec.delay.taps, spec.delay.time_beats
            ),
        ));
    }
    check_positive("mix.delay.lowpass_hz", spec.delay.lowpass_hz)?;
    check_unit("mix.delay.return", spec.delay.return_level)?;

    let ducking = match &spec.ducking {
        None => None,
        Some(d) => {
            let source = track_index(&d.source).ok_or_else(|| {
                RenderError::validation("mix.ducking.source", format!("no track named '{}'", d.source))
            })?;
            check_unit("mix.ducking.depth", d.depth)?;
            check_positive("mix.ducking.attack_ms", d.attack_ms)?;
            check_positive("mix.ducking.release_ms", d.release_ms)?;
            Some(Ducking {
                source,
                depth: d.depth,
                attack_ms: d.attack_ms,
                release_ms: d.release_ms,
            })
        }
    };

    Ok(Mix {
        reverb: spec.reverb,
        delay: spec.delay,
        ducking,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "bpm": 120,
            "time_signature": "4/4",
            "length_bars": 2,
            "quality": "draft",
            "root_midi": 60,
            "scale": "minor",
            "progression": [1, 5, 6, 4],
            "tracks": [ { "name": "drums", "instrument_type": "drums" } ],
            "drums": { "kick": [1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0] }
        })
    }

    fn field_of(err: RenderError) -> String {
        match err {
            RenderError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn parses_minimal_plan() {
        let plan = Plan::from_value(minimal()).unwrap();
        assert_eq!(plan.time_signature, TimeSignature { numerator: 4, denominator: 4 });
        assert_eq!(plan.steps_per_bar(), 16);
        assert_eq!(plan.total_steps(), 32);
        assert_eq!(plan.drum_track(), Some(0));
        assert!((plan.total_seconds() - 4.0).abs() < 1e-12);
        assert_eq!(plan.tracks[0].gain, 0.8);
    }

    #[test]
    fn rejects_note_longer_than_song() {
        let mut v = minimal();
        v["tracks"] = json!([
            { "name": "drums", "instrument_type": "drums" },
            { "name": "pad", "instrument_type": "pad",
              "events": [ { "beat": 0.0, "note": 60, "beats": 1e20 } ] }
        ]);
        assert_eq!(field_of(Plan::from_value(v.clone()).unwrap_err()), "tracks[1].events[0].beats");

        // Two bars of 4/4 hold eight beats.
        v["tracks"][1]["events"][0]["beats"] = json!(8.0);
        assert!(Plan::from_value(v).is_ok());
    }

    #[test]
    fn rejects_oversized_grid() {
        let mut v = minimal();
        v["steps_per_beat"] = json!(1u32 << 30);
        assert_eq!(field_of(Plan::from_value(v.clone()).unwrap_err()), "steps_per_beat");

        v["steps_per_beat"] = json!(MAX_STEPS_PER_BEAT);
        v["drums"] = json!({});
        let plan = Plan::from_value(v).unwrap();
        assert_eq!(plan.total_steps(), 2 * 16 * MAX_STEPS_PER_BEAT / 4);
    }

    #[test]
    fn rejects_overlong_song() {
        let mut v = minimal();
        v["length_bars"] = json!(400_000_000u32);
        assert_eq!(field_of(Plan::from_value(v.clone()).unwrap_err()), "length_bars");

        // 1800 bars of 4/4 at 120 BPM is exactly one hour.
        v["length_bars"] = json!(1800);
        assert!(Plan::from_value(v.clone()).is_ok());
        v["length_bars"] = json!(1801);
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "length_bars");
    }

    #[test]
    fn delay_line_is_capped_in_seconds() {
        let mut v = minimal();
        v["bpm"] = json!(1);
        v["length_bars"] = json!(1);
        v["mix"] = json!({ "delay": { "time_beats": 8.0, "taps": 8 } });
        assert_eq!(field_of(Plan::from_value(v.clone()).unwrap_err()), "mix.delay.time_beats");

        // A quarter beat at 1 BPM is 15 seconds; four taps fill exactly a minute.
        v["mix"] = json!({ "delay": { "time_beats": 0.25, "taps": 4 } });
        assert!(Plan::from_value(v).is_ok());
    }

    #[test]
    fn compound_meter_grid() {
        let mut v = minimal();
        v["time_signature"] = json!("6/8");
        v["drums"] = json!({});
        let plan = Plan::from_value(v).unwrap();
        assert_eq!(plan.steps_per_bar(), 12);
        assert!((plan.beats_per_bar() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn missing_required_field() {
        let mut v = minimal();
        v.as_object_mut().unwrap().remove("bpm");
        let err = Plan::from_value(v).unwrap_err();
        assert!(err.to_string().contains("bpm"), "{err}");
    }

    #[test]
    fn rejects_bad_denominator() {
        let mut v = minimal();
        v["time_signature"] = json!("4/3");
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "time_signature");
    }

    #[test]
    fn rejects_unknown_instrument() {
        let mut v = minimal();
        v["tracks"] = json!([{ "name": "x", "instrument_type": "theremin" }]);
        v["drums"] = json!({});
        let err = Plan::from_value(v).unwrap_err();
        assert!(err.to_string().contains("theremin"));
        assert_eq!(field_of(err), "tracks[0].instrument_type");
    }

    #[test]
    fn rejects_unknown_scale() {
        let mut v = minimal();
        v["scale"] = json!("bebop");
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "scale");
    }

    #[test]
    fn rejects_drums_without_drum_track() {
        let mut v = minimal();
        v["tracks"] = json!([{ "name": "pad", "instrument_type": "pad" }]);
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "drums");
    }

    #[test]
    fn rejects_duplicate_track_names() {
        let mut v = minimal();
        v["tracks"] = json!([
            { "name": "a", "instrument_type": "drums" },
            { "name": "a", "instrument_type": "pad" }
        ]);
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "tracks[1].name");
    }

    #[test]
    fn rejects_unknown_ducking_source() {
        let mut v = minimal();
        v["mix"] = json!({ "ducking": { "source": "nope" } });
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "mix.ducking.source");
    }

    #[test]
    fn rejects_non_drum_note_on_drum_track() {
        let mut v = minimal();
        v["tracks"][0]["events"] = json!([{ "beat": 0.0, "note": 60 }]);
        assert_eq!(field_of(Plan::from_value(v).unwrap_err()), "tracks[0].events[0].note");
    }

    #[test]
    fn keeps_extension_fields() {
        let mut v = minimal();
        v["style"] = json!("techno");
        let plan = Plan::from_value(v).unwrap();
        assert_eq!(plan.extensions.get("style"), Some(&json!("techno")));
    }

    #[test]
    fn euclid_lane_parses() {
        let mut v = minimal();
        v["drums"] = json!({ "snare": { "pulses": 3, "steps": 8 } });
        let plan = Plan::from_value(v).unwrap();
        assert_eq!(
            plan.drums[0].pattern,
            DrumPattern::Euclid { pulses: 3, steps: 8, rotation: 0 }
        );
    }

    #[test]
    fn scale_steps_wrap_octaves() {
        assert_eq!(Scale::Major.step_offset(0), 0);
        assert_eq!(Scale::Major.step_offset(7), 12);
        assert_eq!(Scale::Major.step_offset(9), 16);
        assert_eq!(Scale::Minor.step_offset(-1), -2);
    }

    #[test]
    fn drum_notes_round_trip() {
        for voice in [DrumVoice::Kick, DrumVoice::Snare, DrumVoice::Clap, DrumVoice::Hats, DrumVoice::OpenHat] {
            assert_eq!(DrumVoice::from_midi_note(voice.midi_note()), Some(voice));
        }
    }
}
