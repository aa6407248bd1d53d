//! EventScheduler — expands a `Plan` into one time-ordered event list.
//!
//! Drum lanes, explicit note lists, arpeggiated harmony and automation
//! lanes are all laid out on the plan's step grid and merged into a single
//! sequence sorted by `(time, track, kind)`. Scheduling is pure: no I/O,
//! no shared state, and the same plan always yields the same list.

use serde::{Deserialize, Serialize};

use crate::automation::generate_curve;
use crate::error::{RenderError, Result};
use crate::plan::{
    ArpDirection, ArpRules, AutomationTarget, DrumLane, DrumPattern, InstrumentKind, Plan, Track,
};
use crate::rhythm::{euclidean, humanize_offsets};

// ── Event List (Scheduler Output) ───────────────────────────

/// The scheduled output: a flat list of timed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventList {
    /// All events sorted by (time, track, kind).
    pub events: Vec<Event>,
    pub seconds_per_beat: f64,
    /// Length of the arrangement, excluding release tails.
    pub total_seconds: f64,
    pub steps_per_bar: u32,
}

impl EventList {
    /// Events that belong to one track, in order.
    pub fn for_track(&self, track: usize) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.track == track)
    }

    pub fn note_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count()
    }
}

/// A single scheduled event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// When this event fires, in seconds from the start.
    pub time: f64,
    /// Index into `Plan::tracks`.
    pub track: usize,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Play a note.
    Note {
        pitch: u8,
        /// Normalized velocity [0, 1].
        velocity: f64,
        /// How long the note is held, in seconds.
        duration: f64,
    },
    /// Set a continuous track parameter to `value` in [0, 1].
    Automation {
        parameter: AutomationTarget,
        value: f64,
    },
}

impl EventKind {
    /// Tie-break rank at equal time and track: notes first.
    fn rank(&self) -> u8 {
        match self {
            EventKind::Note { .. } => 0,
            EventKind::Automation { .. } => 1,
        }
    }
}

// ── Scheduler ───────────────────────────────────────────────

const PAD_VELOCITY: f64 = 0.6;
const BASS_VELOCITY: f64 = 0.8;
const ARP_VELOCITY: f64 = 0.75;

struct ScheduleCtx<'a> {
    plan: &'a Plan,
    events: Vec<Event>,
    step_seconds: f64,
    steps_per_bar: u32,
    total_steps: u32,
}

impl ScheduleCtx<'_> {
    fn note(&mut self, track: usize, step_time: f64, pitch: u8, velocity: f64, duration: f64) {
        self.events.push(Event {
            time: step_time,
            track,
            kind: EventKind::Note {
                pitch,
                velocity,
                duration,
            },
        });
    }
}

/// Expand `plan` into its time-ordered event list.
pub fn schedule(plan: &Plan) -> Result<EventList> {
    let mut ctx = ScheduleCtx {
        plan,
        events: Vec::new(),
        step_seconds: plan.seconds_per_step(),
        steps_per_bar: plan.steps_per_bar(),
        total_steps: plan.total_steps(),
    };

    if let Some(drum_track) = plan.drum_track() {
        for lane in &plan.drums {
            schedule_drum_lane(&mut ctx, drum_track, lane)?;
        }
    }

    for (index, track) in plan.tracks.iter().enumerate() {
        if !track.events.is_empty() {
            schedule_explicit(&mut ctx, index, track)?;
        } else if track.instrument != InstrumentKind::Drums {
            if let Some(arp) = track.arp.or(plan.arp_rules) {
                schedule_harmony(&mut ctx, index, track, &arp)?;
            }
        }
    }

    schedule_automation(&mut ctx)?;

    let mut events = ctx.events;
    sort_events(&mut events);

    if let Some(h) = plan.humanize {
        if h.timing_ms > 0.0 || h.velocity > 0.0 {
            humanize(&mut events, plan.seed, h.timing_ms / 1000.0, h.velocity);
            sort_events(&mut events);
        }
    }

    tracing::debug!(
        events = events.len(),
        tracks = plan.tracks.len(),
        "scheduled plan"
    );

    Ok(EventList {
        events,
        seconds_per_beat: plan.seconds_per_beat(),
        total_seconds: plan.total_seconds(),
        steps_per_bar: ctx.steps_per_bar,
    })
}

fn sort_events(events: &mut [Event]) {
    // Stable: chord tones generated together keep their order.
    events.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.track.cmp(&b.track))
            .then(a.kind.rank().cmp(&b.kind.rank()))
    });
}

fn humanize(events: &mut [Event], seed: u64, timing_s: f64, velocity_amount: f64) {
    for (index, event) in events.iter_mut().enumerate() {
        if let EventKind::Note { velocity, .. } = &mut event.kind {
            let (dt, dv) = humanize_offsets(seed, index as u64, timing_s, velocity_amount);
            event.time = (event.time + dt).max(0.0);
            *velocity = (*velocity + dv).clamp(0.0, 1.0);
        }
    }
}

/// Grid steps of the whole song on which `lane` hits.
fn lane_hits(ctx: &ScheduleCtx, lane: &DrumLane) -> Result<Vec<u32>> {
    let name = format!("drums.{}", lane.voice);
    let pattern = match &lane.pattern {
        DrumPattern::Steps(steps) => {
            let len = steps.len() as u32;
            let fits_bar = len > 0 && ctx.steps_per_bar % len == 0;
            let whole_bars = len > 0 && len % ctx.steps_per_bar == 0 && len <= ctx.total_steps;
            if !(fits_bar || whole_bars) {
                return Err(RenderError::scheduling(
                    name,
                    len as usize,
                    format!(
                        "lane has {len} steps; it must divide a {}-step bar or span whole bars within {} steps",
                        ctx.steps_per_bar, ctx.total_steps
                    ),
                ));
            }
            steps.clone()
        }
        DrumPattern::Euclid {
            pulses,
            steps,
            rotation,
        } => euclidean(*pulses, *steps, *rotation).ok_or_else(|| {
            RenderError::scheduling(
                name,
                0,
                format!("cannot place {pulses} pulses on {steps} steps"),
            )
        })?,
    };

    let len = pattern.len() as u32;
    Ok((0..ctx.total_steps)
        .filter(|step| pattern[(step % len) as usize])
        .collect())
}

fn schedule_drum_lane(ctx: &mut ScheduleCtx, track: usize, lane: &DrumLane) -> Result<()> {
    let hits = lane_hits(ctx, lane)?;
    let voice = lane.voice;
    let duration = voice.length_beats() * ctx.plan.seconds_per_beat();
    for step in hits {
        let time = step as f64 * ctx.step_seconds;
        ctx.note(track, time, voice.midi_note(), voice.velocity(), duration);
    }
    Ok(())
}

fn schedule_explicit(ctx: &mut ScheduleCtx, index: usize, track: &Track) -> Result<()> {
    let spb = ctx.plan.seconds_per_beat();
    let end = ctx.plan.total_seconds();
    for (i, note) in track.events.iter().enumerate() {
        let time = note.beat * spb;
        if time >= end {
            return Err(RenderError::scheduling(
                &track.name,
                i,
                format!("note at beat {} starts after the song ends", note.beat),
            ));
        }
        ctx.note(index, time, note.note as u8, note.velocity, note.beats * spb);
    }
    Ok(())
}

/// Scale-degree triad on `degree` (1-based) as MIDI offsets from the root.
fn triad(plan: &Plan, degree: u8) -> [i32; 3] {
    let base = degree as i32 - 1;
    [
        plan.scale.step_offset(base),
        plan.scale.step_offset(base + 2),
        plan.scale.step_offset(base + 4),
    ]
}

fn midi_pitch(track: &Track, index: usize, value: i32) -> Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|p| *p <= 127)
        .ok_or_else(|| {
            RenderError::scheduling(
                &track.name,
                index,
                format!("generated pitch {value} is outside the MIDI range"),
            )
        })
}

/// Order in which chord tones are visited.
fn arp_sequence(chord: &[i32; 3], arp: &ArpRules) -> Vec<i32> {
    let mut pool: Vec<i32> = (0..arp.range as i32)
        .flat_map(|octave| chord.iter().map(move |t| t + 12 * octave))
        .collect();
    match arp.direction {
        ArpDirection::Up => pool,
        ArpDirection::Down => {
            pool.reverse();
            pool
        }
        ArpDirection::UpDown => {
            if pool.len() > 2 {
                let back: Vec<i32> = pool[1..pool.len() - 1].iter().rev().copied().collect();
                pool.extend(back);
            }
            pool
        }
    }
}

fn schedule_harmony(ctx: &mut ScheduleCtx, index: usize, track: &Track, arp: &ArpRules) -> Result<()> {
    let plan = ctx.plan;
    let root = plan.root_midi as i32;
    let bar_seconds = ctx.steps_per_bar as f64 * ctx.step_seconds;
    let note_seconds = arp.rate as f64 * ctx.step_seconds * arp.gate;
    let mut emitted = 0usize;

    for bar in 0..plan.length_bars {
        let degree = plan.progression[bar as usize % plan.progression.len()];
        let chord = triad(plan, degree);
        let bar_start = (bar * ctx.steps_per_bar) as f64 * ctx.step_seconds;

        match track.instrument {
            InstrumentKind::Pad => {
                for tone in chord {
                    let pitch = midi_pitch(track, emitted, root + tone)?;
                    ctx.note(index, bar_start, pitch, PAD_VELOCITY, bar_seconds * arp.gate);
                    emitted += 1;
                }
            }
            InstrumentKind::Bass => {
                let pitch = midi_pitch(track, emitted, root + chord[0] - 24)?;
                for step in (0..ctx.steps_per_bar).step_by(arp.rate as usize) {
                    let time = bar_start + step as f64 * ctx.step_seconds;
                    ctx.note(index, time, pitch, BASS_VELOCITY, note_seconds);
                    emitted += 1;
                }
            }
            InstrumentKind::Lead | InstrumentKind::Pluck | InstrumentKind::Fx => {
                let lift = if track.instrument == InstrumentKind::Fx { 12 } else { 0 };
                let sequence = arp_sequence(&chord, arp);
                for (k, step) in (0..ctx.steps_per_bar).step_by(arp.rate as usize).enumerate() {
                    let tone = sequence[k % sequence.len()];
                    let pitch = midi_pitch(track, emitted, root + tone + lift)?;
                    let time = bar_start + step as f64 * ctx.step_seconds;
                    ctx.note(index, time, pitch, ARP_VELOCITY, note_seconds);
                    emitted += 1;
                }
            }
            InstrumentKind::Drums => {}
        }
    }
    Ok(())
}

fn schedule_automation(ctx: &mut ScheduleCtx) -> Result<()> {
    let plan = ctx.plan;
    for lane in &plan.automation {
        let track = &plan.tracks[lane.track];
        if lane.start_bar + lane.bars > plan.length_bars {
            return Err(RenderError::scheduling(
                &track.name,
                lane.start_bar as usize,
                format!(
                    "automation of {:?} over bars {}..{} runs past the song's {} bars",
                    lane.parameter,
                    lane.start_bar,
                    lane.start_bar + lane.bars,
                    plan.length_bars
                ),
            ));
        }
        let first_step = lane.start_bar * ctx.steps_per_bar;
        let points = (lane.bars * ctx.steps_per_bar) as usize;
        let curve = generate_curve(points, lane.curve, lane.start, lane.end);
        for (i, value) in curve.into_iter().enumerate() {
            ctx.events.push(Event {
                time: (first_step as f64 + i as f64) * ctx.step_seconds,
                track: lane.track,
                kind: EventKind::Automation {
                    parameter: lane.parameter,
                    value: value.clamp(0.0, 1.0),
                },
            });
        }
    }
    Ok(())
}
