//! Step-pattern helpers: Euclidean rhythms and humanization jitter.

use rand::Rng;

use crate::rng;

/// Distribute `pulses` onsets as evenly as possible over `steps` using the
/// bucket accumulator, then rotate right by `rotation` steps.
///
/// Returns `None` when `steps == 0` or `pulses > steps`.
pub fn euclidean(pulses: u32, steps: u32, rotation: u32) -> Option<Vec<bool>> {
    if steps == 0 || pulses > steps {
        return None;
    }
    let steps = steps as usize;
    let pulses = pulses as usize;
    if pulses == 0 {
        return Some(vec![false; steps]);
    }

    // Starting the bucket at `steps - pulses` puts the first onset on step 0.
    let mut bucket = steps - pulses;
    let mut pattern = Vec::with_capacity(steps);
    for _ in 0..steps {
        bucket += pulses;
        if bucket >= steps {
            bucket -= steps;
            pattern.push(true);
        } else {
            pattern.push(false);
        }
    }

    let shift = rotation as usize % steps;
    pattern.rotate_right(shift);
    Some(pattern)
}

/// Timing (seconds) and velocity offsets for the event at `index`.
///
/// Each offset is `(u1 - u2) * amount`, a triangular distribution bounded
/// by `amount` in either direction. The stream depends only on the seed and
/// the index, never on how many events were humanized before.
pub fn humanize_offsets(seed: u64, index: u64, timing_s: f64, velocity: f64) -> (f64, f64) {
    let mut rng = rng::stream(seed, "humanize", index);
    let mut draw = |amount: f64| {
        let u1: f64 = rng.random();
        let u2: f64 = rng.random();
        (u1 - u2) * amount
    };
    let dt = draw(timing_s);
    let dv = draw(velocity);
    (dt, dv)
}
