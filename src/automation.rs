//! Automation curve shapes.

use serde::{Deserialize, Serialize};

/// Steepness of the exponential/logarithmic shapes.
const CURVE_K: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveShape {
    #[default]
    Linear,
    /// Slow start, fast finish.
    Exponential,
    /// Fast start, slow finish.
    Logarithmic,
    SCurve,
    /// Holds `start` for the first half, then jumps to `end`.
    Step,
}

impl CurveShape {
    /// Map normalized position `t` in [0, 1] to normalized progress in [0, 1].
    pub fn shape(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            CurveShape::Linear => t,
            CurveShape::Exponential => (CURVE_K * t).exp_m1() / CURVE_K.exp_m1(),
            CurveShape::Logarithmic => 1.0 - (CURVE_K * (1.0 - t)).exp_m1() / CURVE_K.exp_m1(),
            CurveShape::SCurve => t * t * (3.0 - 2.0 * t),
            CurveShape::Step => {
                if t < 0.5 {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

/// Sample `len` points from `start` to `end`, both ends included.
/// A single point is just `end`.
pub fn generate_curve(len: usize, shape: CurveShape, start: f64, end: f64) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![end],
        _ => {
            let last = (len - 1) as f64;
            (0..len)
                .map(|i| start + (end - start) * shape.shape(i as f64 / last))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: [CurveShape; 5] = [
        CurveShape::Linear,
        CurveShape::Exponential,
        CurveShape::Logarithmic,
        CurveShape::SCurve,
        CurveShape::Step,
    ];

    #[test]
    fn endpoints_are_exact() {
        for shape in SHAPES {
            let c = generate_curve(17, shape, 0.2, 0.9);
            assert!((c[0] - 0.2).abs() < 1e-12, "{shape:?} start {}", c[0]);
            assert!((c[16] - 0.9).abs() < 1e-12, "{shape:?} end {}", c[16]);
        }
    }

    #[test]
    fn shapes_are_monotonic() {
        for shape in SHAPES {
            let c = generate_curve(64, shape, 0.0, 1.0);
            for w in c.windows(2) {
                assert!(w[1] >= w[0], "{shape:?} not monotonic: {} -> {}", w[0], w[1]);
            }
        }
    }

    #[test]
    fn exponential_and_log_bend_opposite_ways() {
        let mid_exp = CurveShape::Exponential.shape(0.5);
        let mid_log = CurveShape::Logarithmic.shape(0.5);
        assert!(mid_exp < 0.5);
        assert!(mid_log > 0.5);
    }

    #[test]
    fn degenerate_lengths() {
        assert!(generate_curve(0, CurveShape::Linear, 0.0, 1.0).is_empty());
        assert_eq!(generate_curve(1, CurveShape::Linear, 0.0, 0.7), vec![0.7]);
    }
}
