//! Waveshaping — nonlinear transfer curves.
//!
//! A curve of `n` points maps the input range [-1, 1]; inputs are looked up
//! with linear interpolation and clamped at the ends, as a WebAudio
//! WaveShaperNode does.

use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct WaveShaper {
    curve: Vec<f32>,
}

impl WaveShaper {
    pub fn new(curve: Vec<f32>) -> Self {
        WaveShaper { curve }
    }

    /// Saturating `tanh(k·x) / k` curve.
    pub fn saturating(amount: f64, points: usize) -> Self {
        Self::new(build_curve(points, |x| (amount * x).tanh() / amount))
    }

    /// Soft distortion `(π + k)·x / (π + k·|x|)`.
    pub fn distortion(amount: f64, points: usize) -> Self {
        Self::new(build_curve(points, |x| (PI + amount) * x / (PI + amount * x.abs())))
    }

    #[inline]
    pub fn process(&self, input: f64) -> f64 {
        let n = self.curve.len();
        match n {
            0 => input,
            1 => self.curve[0] as f64,
            _ => {
                let pos = ((input.clamp(-1.0, 1.0) + 1.0) / 2.0) * (n - 1) as f64;
                let idx = (pos.floor() as usize).min(n - 2);
                let frac = pos - idx as f64;
                let a = self.curve[idx] as f64;
                let b = self.curve[idx + 1] as f64;
                a + (b - a) * frac
            }
        }
    }
}

/// Sample `f` at `points` evenly spaced inputs across [-1, 1].
fn build_curve(points: usize, f: impl Fn(f64) -> f64) -> Vec<f32> {
    let points = points.max(2);
    (0..points)
        .map(|i| {
            let x = (i as f64 * 2.0) / (points - 1) as f64 - 1.0;
            f(x) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_curve_is_odd_and_bounded() {
        let shaper = WaveShaper::saturating(5.0, 44100);
        assert!(shaper.process(0.0).abs() < 1e-4);
        let pos = shaper.process(0.5);
        let neg = shaper.process(-0.5);
        assert!((pos + neg).abs() < 1e-4);
        assert!(shaper.process(1.0) <= 0.2 + 1e-6);
    }

    #[test]
    fn distortion_keeps_unit_endpoints() {
        let shaper = WaveShaper::distortion(3.0, 1024);
        assert!((shaper.process(1.0) - 1.0).abs() < 1e-6);
        assert!((shaper.process(-1.0) + 1.0).abs() < 1e-6);
        // Out-of-range input clamps to the curve ends.
        assert!((shaper.process(4.0) - 1.0).abs() < 1e-6);
        // Pushes small signals up.
        assert!(shaper.process(0.2) > 0.2);
    }

    #[test]
    fn empty_curve_passes_through() {
        let shaper = WaveShaper::new(Vec::new());
        assert_eq!(shaper.process(0.3), 0.3);
    }
}
