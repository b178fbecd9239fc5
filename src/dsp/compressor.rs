//! Compressor — dynamics processing for percussive timbres.
//!
//! Feed-forward compressor with threshold, ratio, knee, attack and release
//! parameters matching the WebAudio DynamicsCompressorNode.

#[derive(Debug, Clone)]
pub struct Compressor {
    sample_rate: f64,

    /// Threshold in dB (typical: -50 to 0).
    pub threshold: f64,
    /// Compression ratio (e.g., 4.0 = 4:1 compression).
    pub ratio: f64,
    /// Knee width in dB (0 = hard knee).
    pub knee: f64,
    /// Attack time in seconds.
    pub attack: f64,
    /// Release time in seconds.
    pub release: f64,

    envelope: f64, // Current envelope level (linear)
}

impl Compressor {
    /// WebAudio defaults.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            threshold: -24.0,
            ratio: 12.0,
            knee: 30.0,
            attack: 0.003,
            release: 0.25,
            envelope: 0.0,
        }
    }

    pub fn with_params(
        sample_rate: f64,
        threshold: f64,
        knee: f64,
        ratio: f64,
        attack: f64,
        release: f64,
    ) -> Self {
        let mut c = Self::new(sample_rate);
        c.threshold = threshold.clamp(-100.0, 0.0);
        c.knee = knee.clamp(0.0, 40.0);
        c.ratio = ratio.clamp(1.0, 20.0);
        c.attack = attack.clamp(0.0001, 1.0);
        c.release = release.clamp(0.001, 1.0);
        c
    }

    #[inline]
    fn linear_to_db(linear: f64) -> f64 {
        if linear <= 0.0 {
            -120.0
        } else {
            20.0 * linear.log10()
        }
    }

    #[inline]
    fn db_to_linear(db: f64) -> f64 {
        10.0_f64.powf(db / 20.0)
    }

    /// Gain change in dB (≤ 0) for an input level in dB.
    #[inline]
    fn compute_gain(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        if self.knee <= 0.0 {
            if input_db <= self.threshold {
                0.0
            } else {
                (self.threshold - input_db) * slope
            }
        } else {
            let half_knee = self.knee / 2.0;
            let knee_start = self.threshold - half_knee;
            let knee_end = self.threshold + half_knee;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (self.threshold - input_db) * slope
            } else {
                // Quadratic interpolation across the knee.
                let x = input_db - knee_start;
                -slope * x * x / (2.0 * self.knee)
            }
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let level = input.abs();
        let coef = if level > self.envelope {
            (-1.0 / (self.attack * self.sample_rate)).exp()
        } else {
            (-1.0 / (self.release * self.sample_rate)).exp()
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;

        let gain_db = self.compute_gain(Self::linear_to_db(self.envelope));
        input * Self::db_to_linear(gain_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_below_threshold() {
        let mut comp = Compressor::with_params(44100.0, -20.0, 0.0, 4.0, 0.001, 0.1);
        for _ in 0..1000 {
            comp.process(0.05); // -26 dB
        }
        let out = comp.process(0.05);
        assert!((out - 0.05).abs() < 0.01, "Below threshold should pass through: got {out}");
    }

    #[test]
    fn reduces_loud_signals() {
        let mut comp = Compressor::with_params(44100.0, -12.0, 0.0, 4.0, 0.001, 0.1);
        for _ in 0..5000 {
            comp.process(1.0);
        }
        let out = comp.process(1.0);
        // 12 dB over at 4:1 → -9 dB ≈ 0.355
        assert!(out < 0.5 && out > 0.1, "Expected ~0.35, got {out}");
    }

    #[test]
    fn soft_knee_is_continuous() {
        let comp = Compressor::with_params(44100.0, -24.0, 30.0, 12.0, 0.003, 0.25);
        let below = comp.compute_gain(-39.0);
        let start = comp.compute_gain(-38.999);
        let end_inside = comp.compute_gain(-9.0001);
        let end_outside = comp.compute_gain(-9.0);
        assert_eq!(below, 0.0);
        assert!(start.abs() < 1e-6);
        assert!((end_inside - end_outside).abs() < 1e-3);
    }

    #[test]
    fn attack_then_release() {
        let mut comp = Compressor::with_params(44100.0, -20.0, 0.0, 10.0, 0.01, 0.05);
        let first = comp.process(1.0);
        for _ in 0..1000 {
            comp.process(1.0);
        }
        let compressed = comp.process(1.0);
        assert!(first > compressed);

        for _ in 0..20000 {
            comp.process(0.0);
        }
        let recovered = comp.process(1.0);
        assert!(recovered > compressed);
    }
}
