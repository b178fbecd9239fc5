//! Engine configuration.
//!
//! All timing values are in seconds. Every field has a default, so a JSON
//! document only needs to carry the values it overrides.

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Amplitude envelope shape applied to every note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvelopeConfig {
    /// Linear fade-in from silence to peak.
    pub attack: f64,
    /// Time (from note start) at which the gentle decay reaches sustain.
    pub decay_point: f64,
    /// Sustain level as a fraction of peak amplitude.
    pub sustain_ratio: f64,
    /// Linear fade-out window ending exactly at the note's duration.
    pub release: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay_point: 0.1,
            sustain_ratio: 0.8,
            release: 0.05,
        }
    }
}

/// Voice teardown timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Forced fade applied to superseded voices.
    pub termination_fade: f64,
    /// Delay between a forced fade starting and node disposal.
    pub disposal_delay: f64,
    /// Extra time tone sources keep running after the envelope reaches zero.
    pub stop_guard: f64,
    /// Minimum lifetime given to auxiliary tone sources built by a timbre.
    pub aux_stop_ceiling: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            termination_fade: 0.05,
            disposal_delay: 0.06,
            stop_guard: 0.05,
            aux_stop_ceiling: 2.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Scalar attenuation applied to all voices before output.
    pub master_gain: f64,
    pub envelope: EnvelopeConfig,
    pub lifecycle: LifecycleConfig,
    /// Level at or below which a voice being cut off is silenced at once
    /// instead of faded.
    pub silence_threshold: f64,
    /// Seed for synthetic impulse responses.
    pub noise_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            master_gain: 0.7,
            envelope: EnvelopeConfig::default(),
            lifecycle: LifecycleConfig::default(),
            silence_threshold: 1e-4,
            noise_seed: 0x5EED_B4A5,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, AudioError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.validated())
    }

    /// Clamp every value into a range the engine can work with.
    pub fn validated(mut self) -> Self {
        if !self.sample_rate.is_finite() || self.sample_rate < 8000.0 {
            self.sample_rate = 44100.0;
        }
        self.sample_rate = self.sample_rate.min(192_000.0);
        self.master_gain = clamp_or(self.master_gain, 0.0, 1.0, 0.7);

        let env = &mut self.envelope;
        env.attack = clamp_or(env.attack, 0.001, 0.5, 0.01);
        env.decay_point = clamp_or(env.decay_point, env.attack, 5.0, 0.1).max(env.attack);
        env.sustain_ratio = clamp_or(env.sustain_ratio, 0.0, 1.0, 0.8);
        env.release = clamp_or(env.release, 0.001, 2.0, 0.05);

        let life = &mut self.lifecycle;
        life.termination_fade = clamp_or(life.termination_fade, 0.005, 0.5, 0.05);
        life.disposal_delay =
            clamp_or(life.disposal_delay, 0.0, 1.0, 0.06).max(life.termination_fade);
        life.stop_guard = clamp_or(life.stop_guard, 0.0, 1.0, 0.05);
        life.aux_stop_ceiling = clamp_or(life.aux_stop_ceiling, 0.1, 60.0, 2.0);

        self.silence_threshold = clamp_or(self.silence_threshold, 0.0, 0.01, 1e-4);
        self
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
