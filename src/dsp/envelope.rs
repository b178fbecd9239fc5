//! Envelope scheduling — programs attack / sustain / release onto a gain
//! parameter's timeline.
//!
//! The curve always ends at exactly zero at `start + duration`, so a forced
//! stop that fires late still lands on silence.

use crate::config::EnvelopeConfig;

use super::param::AudioParam;

/// Breakpoints of a scheduled envelope, in absolute seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeShape {
    pub start: f64,
    pub attack_end: f64,
    pub decay_end: f64,
    pub release_start: f64,
    pub end: f64,
    pub peak: f64,
    pub sustain: f64,
}

impl EnvelopeShape {
    /// Fit the configured envelope into `duration` seconds.
    ///
    /// Short notes cap the attack at a quarter and the release at half of
    /// the duration; the decay point never passes the release start.
    pub fn fit(config: &EnvelopeConfig, start: f64, duration: f64, peak: f64) -> Self {
        let attack = config.attack.min(duration / 4.0);
        let release = config.release.min(duration / 2.0);
        let end = start + duration;
        let attack_end = start + attack;
        let release_start = (end - release).max(attack_end);
        let decay_end = (start + config.decay_point).clamp(attack_end, release_start);
        let sustain = if decay_end > attack_end {
            peak * config.sustain_ratio
        } else {
            peak
        };

        EnvelopeShape {
            start,
            attack_end,
            decay_end,
            release_start,
            end,
            peak,
            sustain,
        }
    }
}

/// Clear `param` and program the envelope for a note starting at `start`.
pub fn apply_envelope(
    param: &mut AudioParam,
    config: &EnvelopeConfig,
    start: f64,
    duration: f64,
    peak: f64,
) -> EnvelopeShape {
    let shape = EnvelopeShape::fit(config, start, duration, peak);

    param.cancel_scheduled_values(0.0);
    param.set_value(0.0);

    // Attack
    param.set_value_at_time(0.0, shape.start);
    param.linear_ramp_to_value_at_time(shape.peak, shape.attack_end);
    // Gentle decay, then hold
    if shape.decay_end > shape.attack_end {
        param.linear_ramp_to_value_at_time(shape.sustain, shape.decay_end);
    }
    param.set_value_at_time(shape.sustain, shape.release_start);
    // Release
    param.linear_ramp_to_value_at_time(0.0, shape.end);

    shape
}
