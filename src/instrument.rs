//! Note and timbre request types.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AudioError;

/// Instrument family a note is voiced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentFamily {
    Trumpet,
    Trombone,
    Other,
}

impl InstrumentFamily {
    /// Parse a family name. Anything unrecognised is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trumpet" => InstrumentFamily::Trumpet,
            "trombone" => InstrumentFamily::Trombone,
            _ => InstrumentFamily::Other,
        }
    }
}

/// Named timbre configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Default,
    Bright,
    Mellow,
    Brilliant,
    Warm,
    Piano,
    Synth,
}

impl Style {
    pub const ALL: [Style; 7] = [
        Style::Default,
        Style::Bright,
        Style::Mellow,
        Style::Brilliant,
        Style::Warm,
        Style::Piano,
        Style::Synth,
    ];

    /// Strict parse; unknown names are an error.
    pub fn parse(s: &str) -> Result<Self, AudioError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Style::Default),
            "bright" => Ok(Style::Bright),
            "mellow" => Ok(Style::Mellow),
            "brilliant" => Ok(Style::Brilliant),
            "warm" => Ok(Style::Warm),
            "piano" => Ok(Style::Piano),
            "synth" => Ok(Style::Synth),
            _ => Err(AudioError::UnknownStyle(s.to_string())),
        }
    }

    /// Parse, falling back to `Default` for unknown names.
    pub fn parse_or_default(s: &str) -> Self {
        Style::parse(s).unwrap_or_else(|e| {
            warn!(%e, "falling back to default timbre");
            Style::Default
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Style::Default => "default",
            Style::Bright => "bright",
            Style::Mellow => "mellow",
            Style::Brilliant => "brilliant",
            Style::Warm => "warm",
            Style::Piano => "piano",
            Style::Synth => "synth",
        }
    }
}

/// Requested voice colour for one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimbreRequest {
    pub family: InstrumentFamily,
    pub style: Style,
}

/// A single note to be played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRequest {
    /// MIDI-numbered pitch identity (69 = A4).
    pub pitch: i32,
    /// Key of the instrument the pitch was chosen for (e.g. "Bb").
    #[serde(default)]
    pub pitch_context: String,
    /// Seconds; must be positive.
    pub duration: f64,
    /// Peak amplitude; clamped into [0, 1].
    pub amplitude: f64,
    pub timbre: TimbreRequest,
}

impl NoteRequest {
    pub fn new(
        family: InstrumentFamily,
        pitch: i32,
        pitch_context: &str,
        duration: f64,
        amplitude: f64,
        style: Style,
    ) -> Self {
        NoteRequest {
            pitch,
            pitch_context: pitch_context.to_string(),
            duration,
            amplitude,
            timbre: TimbreRequest { family, style },
        }
    }

    /// Reject non-positive durations and clamp amplitude into [0, 1].
    pub fn validated(mut self) -> Result<Self, AudioError> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(AudioError::InvalidNoteRequest(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        self.amplitude = if self.amplitude.is_nan() {
            0.0
        } else {
            self.amplitude.clamp(0.0, 1.0)
        };
        Ok(self)
    }
}
