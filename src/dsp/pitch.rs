//! Pitch identity → frequency.

/// Reference pitch for identity 69 (A4).
pub const REFERENCE_HZ: f64 = 440.0;
/// Identity of the reference pitch.
pub const REFERENCE_IDENTITY: i32 = 69;

/// Equal-tempered frequency of a MIDI-numbered pitch identity.
///
/// Formula: `440 * 2^((n - 69) / 12)`. Total over all integers.
pub fn frequency_of(identity: i32) -> f64 {
    frequency_with_tuning(identity, REFERENCE_HZ)
}

/// Like [`frequency_of`] with a custom frequency for A4.
pub fn frequency_with_tuning(identity: i32, tuning_pitch: f64) -> f64 {
    tuning_pitch * (2.0_f64).powf((identity as f64 - REFERENCE_IDENTITY as f64) / 12.0)
}

/// Parse a note name (e.g. "C4", "F#3", "Bb2") into a pitch identity.
///
/// Octave numbering follows C4 = 60.
pub fn note_to_identity(note: &str) -> Option<i32> {
    let bytes = note.as_bytes();
    let first = *bytes.first()?;

    let base_semitone = match first.to_ascii_uppercase() {
        b'C' => 0,
        b'D' => 2,
        b'E' => 4,
        b'F' => 5,
        b'G' => 7,
        b'A' => 9,
        b'B' => 11,
        _ => return None,
    };

    let mut idx = 1;
    let mut semitone = base_semitone;
    match bytes.get(idx) {
        Some(b'#') => {
            semitone += 1;
            idx += 1;
        }
        Some(b'b') => {
            semitone -= 1;
            idx += 1;
        }
        _ => {}
    }

    let octave: i32 = note[idx..].parse().ok()?;
    octave.checked_add(1)?.checked_mul(12)?.checked_add(semitone)
}

/// Frequency of a named note, if it parses.
pub fn frequency_of_name(note: &str) -> Option<f64> {
    note_to_identity(note).map(frequency_of)
}
