//! # Musical Tuning Module
//!
//! Maps a detected frequency onto the nearest note of the reference table
//! and measures how far off it is in cents.
//!
//! ## Features
//! - Nearest-note search over the equal temperament table
//! - Cent deviation calculations for tuning accuracy
//! - Validated classification of raw oracle frequencies

use crate::error::{Result, TunerError};
use crate::notes::{note_table, NoteEntry};

/// The note a frequency was matched to, and its deviation from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub note: &'static NoteEntry,
    /// Signed deviation in cents (positive = sharp, negative = flat).
    pub cents: i32,
}

/// Finds the closest musical note to a given frequency.
///
/// This function searches through the whole reference table. If two notes
/// are equally distant, the one that comes first in the table (lower octave,
/// then lower pitch class) wins.
///
/// # Arguments
/// * `frequency` - Input frequency in Hz, assumed positive
pub fn find_closest(frequency: f64) -> &'static NoteEntry {
    find_closest_in(note_table(), frequency)
        .expect("the reference table is never empty")
}

/// Same as [`find_closest`] over an arbitrary table.
///
/// Returns `None` only when `table` is empty.
pub fn find_closest_in(table: &[NoteEntry], frequency: f64) -> Option<&NoteEntry> {
    // min_by keeps the first of several equal minima.
    table.iter().min_by(|a, b| {
        let diff_a = (a.frequency - frequency).abs();
        let diff_b = (b.frequency - frequency).abs();
        diff_a.total_cmp(&diff_b)
    })
}

/// Calculates the deviation from a reference note in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// The result is rounded to the nearest cent and is not clamped, so an
/// octave error shows up as a deviation around ±1200.
pub fn cents_deviation(frequency: f64, reference: &NoteEntry) -> i32 {
    (1200.0 * (frequency / reference.frequency).log2()).round() as i32
}

/// Matches a frequency to its nearest note and computes the deviation.
///
/// # Errors
/// Returns `TunerError::InvalidFrequency` for non-positive or non-finite input.
pub fn classify(frequency: f64) -> Result<Classification> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(TunerError::InvalidFrequency(frequency));
    }
    let note = find_closest(frequency);
    Ok(Classification {
        note,
        cents: cents_deviation(frequency, note),
    })
}
