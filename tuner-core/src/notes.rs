//! # Note Table Module
//!
//! Reference frequencies for 12-tone equal temperament with A4 = 440 Hz,
//! covering octaves 0 through 8 (C0 to B8, 108 notes).
//!
//! The table is generated once, on first use, and shared read-only for the
//! rest of the process.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// Reference pitch for A4 in Hz.
pub const A4_FREQUENCY: f64 = 440.0;

pub const LOWEST_OCTAVE: i32 = 0;
pub const HIGHEST_OCTAVE: i32 = 8;

/// Number of entries in the generated table.
pub const TABLE_LEN: usize = 12 * (HIGHEST_OCTAVE - LOWEST_OCTAVE + 1) as usize;

/// One of the twelve pitch classes, in ascending order from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// All pitch classes in table order (C = 0 ... B = 11).
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Position within the octave, C = 0.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single note of the reference table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEntry {
    pub pitch_class: PitchClass,
    pub octave: i32,
    /// Frequency in Hz, rounded to 2 decimal places.
    pub frequency: f64,
}

impl NoteEntry {
    /// Note name with octave, e.g. "C#4".
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

/// Generates the equal temperament table.
///
/// Entries are ordered by octave, then pitch class, so frequencies are
/// strictly increasing. For each note the semitone offset from A4 is
/// `n = index - 9 + (octave - 4) * 12` and the frequency is
/// `440 * 2^(n / 12)`, rounded to 2 decimals.
pub fn generate() -> Vec<NoteEntry> {
    let mut notes = Vec::with_capacity(TABLE_LEN);

    for octave in LOWEST_OCTAVE..=HIGHEST_OCTAVE {
        for pitch_class in PitchClass::ALL {
            let semitones = pitch_class.index() as i32 - 9 + (octave - 4) * 12;
            let frequency = A4_FREQUENCY * 2.0_f64.powf(semitones as f64 / 12.0);
            notes.push(NoteEntry {
                pitch_class,
                octave,
                frequency: round_to_cents_of_hz(frequency),
            });
        }
    }
    notes
}

fn round_to_cents_of_hz(frequency: f64) -> f64 {
    (frequency * 100.0).round() / 100.0
}

static NOTES: Lazy<Vec<NoteEntry>> = Lazy::new(generate);

/// Note name to table index, for lookups like "A4" or "C#3".
static NOTE_MAP: Lazy<BTreeMap<String, usize>> = Lazy::new(|| {
    NOTES
        .iter()
        .enumerate()
        .map(|(i, note)| (note.name(), i))
        .collect()
});

/// The shared reference table.
pub fn note_table() -> &'static [NoteEntry] {
    &NOTES
}

/// Looks up a table entry by its name, e.g. "A4".
pub fn find_by_name(name: &str) -> Option<&'static NoteEntry> {
    NOTE_MAP.get(name).map(|&i| &NOTES[i])
}
