// tuner-core/src/lib.rs

//! The core logic for the chromatic tuner.
//! This crate turns a stream of audio frames into stable note names and
//! tuning offsets: pitch estimation, nearest-note matching, cents deviation
//! and majority-vote debouncing. It is completely headless
//! and contains no display code.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod fft;
pub mod notes;
pub mod pitch;
pub mod smoothing;
pub mod tuning;

pub use analysis::{AnalysisLoop, LoopState, NoteChange, Session, TunerEvent, TunerListener};
pub use audio::{CaptureEvent, CaptureSource, CaptureStream, CpalCapture, SyntheticCapture};
pub use config::{EstimatorKind, TunerConfig};
pub use error::{Result, TunerError};
pub use notes::{note_table, NoteEntry, PitchClass};
pub use pitch::{ConfiguredEstimator, PitchEstimate, PitchEstimator};
pub use smoothing::SmoothingBuffer;
pub use tuning::Classification;
