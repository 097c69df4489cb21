//! # Error Module
//!
//! Error kinds produced by the tuner core. Capture failures are fatal to the
//! session that hit them; invalid frequencies are dropped before they reach
//! the smoothing stage and never surface to the consumer.

use thiserror::Error;

/// Errors originating from the tuner core.
#[derive(Error, Debug)]
pub enum TunerError {
    /// No input device, permission denied, or the device rejected the stream config.
    #[error("Audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The capture stream failed after the session was running.
    #[error("Audio capture interrupted: {0}")]
    CaptureInterrupted(String),

    /// Non-positive or non-finite frequency handed to the note matcher.
    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// The pitch estimator could not be prepared for the session.
    #[error("Pitch estimator unavailable: {0}")]
    OracleUnavailable(String),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration format error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TunerError>;
