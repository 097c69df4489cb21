//! # Configuration Module
//!
//! Runtime settings for an analysis session. Settings are stored as JSON so a
//! tuned configuration can be saved next to the binary and reloaded later.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, TunerError};

/// Frames whose clarity is not strictly above this value are ignored.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.9;

/// Number of recent classifications considered by the majority vote.
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Samples per analysis frame (~46ms at 44.1kHz).
pub const DEFAULT_FRAME_SIZE: usize = 2048;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Minimum RMS level for pitch detection. Quieter frames are treated as silence.
pub const DEFAULT_AMPLITUDE_THRESHOLD: f32 = 0.01;

/// Which pitch estimation algorithm a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// McLeod Pitch Method (normalized square difference function).
    #[default]
    McLeod,
    /// YIN cumulative mean normalized difference.
    Yin,
}

impl std::str::FromStr for EstimatorKind {
    type Err = TunerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mcleod" | "mpm" => Ok(EstimatorKind::McLeod),
            "yin" => Ok(EstimatorKind::Yin),
            other => Err(TunerError::InvalidConfig(format!(
                "unknown estimator '{other}' (expected 'mcleod' or 'yin')"
            ))),
        }
    }
}

/// Settings for the analysis loop and its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub confidence_threshold: f32,
    pub smoothing_window: usize,
    pub frame_size: usize,
    /// Requested capture rate. The device may deliver a different one.
    pub sample_rate: u32,
    pub amplitude_threshold: f32,
    pub estimator: EstimatorKind,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            frame_size: DEFAULT_FRAME_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            amplitude_threshold: DEFAULT_AMPLITUDE_THRESHOLD,
            estimator: EstimatorKind::default(),
        }
    }
}

impl TunerConfig {
    /// Checks that every value is in a usable range.
    ///
    /// # Errors
    /// Returns `TunerError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.confidence_threshold) {
            return Err(TunerError::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1), got {}",
                self.confidence_threshold
            )));
        }
        if self.smoothing_window == 0 {
            return Err(TunerError::InvalidConfig(
                "smoothing_window must be at least 1".into(),
            ));
        }
        if self.frame_size < 64 {
            return Err(TunerError::InvalidConfig(format!(
                "frame_size must be at least 64 samples, got {}",
                self.frame_size
            )));
        }
        if self.sample_rate == 0 {
            return Err(TunerError::InvalidConfig("sample_rate must be positive".into()));
        }
        if !self.amplitude_threshold.is_finite() || self.amplitude_threshold < 0.0 {
            return Err(TunerError::InvalidConfig(format!(
                "amplitude_threshold must be a non-negative number, got {}",
                self.amplitude_threshold
            )));
        }
        Ok(())
    }

    /// Loads and validates a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: TunerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TunerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.smoothing_window, 5);
        assert_eq!(config.confidence_threshold, 0.9);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: TunerConfig =
            serde_json::from_str(r#"{ "confidence_threshold": 0.8, "estimator": "yin" }"#).unwrap();
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.estimator, EstimatorKind::Yin);
        assert_eq!(config.frame_size, DEFAULT_FRAME_SIZE);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = TunerConfig::default();
        config.smoothing_window = 0;
        assert!(matches!(config.validate(), Err(TunerError::InvalidConfig(_))));

        let mut config = TunerConfig::default();
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("tuner-config-{}.json", std::process::id()));
        let mut config = TunerConfig::default();
        config.smoothing_window = 7;
        config.save(&path).unwrap();
        let loaded = TunerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn parses_estimator_names() {
        assert_eq!("McLeod".parse::<EstimatorKind>().unwrap(), EstimatorKind::McLeod);
        assert_eq!("yin".parse::<EstimatorKind>().unwrap(), EstimatorKind::Yin);
        assert!("fft".parse::<EstimatorKind>().is_err());
    }
}
