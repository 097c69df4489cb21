use std::path::PathBuf;

use clap::Parser;
use tuner_core::{EstimatorKind, TunerConfig};

/// Chromatic tuner: listens to the default microphone and prints the note being played.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file. Missing fields use the built-in defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Minimum clarity (exclusive) for a frame to count.
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Number of frames in the majority vote window.
    #[arg(long)]
    pub window: Option<usize>,

    /// Pitch estimator: "mcleod" or "yin".
    #[arg(long)]
    pub estimator: Option<EstimatorKind>,

    /// Use a synthetic sine tone at this frequency (Hz) instead of the microphone.
    #[arg(long, value_name = "HZ")]
    pub simulate: Option<f32>,

    /// Stop automatically after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Print the reference note table and exit.
    #[arg(long, default_value_t = false)]
    pub notes: bool,

    /// Write the effective configuration to this file and exit.
    #[arg(long, value_name = "PATH")]
    pub save_config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    /// Builds the effective configuration: file (or defaults), then flags.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the result is invalid.
    pub fn resolve_config(&self) -> anyhow::Result<TunerConfig> {
        let mut config = match &self.config {
            Some(path) => TunerConfig::load(path)?,
            None => TunerConfig::default(),
        };
        if let Some(threshold) = self.threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(window) = self.window {
            config.smoothing_window = window;
        }
        if let Some(estimator) = self.estimator {
            config.estimator = estimator;
        }
        config.validate()?;
        Ok(config)
    }
}
