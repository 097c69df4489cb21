//! # Tuner - terminal front end
//!
//! Runs the analysis loop on the default microphone (or a synthetic tone)
//! and prints every confirmed note change with a small cents gauge.
//!
//! ## Architecture
//! - **Main Thread**: waits on tuner events, the stop key and the optional deadline
//! - **Analysis Thread**: owned by `tuner_core::AnalysisLoop`
//! - **Input Thread**: reports when Enter is pressed

mod cli;
mod display;

use anyhow::{bail, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tuner_core::{
    note_table, AnalysisLoop, CaptureSource, CpalCapture, SyntheticCapture, TunerConfig,
    TunerEvent,
};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    if cli.notes {
        for note in note_table() {
            println!("{:<4} {:>9.2} Hz", note.name(), note.frequency);
        }
        return Ok(());
    }

    let config = cli.resolve_config()?;
    if let Some(path) = &cli.save_config {
        config.save(path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let duration = match cli.duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => bail!("--duration must be a positive number of seconds, got {secs}"),
        None => None,
    };

    match cli.simulate {
        Some(frequency) => {
            log::info!("Simulating a {frequency} Hz tone");
            run(SyntheticCapture::new(frequency, config.sample_rate), config, duration)
        }
        None => {
            let capture = CpalCapture::new(config.sample_rate);
            run(capture, config, duration)
        }
    }
}

/// Runs one tuner session until Enter is pressed, the deadline passes or
/// the session fails.
fn run<C>(capture: C, config: TunerConfig, duration: Option<Duration>) -> Result<()>
where
    C: CaptureSource + Send + Sync + 'static,
{
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let mut tuner = AnalysisLoop::from_config(capture, Arc::new(events_tx), config);
    let config = tuner.config();
    log::info!(
        "Estimator {:?}, clarity above {}, window of {} frames",
        config.estimator,
        config.confidence_threshold,
        config.smoothing_window
    );

    // The error itself also arrives as an event and is reported below.
    if tuner.start().is_err() {
        return drain_error(&events_rx);
    }

    println!("Listening... press Enter to stop.");
    let stop_rx = spawn_stdin_watcher();
    let deadline = duration.map_or_else(crossbeam_channel::never, crossbeam_channel::after);

    let outcome = loop {
        crossbeam_channel::select! {
            recv(events_rx) -> event => match event {
                Ok(TunerEvent::NoteChanged(change)) => {
                    println!("{}", display::format_change(&change.note, change.cents));
                }
                Ok(TunerEvent::Error(message)) => break Err(anyhow::anyhow!(message)),
                Err(_) => break Ok(()),
            },
            recv(stop_rx) -> _ => break Ok(()),
            recv(deadline) -> _ => break Ok(()),
        }
    };

    tuner.stop();
    outcome
}

fn drain_error(events_rx: &Receiver<TunerEvent>) -> Result<()> {
    match events_rx.try_recv() {
        Ok(TunerEvent::Error(message)) => bail!(message),
        _ => bail!("Tuner failed to start"),
    }
}

/// Signals once a line is read from stdin.
fn spawn_stdin_watcher() -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(n) if n > 0 => {
                let _ = tx.send(());
            }
            // No interactive input: keep the sender alive and rely on the
            // deadline or a session failure to stop.
            _ => loop {
                std::thread::park();
            },
        }
    });
    rx
}
