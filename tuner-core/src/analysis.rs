//! # Analysis Loop Module
//!
//! Drives the pipeline from captured frames to debounced note changes:
//!
//! frame → pitch estimator → confidence gate → nearest note + cents →
//! smoothing buffer → note change (only when the stable note changes)
//!
//! [`Session`] holds the state of one run and can be driven directly with
//! any iterator of frames. [`AnalysisLoop`] runs a session on a dedicated
//! thread fed by a [`CaptureSource`], with start/stop control.
//!
//! ## Architecture
//! - **Caller thread**: `start` waits for capture and estimator acquisition,
//!   `stop` cancels and joins
//! - **Analysis thread**: one per session; opens capture, processes frames
//!   strictly in arrival order, reports to the listener
//! - **Communication**: crossbeam channels for frames, readiness and shutdown

use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{CaptureEvent, CaptureSource};
use crate::config::TunerConfig;
use crate::error::{Result, TunerError};
use crate::pitch::{ConfiguredEstimator, PitchEstimate, PitchEstimator};
use crate::smoothing::SmoothingBuffer;
use crate::tuning;

/// A confirmed change of the stable note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteChange {
    /// Note name with octave, e.g. "E4".
    pub note: String,
    /// Deviation measured on the frame that confirmed the change.
    pub cents: i32,
}

/// Receives the output of a running analysis loop.
///
/// Callbacks run on the analysis thread and should return quickly.
pub trait TunerListener {
    /// Called only for debounced changes of the stable note.
    fn on_note_change(&self, note: &str, cents: i32);

    /// Called once when acquisition fails or a running session is interrupted.
    fn on_error(&self, message: &str);
}

/// Listener output as a message, for consumers that poll a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunerEvent {
    NoteChanged(NoteChange),
    Error(String),
}

impl TunerListener for Sender<TunerEvent> {
    fn on_note_change(&self, note: &str, cents: i32) {
        let change = NoteChange { note: note.to_owned(), cents };
        if self.send(TunerEvent::NoteChanged(change)).is_err() {
            log::warn!("Note change dropped: event receiver is gone");
        }
    }

    fn on_error(&self, message: &str) {
        if self.send(TunerEvent::Error(message.to_owned())).is_err() {
            log::warn!("Error dropped: event receiver is gone");
        }
    }
}

/// Returns the frequency of an estimate the pipeline should act on.
///
/// The clarity must be strictly above `threshold` and the frequency finite
/// and positive. Anything else is treated as if the frame never arrived.
pub fn passes_gate(estimate: &PitchEstimate, threshold: f32) -> Option<f64> {
    let frequency = estimate.frequency;
    (estimate.clarity > threshold && frequency.is_finite() && frequency > 0.0)
        .then_some(f64::from(frequency))
}

/// State of one analysis run: the estimator, the smoothing window and the
/// gate settings. Never shared between runs.
#[derive(Debug)]
pub struct Session<E> {
    estimator: E,
    buffer: SmoothingBuffer,
    confidence_threshold: f32,
    sample_rate: u32,
}

impl<E: PitchEstimator> Session<E> {
    pub fn new(estimator: E, config: &TunerConfig, sample_rate: u32) -> Self {
        Self {
            estimator,
            buffer: SmoothingBuffer::new(config.smoothing_window),
            confidence_threshold: config.confidence_threshold,
            sample_rate,
        }
    }

    /// Runs one frame through the estimator and the rest of the pipeline.
    pub fn process_frame(&mut self, frame: &[f32]) -> Option<NoteChange> {
        let estimate = self.estimator.estimate(frame, self.sample_rate);
        self.accept(estimate)
    }

    /// Runs an already computed estimate through the gate, the matcher and
    /// the smoothing buffer.
    ///
    /// Rejected estimates leave the session untouched.
    pub fn accept(&mut self, estimate: PitchEstimate) -> Option<NoteChange> {
        let Some(frequency) = passes_gate(&estimate, self.confidence_threshold) else {
            log::trace!(
                "Frame skipped: {:.2} Hz at clarity {:.2}",
                estimate.frequency,
                estimate.clarity
            );
            return None;
        };

        let classification = match tuning::classify(frequency) {
            Ok(classification) => classification,
            Err(e) => {
                log::trace!("Frame skipped: {e}");
                return None;
            }
        };
        let note = classification.note.name();
        log::debug!(
            "Pitch detection: {frequency:.2} Hz, clarity {:.2}, note {note}, cents {}",
            estimate.clarity,
            classification.cents
        );

        let note = self.buffer.decide(note)?;
        Some(NoteChange {
            note,
            cents: classification.cents,
        })
    }

    /// Consumes frames until the iterator ends, passing every change to `sink`.
    pub fn run<I>(&mut self, frames: I, mut sink: impl FnMut(NoteChange))
    where
        I: IntoIterator,
        I::Item: AsRef<[f32]>,
    {
        for frame in frames {
            if let Some(change) = self.process_frame(frame.as_ref()) {
                sink(change);
            }
        }
    }

    /// Forgets all buffered notes and the last reported one.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    pub fn buffer(&self) -> &SmoothingBuffer {
        &self.buffer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Analysis thread management for one session.
#[derive(Debug)]
struct SessionWorker {
    shutdown_tx: Sender<()>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
    thread_handle: Option<JoinHandle<()>>,
}

/// Start/stop driver around [`Session`].
///
/// Each `start` opens the capture source, prepares a fresh clone of the
/// estimator and runs a new session; each `stop` tears all of it down.
/// Nothing carries over from one session to the next.
pub struct AnalysisLoop<C, E, L> {
    capture: Arc<C>,
    estimator: E,
    listener: Arc<L>,
    config: TunerConfig,
    worker: Option<SessionWorker>,
}

impl<C, L> AnalysisLoop<C, ConfiguredEstimator, L> {
    /// Uses the estimator named in `config`.
    pub fn from_config(capture: C, listener: Arc<L>, config: TunerConfig) -> Self {
        let estimator = ConfiguredEstimator::from_config(&config);
        Self::new(capture, estimator, listener, config)
    }
}

impl<C, E, L> AnalysisLoop<C, E, L> {
    pub fn new(capture: C, estimator: E, listener: Arc<L>, config: TunerConfig) -> Self {
        Self {
            capture: Arc::new(capture),
            estimator,
            listener,
            config,
            worker: None,
        }
    }

    pub fn state(&self) -> LoopState {
        match &self.worker {
            Some(worker) if worker.running.load(Ordering::SeqCst) => LoopState::Running,
            _ => LoopState::Idle,
        }
    }

    /// Capture rate of the running session.
    pub fn sample_rate(&self) -> Option<u32> {
        match self.state() {
            LoopState::Running => self.worker.as_ref().map(|w| w.sample_rate),
            LoopState::Idle => None,
        }
    }

    /// Configuration the next session will run with.
    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Stops the session and waits for its thread to release capture.
    ///
    /// No note change is reported for frames arriving after this call.
    /// Does nothing when already idle.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.cancelled.store(true, Ordering::SeqCst);
        let _ = worker.shutdown_tx.try_send(());
        if let Some(handle) = worker.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Analysis thread panicked");
            }
        }
        log::info!("Tuner stopped");
    }
}

impl<C, E, L> AnalysisLoop<C, E, L>
where
    C: CaptureSource + Send + Sync + 'static,
    E: PitchEstimator + Clone + Send + 'static,
    L: TunerListener + Send + Sync + 'static,
{
    /// Starts a new session and waits until capture and estimator are ready.
    ///
    /// On failure the error is reported once through the listener, no
    /// resources stay held and the loop remains idle. Starting a running
    /// loop does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.state() == LoopState::Running {
            log::warn!("Tuner already running");
            return Ok(());
        }
        // Reap a session that ended on its own.
        self.stop();

        if let Err(e) = self.config.validate() {
            self.listener.on_error(&e.to_string());
            return Err(e);
        }

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));

        let worker_ctx = WorkerContext {
            capture: Arc::clone(&self.capture),
            listener: Arc::clone(&self.listener),
            config: self.config.clone(),
            ready_tx,
            shutdown_rx,
            cancelled: Arc::clone(&cancelled),
            running: Arc::clone(&running),
        };
        let estimator = self.estimator.clone();

        let spawned = thread::Builder::new()
            .name("tuner-analysis".into())
            .spawn(move || worker_ctx.run(estimator));
        let thread_handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let e = TunerError::Io(e);
                self.listener.on_error(&e.to_string());
                return Err(e);
            }
        };

        let failure = match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                log::info!("Tuner started successfully at {sample_rate} Hz");
                self.worker = Some(SessionWorker {
                    shutdown_tx,
                    cancelled,
                    running,
                    sample_rate,
                    thread_handle: Some(thread_handle),
                });
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => TunerError::CaptureUnavailable("analysis thread exited during start".into()),
        };

        if thread_handle.join().is_err() {
            log::error!("Analysis thread panicked during start");
        }
        log::error!("Tuner start error: {failure}");
        self.listener.on_error(&failure.to_string());
        Err(failure)
    }
}

impl<C, E, L> Drop for AnalysisLoop<C, E, L> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the analysis thread owns for the lifetime of one session.
struct WorkerContext<C, L> {
    capture: Arc<C>,
    listener: Arc<L>,
    config: TunerConfig,
    ready_tx: Sender<Result<u32>>,
    shutdown_rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl<C: CaptureSource, L: TunerListener> WorkerContext<C, L> {
    fn run<E: PitchEstimator>(self, mut estimator: E) {
        log::info!("Starting analysis thread...");
        let stream = match self.capture.open(self.config.frame_size) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = self.ready_tx.send(Err(e));
                return;
            }
        };
        let sample_rate = stream.sample_rate();
        if let Err(e) = estimator.prepare(self.config.frame_size, sample_rate) {
            drop(stream);
            let _ = self.ready_tx.send(Err(e));
            return;
        }

        let mut session = Session::new(estimator, &self.config, sample_rate);
        self.running.store(true, Ordering::SeqCst);
        if self.ready_tx.send(Ok(sample_rate)).is_err() {
            self.running.store(false, Ordering::SeqCst);
            return;
        }

        log::info!("Entering analysis loop...");
        let failure = loop {
            crossbeam_channel::select! {
                recv(self.shutdown_rx) -> _ => {
                    log::info!("Received shutdown signal");
                    break None;
                },
                recv(stream.events()) -> event => match event {
                    Ok(CaptureEvent::Frame(frame)) => {
                        if self.cancelled.load(Ordering::SeqCst) {
                            break None;
                        }
                        if let Some(change) = session.process_frame(&frame) {
                            log::info!("Note changed: {} ({:+} cents)", change.note, change.cents);
                            self.listener.on_note_change(&change.note, change.cents);
                        }
                    }
                    Ok(CaptureEvent::Interrupted(reason)) => {
                        break Some(TunerError::CaptureInterrupted(reason));
                    }
                    Err(_) => {
                        break Some(TunerError::CaptureInterrupted("capture stream closed".into()));
                    }
                },
                // Device failures bypass the frame queue so a backlog cannot hide them.
                recv(stream.interruptions()) -> reason => {
                    let reason = reason.unwrap_or_else(|_| "capture stream closed".into());
                    break Some(TunerError::CaptureInterrupted(reason));
                },
            }
        };

        session.reset();
        drop(session);
        drop(stream);
        self.running.store(false, Ordering::SeqCst);
        log::info!("Analysis thread finished");

        if let Some(e) = failure {
            if !self.cancelled.load(Ordering::SeqCst) {
                log::error!("{e}");
                self.listener.on_error(&e.to_string());
            }
        }
    }
}
