use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tuner_core::{
    AnalysisLoop, CaptureEvent, CaptureSource, CaptureStream, LoopState, NoteChange,
    PitchEstimate, PitchEstimator, SyntheticCapture, TunerConfig, TunerError, TunerEvent,
};

const WAIT: Duration = Duration::from_secs(5);

/// Capture source whose frames are pushed by the test. Each `open` takes the
/// next prepared feed; with none left, opening fails like a denied microphone.
#[derive(Default)]
struct ManualCapture {
    feeds: Mutex<VecDeque<Receiver<CaptureEvent>>>,
    released: Arc<AtomicBool>,
}

struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl ManualCapture {
    fn with_feeds(count: usize) -> (Self, Vec<Sender<CaptureEvent>>) {
        let capture = ManualCapture::default();
        let mut senders = Vec::new();
        for _ in 0..count {
            let (tx, rx) = crossbeam_channel::unbounded();
            capture.feeds.lock().unwrap().push_back(rx);
            senders.push(tx);
        }
        (capture, senders)
    }
}

impl CaptureSource for ManualCapture {
    fn open(&self, _frame_size: usize) -> tuner_core::Result<CaptureStream> {
        let feed = self.feeds.lock().unwrap().pop_front();
        match feed {
            Some(rx) => {
                self.released.store(false, Ordering::SeqCst);
                Ok(CaptureStream::new(44100, rx, ReleaseFlag(Arc::clone(&self.released))))
            }
            None => Err(TunerError::CaptureUnavailable("Microphone access denied".into())),
        }
    }
}

/// Capture whose frame queue is already full when it opens, with a device
/// failure pending on the side channel.
struct BackloggedCapture {
    backlog: usize,
    frames_tx: Mutex<Option<Sender<CaptureEvent>>>,
}

impl CaptureSource for BackloggedCapture {
    fn open(&self, _frame_size: usize) -> tuner_core::Result<CaptureStream> {
        let (frames_tx, frames_rx) = crossbeam_channel::bounded(self.backlog);
        for _ in 0..self.backlog {
            frames_tx.send(frame(440.0, 0.5)).unwrap();
        }
        assert!(frames_tx.try_send(frame(440.0, 0.5)).is_err());
        *self.frames_tx.lock().unwrap() = Some(frames_tx);

        let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
        interrupt_tx.send("device unplugged".to_string()).unwrap();
        Ok(CaptureStream::new(44100, frames_rx, ()).with_interruptions(interrupt_rx))
    }
}

/// Oracle that reads `[frequency, clarity]` straight out of the frame.
#[derive(Debug, Clone, Default)]
struct FrameOracle {
    fail_prepare: bool,
}

impl PitchEstimator for FrameOracle {
    fn prepare(&mut self, _frame_size: usize, _sample_rate: u32) -> tuner_core::Result<()> {
        if self.fail_prepare {
            Err(TunerError::OracleUnavailable("no detector".into()))
        } else {
            Ok(())
        }
    }

    fn estimate(&mut self, frame: &[f32], _sample_rate: u32) -> PitchEstimate {
        PitchEstimate::new(frame[0], frame[1])
    }
}

fn frame(frequency: f32, clarity: f32) -> CaptureEvent {
    CaptureEvent::Frame(vec![frequency, clarity])
}

fn send_frames(tx: &Sender<CaptureEvent>, frequency: f32, clarity: f32, count: usize) {
    for _ in 0..count {
        tx.send(frame(frequency, clarity)).unwrap();
    }
}

fn note_event(note: &str, cents: i32) -> TunerEvent {
    TunerEvent::NoteChanged(NoteChange { note: note.into(), cents })
}

type ManualLoop = AnalysisLoop<ManualCapture, FrameOracle, Sender<TunerEvent>>;

fn manual_loop(feeds: usize) -> (ManualLoop, Vec<Sender<CaptureEvent>>, Receiver<TunerEvent>, Arc<AtomicBool>) {
    let (capture, senders) = ManualCapture::with_feeds(feeds);
    let released = Arc::clone(&capture.released);
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let tuner = AnalysisLoop::new(capture, FrameOracle::default(), Arc::new(events_tx), TunerConfig::default());
    (tuner, senders, events_rx, released)
}

fn wait_for_idle<C, E, L>(tuner: &AnalysisLoop<C, E, L>) {
    let deadline = Instant::now() + WAIT;
    while tuner.state() != LoopState::Idle {
        assert!(Instant::now() < deadline, "loop never went idle");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn steady_e4_emits_exactly_once() {
    let (mut tuner, senders, events, _) = manual_loop(1);
    tuner.start().unwrap();
    assert_eq!(tuner.state(), LoopState::Running);

    send_frames(&senders[0], 329.63, 0.95, 5);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("E4", 0));

    // Many more identical frames, then a different note to prove they were processed.
    send_frames(&senders[0], 329.63, 0.95, 20);
    send_frames(&senders[0], 440.0, 0.95, 5);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("A4", 0));

    tuner.stop();
    assert!(events.try_recv().is_err());
}

#[test]
fn low_confidence_frames_are_invisible() {
    let (mut tuner, senders, events, _) = manual_loop(1);
    tuner.start().unwrap();

    send_frames(&senders[0], 440.0, 0.95, 2);
    // Exact table frequency but not confident enough.
    send_frames(&senders[0], 329.63, 0.85, 10);
    send_frames(&senders[0], 440.0, 0.95, 1);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("A4", 0));
    tuner.stop();
}

#[test]
fn failed_start_reports_once_and_stays_idle() {
    let (mut tuner, _senders, events, _) = manual_loop(0);
    let result = tuner.start();
    assert!(matches!(result, Err(TunerError::CaptureUnavailable(_))));
    assert_eq!(tuner.state(), LoopState::Idle);
    match events.try_recv() {
        Ok(TunerEvent::Error(message)) => assert!(message.contains("Microphone access denied")),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn oracle_failure_releases_capture() {
    let (capture, _senders) = ManualCapture::with_feeds(1);
    let released = Arc::clone(&capture.released);
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let oracle = FrameOracle { fail_prepare: true };
    let mut tuner = AnalysisLoop::new(capture, oracle, Arc::new(events_tx), TunerConfig::default());

    assert!(matches!(tuner.start(), Err(TunerError::OracleUnavailable(_))));
    assert_eq!(tuner.state(), LoopState::Idle);
    assert!(released.load(Ordering::SeqCst));
    assert!(matches!(events_rx.try_recv(), Ok(TunerEvent::Error(_))));
}

#[test]
fn stop_is_idempotent_and_releases_capture() {
    let (mut tuner, _senders, _events, released) = manual_loop(1);
    tuner.stop();
    assert_eq!(tuner.state(), LoopState::Idle);

    tuner.start().unwrap();
    assert!(!released.load(Ordering::SeqCst));
    tuner.stop();
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(tuner.state(), LoopState::Idle);
    tuner.stop();
    assert_eq!(tuner.state(), LoopState::Idle);
}

#[test]
fn restart_starts_from_a_clean_buffer() {
    let (mut tuner, senders, events, _) = manual_loop(2);

    tuner.start().unwrap();
    send_frames(&senders[0], 329.63, 0.95, 3);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("E4", 0));
    tuner.stop();

    tuner.start().unwrap();
    // Two frames are not a majority on their own.
    send_frames(&senders[1], 329.63, 0.95, 2);
    send_frames(&senders[1], 440.0, 0.95, 3);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("A4", 0));
    // E4 was reported in the previous session only, so it is new again here.
    send_frames(&senders[1], 329.63, 0.95, 3);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("E4", 0));
    tuner.stop();
}

#[test]
fn nothing_is_emitted_after_stop() {
    let (mut tuner, senders, events, _) = manual_loop(1);
    tuner.start().unwrap();
    send_frames(&senders[0], 440.0, 0.95, 2);
    tuner.stop();

    // The feed was dropped with the session.
    assert!(senders[0].send(frame(440.0, 0.95)).is_err());
    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn interruption_reports_error_and_goes_idle() {
    let (mut tuner, senders, events, released) = manual_loop(1);
    tuner.start().unwrap();
    senders[0]
        .send(CaptureEvent::Interrupted("device disconnected".into()))
        .unwrap();

    match events.recv_timeout(WAIT).unwrap() {
        TunerEvent::Error(message) => assert!(message.contains("device disconnected")),
        other => panic!("expected an error event, got {other:?}"),
    }
    wait_for_idle(&tuner);
    assert!(released.load(Ordering::SeqCst));
    tuner.stop();
    assert!(events.try_recv().is_err());
}

#[test]
fn interruption_behind_a_full_frame_queue_is_reported() {
    let capture = BackloggedCapture {
        backlog: 8,
        frames_tx: Mutex::new(None),
    };
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let mut tuner = AnalysisLoop::new(capture, FrameOracle::default(), Arc::new(events_tx), TunerConfig::default());
    tuner.start().unwrap();

    match events_rx.recv_timeout(WAIT).unwrap() {
        TunerEvent::Error(message) => assert!(message.contains("device unplugged"), "{message}"),
        other => panic!("expected an error event, got {other:?}"),
    }
    wait_for_idle(&tuner);
    tuner.stop();
    assert!(events_rx.try_recv().is_err());
}

#[test]
fn closed_feed_counts_as_interruption() {
    let (mut tuner, mut senders, events, _) = manual_loop(1);
    tuner.start().unwrap();
    senders.clear();
    assert!(matches!(events.recv_timeout(WAIT).unwrap(), TunerEvent::Error(_)));
    wait_for_idle(&tuner);
}

#[test]
fn start_while_running_keeps_the_session() {
    let (mut tuner, senders, events, _) = manual_loop(2);
    tuner.start().unwrap();
    send_frames(&senders[0], 440.0, 0.95, 2);
    tuner.start().unwrap();
    send_frames(&senders[0], 440.0, 0.95, 1);
    assert_eq!(events.recv_timeout(WAIT).unwrap(), note_event("A4", 0));
    tuner.stop();
}

#[test]
fn synthetic_tone_is_recognised_end_to_end() {
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let capture = SyntheticCapture::new(329.63, 44100).unpaced();
    let mut tuner = AnalysisLoop::from_config(capture, Arc::new(events_tx), TunerConfig::default());

    tuner.start().unwrap();
    assert_eq!(tuner.sample_rate(), Some(44100));
    match events_rx.recv_timeout(WAIT).unwrap() {
        TunerEvent::NoteChanged(change) => {
            assert_eq!(change.note, "E4");
            assert!(change.cents.abs() <= 2, "cents {}", change.cents);
        }
        other => panic!("expected a note change, got {other:?}"),
    }
    tuner.stop();
    assert_eq!(tuner.state(), LoopState::Idle);
    assert_eq!(tuner.sample_rate(), None);
}

#[test]
fn quiet_tone_stays_below_the_amplitude_gate() {
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let capture = SyntheticCapture::new(329.63, 44100)
        .with_amplitude(0.001)
        .unpaced()
        .with_frame_limit(20);
    let mut tuner = AnalysisLoop::from_config(capture, Arc::new(events_tx), TunerConfig::default());
    assert_eq!(tuner.config().amplitude_threshold, 0.01);

    tuner.start().unwrap();
    match events_rx.recv_timeout(WAIT).unwrap() {
        TunerEvent::Error(message) => assert!(message.contains("exhausted"), "{message}"),
        other => panic!("expected only the exhaustion error, got {other:?}"),
    }
    tuner.stop();
    assert!(events_rx.try_recv().is_err());
}

#[test]
fn loop_keeps_the_configuration_it_was_built_with() {
    let config = TunerConfig {
        confidence_threshold: 0.8,
        smoothing_window: 3,
        ..TunerConfig::default()
    };
    let (events_tx, _events_rx) = crossbeam_channel::unbounded::<TunerEvent>();
    let tuner = AnalysisLoop::from_config(SyntheticCapture::new(440.0, 44100), Arc::new(events_tx), config.clone());
    assert_eq!(tuner.config(), &config);
}
