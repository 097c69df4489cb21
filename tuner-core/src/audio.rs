//! # Audio Capture Module
//!
//! This module delivers fixed-size frames of mono samples to the analysis
//! loop. Real input comes from CPAL (Cross-Platform Audio Library); a
//! synthetic sine source is available for running without a microphone.
//!
//! ## Features
//! - Automatic audio device selection
//! - Configurable sample rates with mono down-mixing fallback
//! - Re-chunking of callback data into exact frames
//! - Stream errors reported to the consumer as interruptions

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, TunerError};

/// Frames buffered between the audio callback and the analysis loop.
/// When the loop falls behind, newer frames are dropped.
pub const FRAME_QUEUE_DEPTH: usize = 8;

/// What the capture side hands to the analysis loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One frame of exactly `frame_size` mono samples.
    Frame(Vec<f32>),
    /// The device stopped delivering audio.
    Interrupted(String),
}

/// An open capture stream.
///
/// Holds whatever keeps the device running; dropping the stream releases it.
/// Failures raised outside the frame sequence (device callbacks) arrive on a
/// separate interruption channel so a full frame queue cannot swallow them.
pub struct CaptureStream {
    sample_rate: u32,
    events: Receiver<CaptureEvent>,
    interruptions: Receiver<String>,
    _guard: Box<dyn Any>,
}

impl std::fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream")
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

impl CaptureStream {
    /// Wraps a receiver of capture events. `guard` is dropped with the stream.
    pub fn new(sample_rate: u32, events: Receiver<CaptureEvent>, guard: impl Any) -> Self {
        Self {
            sample_rate,
            events,
            interruptions: crossbeam_channel::never(),
            _guard: Box::new(guard),
        }
    }

    /// Attaches a channel that reports asynchronous failures.
    pub fn with_interruptions(mut self, interruptions: Receiver<String>) -> Self {
        self.interruptions = interruptions;
        self
    }

    /// Rate the frames were actually captured at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn events(&self) -> &Receiver<CaptureEvent> {
        &self.events
    }

    pub fn interruptions(&self) -> &Receiver<String> {
        &self.interruptions
    }
}

/// Something that can be opened to produce frames.
///
/// `open` is called on the analysis thread, so the returned stream never has
/// to cross threads.
pub trait CaptureSource {
    /// Opens the source for frames of `frame_size` samples.
    ///
    /// # Errors
    /// Returns `TunerError::CaptureUnavailable` when no input can be opened.
    fn open(&self, frame_size: usize) -> Result<CaptureStream>;
}

/// Splits incoming callback data into frames of exactly `frame_size` samples.
#[derive(Debug)]
struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    fn push(&mut self, samples: impl IntoIterator<Item = f32>, mut emit: impl FnMut(Vec<f32>)) {
        self.pending.extend(samples);
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            emit(frame);
        }
    }
}

/// Producer side of a callback-driven capture stream.
///
/// Frames are offered with `try_send` and dropped when the consumer is
/// behind. Interruptions use their own one-slot channel; once one is queued
/// later ones are redundant.
#[derive(Debug)]
struct CallbackSink {
    chunker: FrameChunker,
    frames: Sender<CaptureEvent>,
    interrupter: Interrupter,
}

#[derive(Debug, Clone)]
struct Interrupter(Sender<String>);

impl Interrupter {
    fn interrupt(&self, reason: String) {
        let _ = self.0.try_send(reason);
    }
}

impl CallbackSink {
    /// Creates the sink and the receivers the stream is built from.
    fn channel(frame_size: usize) -> (Self, Receiver<CaptureEvent>, Receiver<String>) {
        let (frames, frames_rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
        let sink = Self {
            chunker: FrameChunker::new(frame_size),
            frames,
            interrupter: Interrupter(interrupt_tx),
        };
        (sink, frames_rx, interrupt_rx)
    }

    fn push(&mut self, samples: impl IntoIterator<Item = f32>) {
        let frames = &self.frames;
        // Drop frames if the analysis thread is behind.
        self.chunker.push(samples, |frame| {
            let _ = frames.try_send(CaptureEvent::Frame(frame));
        });
    }

    /// Down-mixes interleaved samples of any supported format to mono f32.
    fn push_interleaved<T>(&mut self, data: &[T], channels: usize)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let mono = data.chunks(channels.max(1)).map(|chunk| {
            chunk.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / chunk.len() as f32
        });
        self.push(mono);
    }

    fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }
}

/// Builds an input stream for sample type `T`, converting to mono f32.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: CallbackSink,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels);
    let interrupter = sink.interrupter();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| sink.push_interleaved(data, channels),
        move |err| {
            log::error!("An error occurred on the audio stream: {err}");
            interrupter.interrupt(err.to_string());
        },
        None,
    )
}

/// Capture from the default input device of the default host.
#[derive(Debug, Clone)]
pub struct CpalCapture {
    requested_sample_rate: u32,
}

/// Keeps the CPAL stream alive and pauses it on release.
struct CpalStreamGuard(cpal::Stream);

impl Drop for CpalStreamGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.pause() {
            log::warn!("Error pausing input stream: {e}");
        }
        log::info!("Audio input released");
    }
}

impl CpalCapture {
    pub fn new(requested_sample_rate: u32) -> Self {
        Self { requested_sample_rate }
    }
}

impl CaptureSource for CpalCapture {
    /// Starts audio capture from the default input device.
    ///
    /// Prefers a mono f32 configuration at the requested rate. If the device
    /// has none, its default input configuration is used: f32, i16 and u16
    /// samples are converted to f32 and each callback is down-mixed to mono.
    fn open(&self, frame_size: usize) -> Result<CaptureStream> {
        let unavailable = |e: &dyn std::fmt::Display| TunerError::CaptureUnavailable(e.to_string());

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::CaptureUnavailable("No input device available".into()))?;

        match device.name() {
            Ok(name) => log::info!("Using audio input device: {name}"),
            Err(e) => log::warn!("Could not read input device name: {e}"),
        }

        let configs = device
            .supported_input_configs()
            .map_err(|e| unavailable(&e))?
            .collect::<Vec<_>>();

        let (config, format) = match find_supported_config(configs, self.requested_sample_rate) {
            Some(range) => {
                let rate = self
                    .requested_sample_rate
                    .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
                let supported = range.with_sample_rate(cpal::SampleRate(rate));
                let format = supported.sample_format();
                (supported.into(), format)
            }
            None => {
                let default = device.default_input_config().map_err(|e| unavailable(&e))?;
                let format = default.sample_format();
                let config: cpal::StreamConfig = default.into();
                (config, format)
            }
        };
        let sample_rate = config.sample_rate.0;
        log::info!(
            "Selected sample rate: {sample_rate} Hz, {} channel(s), {format:?}",
            config.channels
        );

        let (sink, frames_rx, interrupt_rx) = CallbackSink::channel(frame_size);
        let stream = match format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sink),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sink),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sink),
            other => {
                return Err(TunerError::CaptureUnavailable(format!(
                    "Unsupported input sample format: {other:?}"
                )));
            }
        }
        .map_err(|e| unavailable(&e))?;

        stream.play().map_err(|e| unavailable(&e))?;

        Ok(CaptureStream::new(sample_rate, frames_rx, CpalStreamGuard(stream))
            .with_interruptions(interrupt_rx))
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Only mono 32-bit float configurations qualify; among those the one whose
/// rate range comes closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
            let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
            if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                min_diff.min(max_diff)
            }
        })
}

/// A device-free source that produces a steady sine tone.
///
/// Frames are paced in real time when `realtime` is set, otherwise they are
/// produced as fast as the consumer takes them. An optional frame limit
/// simulates the device going away.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    realtime: bool,
    frame_limit: Option<usize>,
}

impl SyntheticCapture {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        Self {
            frequency,
            amplitude: 0.5,
            sample_rate,
            realtime: true,
            frame_limit: None,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Produces frames without waiting for wall-clock time.
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    /// Reports an interruption after `frames` frames.
    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frame_limit = Some(frames);
        self
    }
}

/// Stops the generator thread when the stream is dropped.
struct GeneratorGuard {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for GeneratorGuard {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Synthetic capture thread panicked");
            }
        }
    }
}

impl CaptureSource for SyntheticCapture {
    fn open(&self, frame_size: usize) -> Result<CaptureStream> {
        if frame_size == 0 || self.sample_rate == 0 {
            return Err(TunerError::CaptureUnavailable(
                "Synthetic capture needs a positive frame size and sample rate".into(),
            ));
        }

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let source = self.clone();
        let frame_period = Duration::from_secs_f64(frame_size as f64 / source.sample_rate as f64);

        let handle = thread::spawn(move || {
            let step = 2.0 * std::f64::consts::PI * source.frequency as f64 / source.sample_rate as f64;
            let mut phase = 0.0_f64;
            let mut produced = 0;
            loop {
                if source.frame_limit.is_some_and(|limit| produced >= limit) {
                    let _ = tx.send(CaptureEvent::Interrupted("synthetic source exhausted".into()));
                    break;
                }
                let frame: Vec<f32> = (0..frame_size)
                    .map(|_| {
                        let sample = source.amplitude * phase.sin() as f32;
                        phase = (phase + step) % (2.0 * std::f64::consts::PI);
                        sample
                    })
                    .collect();
                produced += 1;

                crossbeam_channel::select! {
                    send(tx, CaptureEvent::Frame(frame)) -> res => if res.is_err() { break },
                    recv(stop_rx) -> _ => break,
                }
                if source.realtime && stop_rx.recv_timeout(frame_period).is_ok() {
                    break;
                }
            }
        });

        Ok(CaptureStream::new(
            self.sample_rate,
            rx,
            GeneratorGuard {
                stop_tx,
                handle: Some(handle),
            },
        ))
    }
}
