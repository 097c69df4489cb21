//! # Pitch Detection Module
//!
//! Fundamental frequency estimators. Each one turns a frame of samples into
//! a single best-guess frequency plus a clarity score in [0, 1] saying how
//! periodic the frame looked. The analysis loop only sees the
//! [`PitchEstimator`] trait and decides on its own which estimates to trust.
//!
//! ## Features
//! - McLeod Pitch Method (NSDF through FFT autocorrelation)
//! - YIN pitch detection with first-dip picking to avoid octave errors
//! - Amplitude gating to filter out silence
//! - Parabolic interpolation for sub-sample accuracy

use crate::config::{EstimatorKind, TunerConfig};
use crate::error::Result;
use crate::fft::{remove_dc_offset, Autocorrelator};

/// Relative height a key maximum needs, compared to the highest one, to be picked.
const MCLEOD_CUTOFF: f32 = 0.9;

/// Margin above the global minimum that counts as a YIN dip.
const YIN_DIP_MARGIN: f32 = 0.05;

/// Single estimate for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Frequency in Hz; zero when nothing was detected.
    pub frequency: f32,
    /// Confidence in [0, 1].
    pub clarity: f32,
}

impl PitchEstimate {
    /// No detectable pitch.
    pub const NONE: PitchEstimate = PitchEstimate { frequency: 0.0, clarity: 0.0 };

    pub fn new(frequency: f32, clarity: f32) -> Self {
        Self { frequency, clarity }
    }
}

/// A fundamental frequency oracle.
pub trait PitchEstimator {
    /// Acquires whatever the estimator needs for frames of this shape.
    ///
    /// Called once per session, after capture is open and before the first frame.
    fn prepare(&mut self, _frame_size: usize, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    /// Estimates the fundamental of `frame`.
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate;
}

fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
}

/// Vertex of the parabola through `(x-1, a)`, `(x, b)`, `(x+1, c)`.
///
/// Returns `(offset from x, value at the vertex)`.
fn parabolic_peak(a: f32, b: f32, c: f32) -> (f32, f32) {
    let denominator = a - 2.0 * b + c;
    if denominator == 0.0 {
        return (0.0, b);
    }
    let shift = (a - c) / (2.0 * denominator);
    (shift, b - 0.25 * (a - c) * shift)
}

/// McLeod Pitch Method estimator.
///
/// Computes the normalized square difference function
/// `n(τ) = 2·r(τ) / m(τ)`, picks the first key maximum within 90% of the
/// highest one, and reports its interpolated height as the clarity.
#[derive(Debug)]
pub struct McLeodEstimator {
    amplitude_threshold: f32,
    correlator: Option<Autocorrelator>,
}

impl Clone for McLeodEstimator {
    // FFT plans are per session; a clone re-plans in `prepare`.
    fn clone(&self) -> Self {
        Self::new(self.amplitude_threshold)
    }
}

impl McLeodEstimator {
    pub fn new(amplitude_threshold: f32) -> Self {
        Self {
            amplitude_threshold,
            correlator: None,
        }
    }

    /// NSDF for lags up to half the frame; longer lags overlap too few samples.
    fn nsdf(&mut self, signal: &[f32]) -> Vec<f32> {
        if self.correlator.as_ref().is_none_or(|c| c.frame_size() != signal.len()) {
            self.correlator = None;
        }
        let correlator = self
            .correlator
            .get_or_insert_with(|| Autocorrelator::new(signal.len()));
        let r = correlator.autocorrelate(signal);

        let mut m = 2.0 * r[0];
        let n = signal.len();
        let max_lag = n / 2;
        let mut nsdf = Vec::with_capacity(max_lag);
        for tau in 0..max_lag {
            if tau > 0 {
                m -= signal[tau - 1] * signal[tau - 1] + signal[n - tau] * signal[n - tau];
            }
            nsdf.push(if m > 0.0 { 2.0 * r[tau] / m } else { 0.0 });
        }
        nsdf
    }
}

/// Indices of the highest point of every positive lobe after the first
/// negative-going zero crossing.
fn key_maxima(nsdf: &[f32]) -> Vec<usize> {
    let mut maxima = Vec::new();
    let mut tau = 1;
    // Skip the lobe around lag zero.
    while tau < nsdf.len() && nsdf[tau] > 0.0 {
        tau += 1;
    }

    let mut current: Option<usize> = None;
    while tau < nsdf.len() {
        if nsdf[tau] > 0.0 {
            if current.is_none_or(|best| nsdf[tau] > nsdf[best]) {
                current = Some(tau);
            }
        } else if let Some(best) = current.take() {
            maxima.push(best);
        }
        tau += 1;
    }
    if let Some(best) = current {
        maxima.push(best);
    }
    maxima
}

impl PitchEstimator for McLeodEstimator {
    fn prepare(&mut self, frame_size: usize, _sample_rate: u32) -> Result<()> {
        self.correlator = Some(Autocorrelator::new(frame_size));
        Ok(())
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate {
        if frame.len() < 4 || rms(frame) < self.amplitude_threshold {
            return PitchEstimate::NONE;
        }

        let mut signal = frame.to_vec();
        remove_dc_offset(&mut signal);
        let nsdf = self.nsdf(&signal);

        let maxima = key_maxima(&nsdf);
        let highest = maxima
            .iter()
            .map(|&tau| nsdf[tau])
            .fold(f32::NEG_INFINITY, f32::max);
        if !highest.is_finite() || highest <= 0.0 {
            return PitchEstimate::NONE;
        }

        let cutoff = MCLEOD_CUTOFF * highest;
        let Some(&tau) = maxima.iter().find(|&&tau| nsdf[tau] >= cutoff) else {
            return PitchEstimate::NONE;
        };

        let (shift, value) = if tau + 1 < nsdf.len() {
            parabolic_peak(nsdf[tau - 1], nsdf[tau], nsdf[tau + 1])
        } else {
            (0.0, nsdf[tau])
        };
        let period = tau as f32 + shift;
        let frequency = sample_rate as f32 / period;

        if frequency.is_finite() && frequency > 0.0 {
            log::trace!("McLeod: period {period:.2} -> {frequency:.2} Hz, clarity {value:.3}");
            PitchEstimate::new(frequency, value.clamp(0.0, 1.0))
        } else {
            PitchEstimate::NONE
        }
    }
}

/// YIN estimator.
///
/// Clarity is `1 - d'(τ)` at the chosen dip of the cumulative mean
/// normalized difference function, so a perfectly periodic frame scores 1.
#[derive(Debug, Clone)]
pub struct YinEstimator {
    amplitude_threshold: f32,
}

impl YinEstimator {
    pub fn new(amplitude_threshold: f32) -> Self {
        Self { amplitude_threshold }
    }
}

impl PitchEstimator for YinEstimator {
    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate {
        let frame_size = frame.len();
        let half = frame_size / 2;
        if half < 3 || rms(frame) < self.amplitude_threshold {
            return PitchEstimate::NONE;
        }

        let mut signal = frame.to_vec();
        remove_dc_offset(&mut signal);

        // --- Difference function ---
        let mut yin_buffer = vec![0.0_f32; half];
        for tau in 1..half {
            let mut diff = 0.0;
            for i in 0..half {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            yin_buffer[tau] = diff;
        }

        // --- Cumulative mean normalized difference ---
        let mut running_sum = 0.0;
        yin_buffer[0] = 1.0;
        for tau in 1..half {
            running_sum += yin_buffer[tau];
            if running_sum != 0.0 {
                yin_buffer[tau] *= tau as f32 / running_sum;
            } else {
                yin_buffer[tau] = 1.0;
            }
        }

        // --- First significant dip, to avoid octave errors ---
        let min_val = yin_buffer
            .iter()
            .skip(1)
            .cloned()
            .fold(f32::INFINITY, f32::min);
        let threshold = min_val + YIN_DIP_MARGIN;

        let Some(mut period) =
            (2..half).find(|&tau| yin_buffer[tau] < threshold && yin_buffer[tau] < yin_buffer[tau - 1])
        else {
            return PitchEstimate::NONE;
        };
        // Slide down to the bottom of the dip.
        while period + 1 < half && yin_buffer[period + 1] < yin_buffer[period] {
            period += 1;
        }
        if period + 1 >= half {
            return PitchEstimate::NONE;
        }

        let (shift, value) = parabolic_peak(
            yin_buffer[period - 1],
            yin_buffer[period],
            yin_buffer[period + 1],
        );
        let frequency = sample_rate as f32 / (period as f32 + shift);

        if frequency.is_finite() && frequency > 0.0 {
            PitchEstimate::new(frequency, (1.0 - value).clamp(0.0, 1.0))
        } else {
            PitchEstimate::NONE
        }
    }
}

/// Estimator selected by [`TunerConfig::estimator`].
#[derive(Debug, Clone)]
pub enum ConfiguredEstimator {
    McLeod(McLeodEstimator),
    Yin(YinEstimator),
}

impl ConfiguredEstimator {
    pub fn from_config(config: &TunerConfig) -> Self {
        match config.estimator {
            EstimatorKind::McLeod => Self::McLeod(McLeodEstimator::new(config.amplitude_threshold)),
            EstimatorKind::Yin => Self::Yin(YinEstimator::new(config.amplitude_threshold)),
        }
    }
}

impl PitchEstimator for ConfiguredEstimator {
    fn prepare(&mut self, frame_size: usize, sample_rate: u32) -> Result<()> {
        match self {
            Self::McLeod(e) => e.prepare(frame_size, sample_rate),
            Self::Yin(e) => e.prepare(frame_size, sample_rate),
        }
    }

    fn estimate(&mut self, frame: &[f32], sample_rate: u32) -> PitchEstimate {
        match self {
            Self::McLeod(e) => e.estimate(frame, sample_rate),
            Self::Yin(e) => e.estimate(frame, sample_rate),
        }
    }
}
