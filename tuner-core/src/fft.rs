//! # Fast Fourier Transform (FFT) Module
//!
//! FFT helpers for the pitch estimators. The main job here is computing the
//! autocorrelation of a frame in O(n log n) instead of O(n²).
//!
//! ## Features
//! - High-performance FFT using RustFFT
//! - DC offset removal for accurate analysis
//! - Plans are built once per session and reused for every frame

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset adds a constant term to every lag of the autocorrelation,
/// which flattens the peaks the estimators look for.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 { return; }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Computes linear (non-circular) autocorrelation with a pair of planned FFTs.
pub struct Autocorrelator {
    frame_size: usize,
    padded_len: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Autocorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autocorrelator")
            .field("frame_size", &self.frame_size)
            .field("padded_len", &self.padded_len)
            .finish()
    }
}

impl Autocorrelator {
    /// Plans the transforms for frames of `frame_size` samples.
    ///
    /// The signal is zero-padded to a power of two at least twice as long so
    /// the circular correlation computed by the FFT does not wrap around.
    pub fn new(frame_size: usize) -> Self {
        let padded_len = (frame_size * 2).next_power_of_two();
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(padded_len);
        let inverse = planner.plan_fft_inverse(padded_len);
        Self {
            frame_size,
            padded_len,
            forward,
            inverse,
            scratch: vec![Complex { re: 0.0, im: 0.0 }; padded_len],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Returns `r(τ) = Σ x[j]·x[j+τ]` for τ in `0..frame_size`.
    ///
    /// Frames shorter than `frame_size` are zero-padded, longer ones truncated.
    pub fn autocorrelate(&mut self, signal: &[f32]) -> Vec<f32> {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < self.frame_size {
                signal.get(i).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            *slot = Complex { re: sample, im: 0.0 };
        }

        self.forward.process(&mut self.scratch);
        for bin in self.scratch.iter_mut() {
            *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
        }
        self.inverse.process(&mut self.scratch);

        // RustFFT does not normalize the inverse transform.
        let scale = 1.0 / self.padded_len as f32;
        self.scratch
            .iter()
            .take(self.frame_size)
            .map(|c| c.re * scale)
            .collect()
    }
}
