//! Fixed-length epoch grid.
//!
//! The normalized timeline is cut into non-overlapping windows of
//! `epoch_dur` seconds (`epoch_samples` samples at the target rate):
//!
//! ```text
//!   n_epochs = floor(duration / epoch_dur)
//!   epoch e  = [e·d, (e+1)·d)  seconds,  midpoint (e + ½)·d
//!   chunk c  = epochs [c·k, min((c+1)·k, n_epochs))
//! ```
//!
//! Trailing time that does not fill a complete epoch is not scored.  Chunks
//! are groups of `k` consecutive epochs; the last chunk may be shorter.
use std::ops::Range;

use ndarray::ArrayView2;

/// Epoch layout of one recording at the target rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochGrid {
    pub n_epochs: usize,
    /// Epoch duration in seconds.
    pub epoch_dur: f64,
    /// Target sampling rate in Hz.
    pub sfreq: f64,
    pub epoch_samples: usize,
}

impl EpochGrid {
    /// Grid covering `floor(duration_secs / epoch_dur)` whole epochs.
    pub fn new(duration_secs: f64, epoch_dur: f32, sfreq: f32) -> Self {
        let d = epoch_dur as f64;
        // Tolerate float noise in durations derived from sample counts.
        let n_epochs = if d > 0.0 && duration_secs > 0.0 {
            (duration_secs / d + 1e-9).floor() as usize
        } else {
            0
        };
        Self {
            n_epochs,
            epoch_dur: d,
            sfreq: sfreq as f64,
            epoch_samples: (d * sfreq as f64).round() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n_epochs == 0
    }

    pub fn start_secs(&self, e: usize) -> f64 {
        e as f64 * self.epoch_dur
    }

    pub fn end_secs(&self, e: usize) -> f64 {
        (e + 1) as f64 * self.epoch_dur
    }

    pub fn midpoint_secs(&self, e: usize) -> f64 {
        (e as f64 + 0.5) * self.epoch_dur
    }

    /// Sample range of epoch `e` at the target rate.
    pub fn sample_range(&self, e: usize) -> Range<usize> {
        e * self.epoch_samples..(e + 1) * self.epoch_samples
    }

    /// Number of target-rate samples spanned by the whole grid.
    pub fn n_samples(&self) -> usize {
        self.n_epochs * self.epoch_samples
    }

    /// Epoch containing time `t`, if it lies on the grid.
    pub fn epoch_at(&self, t: f64) -> Option<usize> {
        if !(t >= 0.0) {
            return None;
        }
        let e = (t / self.epoch_dur).floor() as usize;
        (e < self.n_epochs).then_some(e)
    }

    /// Epochs whose midpoint lies in `[start, end)`.
    pub fn midpoints_within(&self, start: f64, end: f64) -> Range<usize> {
        let first = self.clamp_index((start / self.epoch_dur - 0.5).ceil());
        let last = self.clamp_index((end / self.epoch_dur - 0.5).ceil());
        first..last.max(first)
    }

    /// Epochs that intersect the open span `(start, end)`; partial overlap
    /// counts.  A zero-length span selects the epoch containing `start`.
    pub fn overlapping(&self, start: f64, end: f64) -> Range<usize> {
        if end <= start {
            return match self.epoch_at(start) {
                Some(e) => e..e + 1,
                None => 0..0,
            };
        }
        let first = self.clamp_index((start / self.epoch_dur).floor());
        let last = self.clamp_index((end / self.epoch_dur).ceil());
        first..last.max(first)
    }

    /// Number of chunks of `chunk_epochs` epochs, counting a trailing
    /// partial chunk.
    pub fn n_chunks(&self, chunk_epochs: usize) -> usize {
        if chunk_epochs == 0 {
            return 0;
        }
        self.n_epochs.div_ceil(chunk_epochs)
    }

    /// Epochs in chunk `c`.
    pub fn chunk_range(&self, c: usize, chunk_epochs: usize) -> Range<usize> {
        let start = (c * chunk_epochs).min(self.n_epochs);
        start..((c + 1) * chunk_epochs).min(self.n_epochs)
    }

    fn clamp_index(&self, v: f64) -> usize {
        if v <= 0.0 {
            0
        } else {
            (v as usize).min(self.n_epochs)
        }
    }
}

/// View a channel as `[E, epoch_samples]`, one row per complete epoch the
/// channel covers (at most `grid.n_epochs`).  Trailing samples are ignored.
pub fn epoch_view<'a>(x: &'a [f32], grid: &EpochGrid) -> ArrayView2<'a, f32> {
    let s = grid.epoch_samples;
    let n = if s == 0 { 0 } else { (x.len() / s).min(grid.n_epochs) };
    match ArrayView2::from_shape((n, s), &x[..n * s]) {
        Ok(view) => view,
        Err(_) => {
            let empty: &[[f32; 0]] = &[];
            ArrayView2::from(empty)
        }
    }
}
