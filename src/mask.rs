//! Availability and validity masks.
//!
//! ```text
//! availability [E, 4]   true iff some channel of the modality covers the
//!                       whole epoch at the target rate
//! validity     [E]      true iff at least one channel covers the epoch and
//!                       none of those channels is flat or saturated there
//! chunk_*               AND over the epochs of each chunk (last chunk may
//!                       be partial)
//! ```
//!
//! Flat: epoch variance below `flatline_var_floor`.  Saturated: more than
//! `saturation_frac_ceiling` of the epoch's samples lie within
//! `saturation_tolerance · range` of the channel's global min or max.
use ndarray::{s, Array1, Array2, ArrayView1, Axis};

use crate::config::PipelineConfig;
use crate::epoch::{epoch_view, EpochGrid};
use crate::modality::Modality;
use crate::signal::NormalizedSignal;

/// Quality thresholds, taken from [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub var_floor: f32,
    pub saturation_ceiling: f32,
    pub saturation_tolerance: f32,
}

impl From<&PipelineConfig> for QualityThresholds {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            var_floor: cfg.flatline_var_floor,
            saturation_ceiling: cfg.saturation_frac_ceiling,
            saturation_tolerance: cfg.saturation_tolerance,
        }
    }
}

/// Epoch- and chunk-level masks of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct Masks {
    pub availability: Array2<bool>,
    pub validity: Array1<bool>,
    pub chunk_epochs: usize,
    pub chunk_availability: Array2<bool>,
    pub chunk_validity: Array1<bool>,
}

/// Number of complete epochs a channel covers.
fn covered_epochs(sig: &NormalizedSignal, grid: &EpochGrid) -> usize {
    if grid.epoch_samples == 0 {
        return 0;
    }
    (sig.samples.len() / grid.epoch_samples).min(grid.n_epochs)
}

/// `[E, 4]` availability.
pub fn availability_mask(signals: &[NormalizedSignal], grid: &EpochGrid) -> Array2<bool> {
    let mut mask = Array2::from_elem((grid.n_epochs, Modality::COUNT), false);
    for sig in signals {
        let covered = covered_epochs(sig, grid);
        mask.slice_mut(s![..covered, sig.modality.index()]).fill(true);
    }
    mask
}

/// Per-epoch flatline test.
pub fn is_flat(epoch: ArrayView1<f32>, var_floor: f32) -> bool {
    let n = epoch.len();
    if n == 0 {
        return true;
    }
    let mean = epoch.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = epoch.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n as f64;
    var < var_floor as f64
}

/// Per-epoch saturation test against the channel's global range.
pub fn is_saturated(epoch: ArrayView1<f32>, lo: f32, hi: f32, q: &QualityThresholds) -> bool {
    let range = hi - lo;
    if epoch.is_empty() || !(range > 0.0) {
        return false;
    }
    let tol = q.saturation_tolerance * range;
    let pinned = epoch.iter().filter(|&&v| v <= lo + tol || v >= hi - tol).count();
    pinned as f32 / epoch.len() as f32 > q.saturation_ceiling
}

/// `[E]` validity.
pub fn validity_mask(signals: &[NormalizedSignal], grid: &EpochGrid, q: &QualityThresholds) -> Array1<bool> {
    let mut covered_by = Array1::<usize>::zeros(grid.n_epochs);
    let mut failed = Array1::from_elem(grid.n_epochs, false);

    for sig in signals {
        let (lo, hi) = sig
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let view = epoch_view(&sig.samples, grid);
        for (e, row) in view.axis_iter(Axis(0)).enumerate() {
            covered_by[e] += 1;
            if is_flat(row, q.var_floor) || is_saturated(row, lo, hi, q) {
                failed[e] = true;
            }
        }
    }

    Array1::from_shape_fn(grid.n_epochs, |e| covered_by[e] > 0 && !failed[e])
}

/// AND-reduce consecutive groups of `chunk` rows.
pub fn chunk_reduce(epoch_mask: &Array2<bool>, chunk: usize) -> Array2<bool> {
    let n_cols = epoch_mask.ncols();
    if chunk == 0 {
        return Array2::from_elem((0, n_cols), false);
    }
    let n_rows = epoch_mask.nrows();
    Array2::from_shape_fn((n_rows.div_ceil(chunk), n_cols), |(c, m)| {
        let start = c * chunk;
        let end = (start + chunk).min(n_rows);
        epoch_mask.slice(s![start..end, m]).iter().all(|&v| v)
    })
}

/// AND-reduce consecutive groups of `chunk` epochs.
pub fn chunk_reduce_1d(epoch_mask: &Array1<bool>, chunk: usize) -> Array1<bool> {
    if chunk == 0 {
        return Array1::from_elem(0, false);
    }
    epoch_mask
        .axis_chunks_iter(Axis(0), chunk)
        .map(|block| block.iter().all(|&v| v))
        .collect()
}

/// Build every mask for one subject.
pub fn build_masks(signals: &[NormalizedSignal], grid: &EpochGrid, cfg: &PipelineConfig) -> Masks {
    let availability = availability_mask(signals, grid);
    let validity = validity_mask(signals, grid, &QualityThresholds::from(cfg));
    Masks {
        chunk_availability: chunk_reduce(&availability, cfg.chunk_epochs),
        chunk_validity: chunk_reduce_1d(&validity, cfg.chunk_epochs),
        chunk_epochs: cfg.chunk_epochs,
        availability,
        validity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormStats;
    use ndarray::array;

    fn sig(modality: Modality, samples: Vec<f32>) -> NormalizedSignal {
        NormalizedSignal {
            canonical: modality.as_str().into(),
            raw_name: modality.as_str().into(),
            modality,
            samples,
            sfreq: 10.0,
            native_sfreq: 10.0,
            stats: NormStats { center: 0.0, scale: 1.0, min: -1.0, max: 1.0 },
        }
    }

    fn wave(n: usize) -> Vec<f32> {
        (0..n).map(|i| (0.7 * i as f32).sin()).collect()
    }

    fn q() -> QualityThresholds {
        QualityThresholds::from(&PipelineConfig::default())
    }

    #[test]
    fn absent_modality_column_is_false() {
        let grid = EpochGrid::new(10.0, 1.0, 10.0);
        let m = availability_mask(&[sig(Modality::Cardiac, wave(100))], &grid);
        assert!(m.column(Modality::Cardiac.index()).iter().all(|&v| v));
        assert!(m.column(Modality::Muscle.index()).iter().all(|&v| !v));
    }

    #[test]
    fn short_channel_covers_leading_epochs_only() {
        let grid = EpochGrid::new(10.0, 1.0, 10.0);
        let m = availability_mask(&[sig(Modality::Respiratory, wave(65))], &grid);
        let col: Vec<bool> = m.column(Modality::Respiratory.index()).to_vec();
        assert_eq!(col, vec![true, true, true, true, true, true, false, false, false, false]);
    }

    #[test]
    fn flat_epoch_is_invalid() {
        let grid = EpochGrid::new(3.0, 1.0, 10.0);
        let mut x = wave(30);
        x[10..20].fill(0.25);
        let v = validity_mask(&[sig(Modality::BrainActivity, x)], &grid, &q());
        assert_eq!(v.to_vec(), vec![true, false, true]);
    }

    #[test]
    fn saturated_epoch_is_invalid() {
        let grid = EpochGrid::new(2.0, 1.0, 10.0);
        let mut x = wave(20);
        for v in &mut x[10..20] {
            *v = if *v > 0.0 { 3.0 } else { -3.0 };
        }
        let v = validity_mask(&[sig(Modality::Muscle, x)], &grid, &q());
        assert_eq!(v.to_vec(), vec![true, false]);
    }

    #[test]
    fn epoch_without_channels_is_invalid() {
        let grid = EpochGrid::new(4.0, 1.0, 10.0);
        let v = validity_mask(&[sig(Modality::Cardiac, wave(20))], &grid, &q());
        assert_eq!(v.to_vec(), vec![true, true, false, false]);
    }

    #[test]
    fn chunks_are_and_reductions() {
        let v = array![true, true, false, true, true, true, true];
        assert_eq!(chunk_reduce_1d(&v, 2).to_vec(), vec![true, false, true, true]);
        let a = array![[true, false], [true, true], [true, true]];
        assert_eq!(chunk_reduce(&a, 2), array![[true, false], [true, true]]);
    }
}
