//! Per-channel z-score normalisation.
//!
//! `normalize_channel`: statistics come from the resampled signal itself,
//!   μ = mean(x),  σ = std(x) (ddof=0)
//!   x = (x - μ) / σ
//!
//! A flat channel (σ = 0 or non-finite) is only centred (σ := 1).  No clipping
//! is applied: outliers are left for the validity mask to judge.  The
//! statistics are kept so that `denormalize` can undo the transform.
use serde::{Deserialize, Serialize};

/// Location/scale used to normalise one channel, plus its raw range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub center: f64,
    pub scale: f64,
    /// Minimum of the signal before normalisation.
    pub min: f64,
    /// Maximum of the signal before normalisation.
    pub max: f64,
}

impl NormStats {
    /// Compute mean / std / range in `f64`.
    pub fn compute(x: &[f32]) -> Self {
        if x.is_empty() {
            return Self { center: 0.0, scale: 1.0, min: 0.0, max: 0.0 };
        }
        let n = x.len() as f64;
        let mean = x.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = x
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let (min, max) = x.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v as f64), hi.max(v as f64))
        });
        let std = var.sqrt();
        let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
        Self { center: mean, scale, min, max }
    }
}

/// Z-score `x` in place and return the statistics used.
pub fn normalize_channel(x: &mut [f32]) -> NormStats {
    let stats = NormStats::compute(x);
    let (c, s) = (stats.center, stats.scale);
    x.iter_mut().for_each(|v| *v = ((*v as f64 - c) / s) as f32);
    stats
}

/// Undo [`normalize_channel`].
pub fn denormalize(x: &mut [f32], stats: &NormStats) {
    x.iter_mut()
        .for_each(|v| *v = (*v as f64 * stats.scale + stats.center) as f32);
}
