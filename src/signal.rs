//! Signal normalizer: one canonical channel → the common timeline.
//!
//! ```text
//! native samples (sfreq_native)
//!   │
//!   ├─ sanitise        NaN / ±Inf → 0, counted
//!   ├─ duration check  < min_duration_secs → insufficient_duration (skip)
//!   ├─ band-limit      modality FIR band, zero-phase, at the native rate
//!   ├─ resample        FFT → target_sfreq
//!   └─ z-score         (x − μ) / σ from the resampled signal, stats kept
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::filter::{design_band, filter_zero_phase};
use crate::modality::{Modality, ModalityGroups};
use crate::normalize::{normalize_channel, NormStats};
use crate::recording::RecordingSource;
use crate::resample::resample_channel;
use crate::resolve::ResolvedChannel;

/// One channel on the common timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSignal {
    /// Canonical channel name.
    pub canonical: String,
    pub raw_name: String,
    pub modality: Modality,
    pub samples: Vec<f32>,
    /// Target rate, identical for every channel of a subject.
    pub sfreq: f32,
    pub native_sfreq: f32,
    pub stats: NormStats,
}

impl NormalizedSignal {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sfreq as f64
    }
}

/// A channel too short to process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsufficientDuration {
    pub canonical: String,
    pub raw_name: String,
    pub duration_secs: f64,
    pub min_secs: f64,
}

/// Non-finite native samples replaced by zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonFiniteSamples {
    pub canonical: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOutcome {
    Normalized(NormalizedSignal),
    InsufficientDuration(InsufficientDuration),
}

/// All channels of one recording after normalization.
#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    pub signals: Vec<NormalizedSignal>,
    pub insufficient: Vec<InsufficientDuration>,
    pub non_finite: Vec<NonFiniteSamples>,
}

/// Replace NaN and ±Inf with 0.  Returns how many were replaced.
pub fn sanitize_non_finite(x: &mut [f32]) -> usize {
    let mut n = 0;
    for v in x.iter_mut().filter(|v| !v.is_finite()) {
        *v = 0.0;
        n += 1;
    }
    n
}

/// Normalize one channel already sanitised.
pub fn normalize_signal(
    ch: &ResolvedChannel,
    mut samples: Vec<f32>,
    native_sfreq: f32,
    cfg: &PipelineConfig,
) -> Result<ChannelOutcome> {
    let name = &ch.canonical.name;
    let duration = if native_sfreq > 0.0 {
        samples.len() as f64 / native_sfreq as f64
    } else {
        0.0
    };
    if duration < cfg.min_duration_secs as f64 || samples.is_empty() {
        return Ok(ChannelOutcome::InsufficientDuration(InsufficientDuration {
            canonical: name.clone(),
            raw_name: ch.raw_name.clone(),
            duration_secs: duration,
            min_secs: cfg.min_duration_secs as f64,
        }));
    }

    let band = cfg.bands.get(ch.canonical.modality);
    if let Some(h) = design_band(band, native_sfreq) {
        debug!(channel = %name, taps = h.len(), native_sfreq, "band-limiting");
        samples = filter_zero_phase(&samples, &h).map_err(Error::dsp)?;
    }

    let mut out = resample_channel(&samples, native_sfreq, cfg.target_sfreq).map_err(Error::dsp)?;
    if out.is_empty() {
        return Err(Error::EmptySignal { channel: name.clone() });
    }
    let stats = normalize_channel(&mut out);

    Ok(ChannelOutcome::Normalized(NormalizedSignal {
        canonical: name.clone(),
        raw_name: ch.raw_name.clone(),
        modality: ch.canonical.modality,
        samples: out,
        sfreq: cfg.target_sfreq,
        native_sfreq,
        stats,
    }))
}

/// Normalize every grouped channel of an opened recording.
///
/// Channels come out modality by modality, in alias-table order within each.
/// A channel that cannot be read makes the whole file unreadable.
pub fn normalize_channels(
    source: &dyn RecordingSource,
    path: &Path,
    groups: &ModalityGroups,
    cfg: &PipelineConfig,
) -> Result<NormalizationReport> {
    let mut report = NormalizationReport::default();
    for ch in groups.iter() {
        let mut samples = source
            .samples(ch.source_index)
            .map_err(|e| Error::Unreadable { path: path.to_path_buf(), reason: format!("{e:#}") })?
            .into_owned();
        let replaced = sanitize_non_finite(&mut samples);
        if replaced > 0 {
            warn!(channel = %ch.canonical.name, count = replaced, "non-finite samples replaced with 0");
            report.non_finite.push(NonFiniteSamples { canonical: ch.canonical.name.clone(), count: replaced });
        }

        match normalize_signal(ch, samples, source.sample_rate(ch.source_index), cfg)? {
            ChannelOutcome::Normalized(sig) => report.signals.push(sig),
            ChannelOutcome::InsufficientDuration(flag) => {
                warn!(
                    channel = %flag.canonical,
                    duration = flag.duration_secs,
                    min = flag.min_secs,
                    "insufficient duration, channel skipped"
                );
                report.insufficient.push(flag);
            }
        }
    }
    Ok(report)
}
