//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the per-subject
//! pipeline.  All fields have defaults matching the settings the archive-wide
//! corpus was produced with, and every field may be overridden from TOML.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::FilterBand;
use crate::modality::PerModality;

/// Configuration for the resolve → normalize → align → mask pipeline.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use psgnorm::PipelineConfig;
///
/// let cfg = PipelineConfig {
///     target_sfreq: 100.0,
///     chunk_epochs: 20,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(cfg.epoch_samples(), 3000);
/// ```
///
/// Or load a partial TOML file; missing keys keep their defaults.  A
/// `[bands]` or `[channel_limits]` table, when given, must list all four
/// modalities.
///
/// ```
/// use psgnorm::PipelineConfig;
///
/// let cfg = PipelineConfig::from_toml_str(r#"
///     min_duration_secs = 300.0
///     saturation_frac_ceiling = 0.5
/// "#).unwrap();
/// assert_eq!(cfg.min_duration_secs, 300.0);
/// assert_eq!(cfg.target_sfreq, 128.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Common sampling rate in Hz shared by every output channel.
    ///
    /// The resampler is skipped when a channel's native rate already equals
    /// this value (within 1 µHz).
    ///
    /// Default: `128.0` Hz.
    pub target_sfreq: f32,

    /// Duration of one scoring epoch in seconds.
    ///
    /// At the default 30 s / 128 Hz each epoch spans **3 840 samples**.
    ///
    /// Default: `30.0` s.
    pub epoch_dur: f32,

    /// Number of consecutive epochs per chunk for the chunk-level masks.
    ///
    /// A trailing partial chunk is kept.
    ///
    /// Default: `10` (5-minute chunks).
    pub chunk_epochs: usize,

    /// Channels whose native duration is shorter than this are flagged
    /// `insufficient_duration` and not processed.
    ///
    /// Default: `60.0` s.
    pub min_duration_secs: f32,

    /// Flatline threshold: an epoch channel with variance (in normalized
    /// units²) below this floor fails the quality check.
    ///
    /// Default: `1e-6`.
    pub flatline_var_floor: f32,

    /// Saturation threshold: an epoch channel with more than this fraction of
    /// its samples pinned at the channel's amplitude extremes fails the
    /// quality check.
    ///
    /// Default: `0.2`.
    pub saturation_frac_ceiling: f32,

    /// How close to the extremes a sample must be to count as pinned, as a
    /// fraction of the channel's amplitude range.
    ///
    /// Default: `1e-3`.
    pub saturation_tolerance: f32,

    /// Band-limiting filter per modality, applied at the native rate.
    ///
    /// Defaults: brain activity 0.3–35 Hz, cardiac 0.5–45 Hz,
    /// muscle 10–100 Hz, respiratory 0.05–2 Hz, automatic FIR length.
    pub bands: PerModality<FilterBand>,

    /// Maximum number of channels kept per modality.  Channels beyond the
    /// limit are dropped in alias-table order and reported as
    /// `limited_channels`.
    ///
    /// Defaults: brain activity 10, cardiac 2, muscle 4, respiratory 7.
    pub channel_limits: PerModality<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_sfreq: 128.0,
            epoch_dur: 30.0,
            chunk_epochs: 10,
            min_duration_secs: 60.0,
            flatline_var_floor: 1e-6,
            saturation_frac_ceiling: 0.2,
            saturation_tolerance: 1e-3,
            bands: PerModality {
                brain_activity: FilterBand::new(0.3, 35.0),
                cardiac: FilterBand::new(0.5, 45.0),
                muscle: FilterBand::new(10.0, 100.0),
                respiratory: FilterBand::new(0.05, 2.0),
            },
            channel_limits: PerModality {
                brain_activity: 10,
                cardiac: 2,
                muscle: 4,
                respiratory: 7,
            },
        }
    }
}

impl PipelineConfig {
    /// Number of samples per epoch at the target rate:
    /// `round(epoch_dur × target_sfreq)`, the same rule the resampler uses
    /// for output lengths.
    ///
    /// ```
    /// use psgnorm::PipelineConfig;
    /// assert_eq!(PipelineConfig::default().epoch_samples(), 3840);
    /// ```
    pub fn epoch_samples(&self) -> usize {
        (self.epoch_dur as f64 * self.target_sfreq as f64).round() as usize
    }

    /// Parse a TOML document and check it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.target_sfreq.is_finite() && self.target_sfreq > 0.0) {
            return Err(Error::Config(format!("target_sfreq must be positive, got {}", self.target_sfreq)));
        }
        if !(self.epoch_dur.is_finite() && self.epoch_dur > 0.0) {
            return Err(Error::Config(format!("epoch_dur must be positive, got {}", self.epoch_dur)));
        }
        if self.epoch_samples() == 0 {
            return Err(Error::Config("epoch shorter than one sample".into()));
        }
        if self.chunk_epochs == 0 {
            return Err(Error::Config("chunk_epochs must be at least 1".into()));
        }
        if !(self.min_duration_secs.is_finite() && self.min_duration_secs >= 0.0) {
            return Err(Error::Config(format!(
                "min_duration_secs must be finite and not negative, got {}",
                self.min_duration_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.saturation_frac_ceiling) {
            return Err(Error::Config(format!(
                "saturation_frac_ceiling must lie in [0, 1], got {}",
                self.saturation_frac_ceiling
            )));
        }
        for (m, band) in self.bands.iter() {
            if let (Some(lo), Some(hi)) = (band.low_hz, band.high_hz) {
                if lo >= hi {
                    return Err(Error::Config(format!("{m} band: low_hz {lo} ≥ high_hz {hi}")));
                }
            }
        }
        Ok(())
    }
}
