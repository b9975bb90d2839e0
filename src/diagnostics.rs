//! Per-subject diagnostics.
//!
//! Coverage gaps and resolved source-data problems are never errors; they are
//! collected here and written into the artifact metadata so consumers can
//! filter subjects by coverage.
use serde::{Deserialize, Serialize};

use crate::annotation::{LabelConflict, MalformedInterval, StageSpanMismatch};
use crate::modality::{LimitedChannel, Modality};
use crate::resolve::DiscardedDuplicate;
use crate::signal::{InsufficientDuration, NonFiniteSamples};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostics {
    pub unresolved_channels: Vec<String>,
    pub discarded_duplicates: Vec<DiscardedDuplicate>,
    /// Candidate files not chosen by the duplicate selector.
    pub discarded_files: Vec<String>,
    pub insufficient_duration: Vec<InsufficientDuration>,
    pub limited_channels: Vec<LimitedChannel>,
    pub missing_modalities: Vec<Modality>,
    pub label_conflicts: Vec<LabelConflict>,
    pub malformed_intervals: Vec<MalformedInterval>,
    /// Stage records end more than two epochs away from the signal end.
    pub stage_span_mismatch: Option<StageSpanMismatch>,
    pub non_finite_samples: Vec<NonFiniteSamples>,
    /// No annotation source was available for the subject.
    pub annotations_missing: bool,
}

impl Diagnostics {
    /// Nothing to report.
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    /// Count of individual findings, for log summaries.
    pub fn count(&self) -> usize {
        self.unresolved_channels.len()
            + self.discarded_duplicates.len()
            + self.discarded_files.len()
            + self.insufficient_duration.len()
            + self.limited_channels.len()
            + self.missing_modalities.len()
            + self.label_conflicts.len()
            + self.malformed_intervals.len()
            + usize::from(self.stage_span_mismatch.is_some())
            + self.non_finite_samples.len()
            + usize::from(self.annotations_missing)
    }
}
