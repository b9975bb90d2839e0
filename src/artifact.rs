//! Per-subject output artifact.
//!
//! One safetensors file per subject:
//!
//! ```text
//! signal.<canonical>     F32  [T_c]    normalized samples at sample_rate
//! stages                 I32  [E]      stage code per epoch
//! availability           BOOL [E, 4]   brain, cardiac, muscle, respiratory
//! validity               BOOL [E]
//! chunk_availability     BOOL [C, 4]
//! chunk_validity         BOOL [C]
//! __metadata__.format    "psgnorm/1"
//! __metadata__.metadata  JSON ArtifactMetadata (source, alias table version,
//!                        per-channel stats, events, diagnostics)
//! ```
//!
//! The file only appears under its final name once completely written.
use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::annotation::{AlignedEvent, EpochLabel, SleepStage};
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::io::{StFile, StWriter};
use crate::mask::{chunk_reduce, chunk_reduce_1d, Masks};
use crate::modality::{Modality, PerModality};
use crate::normalize::NormStats;
use crate::signal::NormalizedSignal;

pub const ARTIFACT_FORMAT: &str = "psgnorm/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Canonical name; the tensor is `signal.<name>`.
    pub name: String,
    pub raw_name: String,
    pub modality: Modality,
    pub native_sfreq: f32,
    pub n_samples: usize,
    /// Needed to de-normalize.
    pub stats: NormStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub subject_id: String,
    pub source_path: String,
    pub alias_table_version: String,
    pub sample_rate: f32,
    pub epoch_dur: f32,
    pub epoch_samples: usize,
    pub n_epochs: usize,
    pub chunk_epochs: usize,
    pub start_time: Option<String>,
    pub duration_secs: f64,
    pub channels: Vec<ChannelMetadata>,
    pub modality_available: PerModality<bool>,
    pub full_coverage: bool,
    pub stage_distribution: BTreeMap<String, usize>,
    pub events: Vec<AlignedEvent>,
    pub diagnostics: Diagnostics,
}

/// Everything produced for one subject.
#[derive(Debug, Clone)]
pub struct SubjectArtifact {
    pub metadata: ArtifactMetadata,
    pub signals: Vec<NormalizedSignal>,
    pub labels: Vec<EpochLabel>,
    pub masks: Masks,
}

impl SubjectArtifact {
    pub fn stage_codes(&self) -> Vec<i32> {
        self.labels.iter().map(|l| l.stage.code()).collect()
    }

    fn to_writer(&self) -> Result<StWriter> {
        let mut w = StWriter::new();
        for sig in &self.signals {
            w.add_f32(&format!("signal.{}", sig.canonical), &sig.samples, &[sig.samples.len()]);
        }
        let stages = self.stage_codes();
        w.add_i32("stages", &stages, &[stages.len()]);
        w.add_bool_arr2("availability", &self.masks.availability);
        w.add_bool("validity", &self.masks.validity.to_vec(), &[self.masks.validity.len()]);
        w.add_bool_arr2("chunk_availability", &self.masks.chunk_availability);
        w.add_bool("chunk_validity", &self.masks.chunk_validity.to_vec(), &[self.masks.chunk_validity.len()]);
        w.add_metadata("format", ARTIFACT_FORMAT);
        w.add_metadata("metadata", serde_json::to_string(&self.metadata)?);
        Ok(w)
    }

    /// Serialised artifact.  Identical inputs give identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_writer()?.to_bytes().map_err(artifact_err)
    }

    /// Write atomically to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        self.to_writer()?.write_atomic(path).map_err(artifact_err)
    }
}

fn artifact_err(e: anyhow::Error) -> Error {
    Error::Artifact(format!("{e:#}"))
}

// ── Reading back ──────────────────────────────────────────────────────────

/// A finished artifact loaded from disk.
#[derive(Debug, Clone)]
pub struct ArtifactSummary {
    pub metadata: ArtifactMetadata,
    /// Canonical name → normalized samples.
    pub signals: BTreeMap<String, Vec<f32>>,
    pub stages: Vec<i32>,
    pub availability: Array2<bool>,
    pub validity: Array1<bool>,
    pub chunk_availability: Array2<bool>,
    pub chunk_validity: Array1<bool>,
}

fn read_mask2(st: &StFile, name: &str) -> Result<Array2<bool>> {
    let info = st.info(name).ok_or_else(|| Error::Artifact(format!("missing '{name}' tensor")))?;
    let &[rows, cols] = info.shape.as_slice() else {
        return Err(Error::Artifact(format!("'{name}' must be 2-D, got shape {:?}", info.shape)));
    };
    let data = st.bool(name).map_err(artifact_err)?;
    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Artifact(format!("'{name}': {e}")))
}

/// Load an artifact written by [`SubjectArtifact::write`].
pub fn read_artifact(path: &Path) -> Result<ArtifactSummary> {
    let st = StFile::open(path).map_err(artifact_err)?;
    match st.metadata().get("format") {
        Some(f) if f == ARTIFACT_FORMAT => {}
        other => return Err(Error::Artifact(format!("unexpected format {other:?}"))),
    }
    let json = st
        .metadata()
        .get("metadata")
        .ok_or_else(|| Error::Artifact("missing metadata block".into()))?;
    let metadata: ArtifactMetadata = serde_json::from_str(json)?;

    let mut signals = BTreeMap::new();
    for ch in &metadata.channels {
        let x = st.f32(&format!("signal.{}", ch.name)).map_err(artifact_err)?;
        signals.insert(ch.name.clone(), x);
    }
    Ok(ArtifactSummary {
        stages: st.i32("stages").map_err(artifact_err)?,
        availability: read_mask2(&st, "availability")?,
        validity: Array1::from(st.bool("validity").map_err(artifact_err)?),
        chunk_availability: read_mask2(&st, "chunk_availability")?,
        chunk_validity: Array1::from(st.bool("chunk_validity").map_err(artifact_err)?),
        metadata,
        signals,
    })
}

impl ArtifactSummary {
    /// Check the artifact is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let m = &self.metadata;
        let fail = |msg: String| Err(Error::Artifact(format!("{}: {msg}", m.subject_id)));

        if self.signals.is_empty() {
            return fail("no channels".into());
        }
        for ch in &m.channels {
            let n = self.signals.get(&ch.name).map_or(0, Vec::len);
            if n != ch.n_samples {
                return fail(format!("channel {} has {n} samples, metadata says {}", ch.name, ch.n_samples));
            }
            if self.signals[&ch.name].iter().any(|v| !v.is_finite()) {
                return fail(format!("channel {} holds non-finite samples", ch.name));
            }
        }
        if self.stages.len() != m.n_epochs {
            return fail(format!("{} stage labels for {} epochs", self.stages.len(), m.n_epochs));
        }
        let codes: Vec<i32> = SleepStage::ALL.iter().map(|s| s.code()).collect();
        if let Some(bad) = self.stages.iter().find(|c| !codes.contains(c)) {
            return fail(format!("unknown stage code {bad}"));
        }
        if self.availability.dim() != (m.n_epochs, Modality::COUNT) {
            return fail(format!("availability shape {:?}", self.availability.dim()));
        }
        if self.validity.len() != m.n_epochs {
            return fail(format!("validity length {}", self.validity.len()));
        }
        if m.chunk_epochs == 0
            || self.chunk_availability != chunk_reduce(&self.availability, m.chunk_epochs)
            || self.chunk_validity != chunk_reduce_1d(&self.validity, m.chunk_epochs)
        {
            return fail("chunk masks disagree with epoch masks".into());
        }
        for mo in Modality::ALL {
            let any = self.availability.column(mo.index()).iter().any(|&v| v);
            if any && !m.modality_available.get(mo) {
                return fail(format!("{mo} has epochs available but is marked absent"));
            }
        }
        Ok(())
    }
}
