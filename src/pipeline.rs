//! Per-subject pipeline and the batch worker pool.
//!
//! ```text
//! candidates ─ select ─ open ─ resolve ─ group ─ limit ─ normalize ─┐
//! annotations ─────────────────────────────────────────── align ───┤
//!                                                         mask ─────┴─→ artifact
//! ```
//!
//! Subjects are independent: each task reads its own files and writes its
//! own artifact, and the alias table and configuration are shared read-only.
//! A failure aborts that subject only and leaves no artifact behind.
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::alias::AliasTable;
use crate::annotation::{align_annotations, check_stage_span, Annotations};
use crate::artifact::{ArtifactMetadata, ChannelMetadata, SubjectArtifact};
use crate::config::PipelineConfig;
use crate::diagnostics::Diagnostics;
use crate::epoch::EpochGrid;
use crate::error::{Error, Result};
use crate::io::partial_path;
use crate::mask::build_masks;
use crate::modality::{group_channels, Modality};
use crate::recording::{RecordingDecoder, SubjectRecording};
use crate::resolve::resolve_channels;
use crate::select::select_one;
use crate::signal::normalize_channels;

/// Work item for one subject.
#[derive(Debug, Clone, Default)]
pub struct SubjectInput {
    pub subject_id: String,
    /// Candidate files for the subject-night; one is selected.
    pub candidates: Vec<PathBuf>,
    pub annotations: Option<Annotations>,
}

/// Run the whole pipeline for one subject.  Nothing is written.
pub fn process_subject(
    input: &SubjectInput,
    decoder: &dyn RecordingDecoder,
    table: &AliasTable,
    cfg: &PipelineConfig,
) -> Result<SubjectArtifact> {
    cfg.validate()?;
    let subject = &input.subject_id;
    let mut diag = Diagnostics::default();

    // ── Select ───────────────────────────────────────────────────────────
    let selection = select_one(&input.candidates)
        .ok_or_else(|| Error::NoCandidates { subject: subject.clone() })?;
    diag.discarded_files = selection.discarded.iter().map(|p| p.display().to_string()).collect();
    let path = selection.selected;
    debug!(subject = %subject, file = %path.display(), "selected recording");

    // ── Open + resolve ───────────────────────────────────────────────────
    let source = decoder
        .open(&path)
        .map_err(|e| Error::Unreadable { path: path.clone(), reason: format!("{e:#}") })?;
    let resolution = resolve_channels(source.channel_names(), table);
    if resolution.selected.is_empty() {
        return Err(Error::NoResolvableChannels { path });
    }
    diag.unresolved_channels = resolution.unresolved.clone();
    diag.discarded_duplicates = resolution.discarded.clone();

    let recording = SubjectRecording {
        subject_id: subject.clone(),
        source_path: path,
        start_time: source.start_time(),
        duration_secs: source.duration_secs(),
        resolution,
    };

    // ── Group + limit ────────────────────────────────────────────────────
    let mut groups = group_channels(&recording.resolution);
    diag.limited_channels = groups.apply_limits(&cfg.channel_limits);
    for l in &diag.limited_channels {
        warn!(subject = %subject, channel = %l.canonical, modality = %l.modality, "channel over modality limit dropped");
    }

    // ── Normalize ────────────────────────────────────────────────────────
    let report = normalize_channels(source.as_ref(), &recording.source_path, &groups, cfg)?;
    drop(source);
    diag.insufficient_duration = report.insufficient;
    diag.non_finite_samples = report.non_finite;
    let signals = report.signals;
    if signals.is_empty() {
        return Err(Error::NoUsableChannels { path: recording.source_path });
    }

    let modality_available = groups.availability();
    for m in Modality::ALL {
        if *modality_available.get(m) && !signals.iter().any(|s| s.modality == m) {
            debug!(subject = %subject, modality = %m, "modality present but every channel too short");
        }
    }
    diag.missing_modalities = groups.missing_modalities();

    // ── Align ────────────────────────────────────────────────────────────
    let grid = EpochGrid::new(recording.duration_secs, cfg.epoch_dur, cfg.target_sfreq);
    diag.annotations_missing = input.annotations.is_none();
    diag.stage_span_mismatch = input
        .annotations
        .as_ref()
        .and_then(|a| check_stage_span(a, recording.duration_secs, grid.epoch_dur));
    let aligned = align_annotations(input.annotations.as_ref(), &grid);
    let stage_distribution = aligned.stage_distribution();
    diag.label_conflicts = aligned.conflicts;
    diag.malformed_intervals = aligned.malformed;

    // ── Mask ─────────────────────────────────────────────────────────────
    let masks = build_masks(&signals, &grid, cfg);

    let metadata = ArtifactMetadata {
        subject_id: subject.clone(),
        source_path: recording.source_path.display().to_string(),
        alias_table_version: table.version().to_string(),
        sample_rate: cfg.target_sfreq,
        epoch_dur: cfg.epoch_dur,
        epoch_samples: grid.epoch_samples,
        n_epochs: grid.n_epochs,
        chunk_epochs: cfg.chunk_epochs,
        start_time: recording.start_time.clone(),
        duration_secs: recording.duration_secs,
        channels: signals
            .iter()
            .map(|s| ChannelMetadata {
                name: s.canonical.clone(),
                raw_name: s.raw_name.clone(),
                modality: s.modality,
                native_sfreq: s.native_sfreq,
                n_samples: s.samples.len(),
                stats: s.stats,
            })
            .collect(),
        full_coverage: groups.full_coverage(),
        modality_available,
        stage_distribution,
        events: aligned.events,
        diagnostics: diag,
    };

    info!(
        subject = %subject,
        channels = signals.len(),
        epochs = grid.n_epochs,
        valid = masks.validity.iter().filter(|&&v| v).count(),
        diagnostics = metadata.diagnostics.count(),
        "subject processed"
    );
    Ok(SubjectArtifact { metadata, signals, labels: aligned.labels, masks })
}

// ── Batch ─────────────────────────────────────────────────────────────────

/// Final artifact location of a subject.
pub fn artifact_path(out_dir: &Path, subject_id: &str) -> PathBuf {
    out_dir.join(format!("{subject_id}.safetensors"))
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Leave subjects whose artifact already exists untouched.
    pub skip_existing: bool,
    /// Worker threads; `None` uses the global rayon pool.
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubjectStatus {
    Completed { path: PathBuf },
    Skipped { path: PathBuf },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectOutcome {
    pub subject_id: String,
    #[serde(flatten)]
    pub status: SubjectStatus,
}

impl SubjectOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SubjectStatus::Failed { .. })
    }
}

/// Process one subject and write its artifact under `out_dir`.
pub fn run_subject(
    input: &SubjectInput,
    decoder: &dyn RecordingDecoder,
    table: &AliasTable,
    cfg: &PipelineConfig,
    out_dir: &Path,
    skip_existing: bool,
) -> SubjectOutcome {
    let path = artifact_path(out_dir, &input.subject_id);
    let status = if skip_existing && path.is_file() {
        debug!(subject = %input.subject_id, "artifact exists, skipped");
        SubjectStatus::Skipped { path }
    } else {
        match process_subject(input, decoder, table, cfg).and_then(|a| a.write(&path)) {
            Ok(()) => SubjectStatus::Completed { path },
            Err(e) => {
                error!(subject = %input.subject_id, error = %e, "subject failed");
                // An artifact from an earlier run must not outlive a failure.
                remove_if_present(&partial_path(&path));
                remove_if_present(&path);
                SubjectStatus::Failed { reason: e.to_string() }
            }
        }
    };
    SubjectOutcome { subject_id: input.subject_id.clone(), status }
}

/// Refuse an output directory that is the input directory: artifacts and raw
/// recordings share the `.safetensors` extension and the subject stem.
pub fn ensure_distinct_dirs(input_dir: &Path, out_dir: &Path) -> Result<()> {
    let input = input_dir.canonicalize()?;
    let same = match out_dir.canonicalize() {
        Ok(out) => out == input,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    if same {
        return Err(Error::Config(format!(
            "output directory {} is the input directory; artifacts would overwrite recordings",
            out_dir.display()
        )));
    }
    Ok(())
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(file = %path.display(), "stale artifact removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "cannot remove stale artifact"),
    }
}

/// Process every subject in parallel.  Outcomes come back in input order; a
/// failed subject never stops the others.
pub fn run_batch(
    inputs: &[SubjectInput],
    decoder: &dyn RecordingDecoder,
    table: &AliasTable,
    cfg: &PipelineConfig,
    out_dir: &Path,
    opts: &BatchOptions,
) -> Result<Vec<SubjectOutcome>> {
    cfg.validate()?;
    std::fs::create_dir_all(out_dir)?;

    let work = || -> Vec<SubjectOutcome> {
        inputs
            .par_iter()
            .map(|input| run_subject(input, decoder, table, cfg, out_dir, opts.skip_existing))
            .collect()
    };
    let outcomes = match opts.jobs {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .thread_name(|i| format!("psgnorm-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {e}")))?
            .install(work),
        None => work(),
    };

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    info!(subjects = outcomes.len(), failed, "batch finished");
    Ok(outcomes)
}
