//! # psgnorm — polysomnography channel mapping, normalization and masks
//!
//! `psgnorm` turns heterogeneous PSG recordings from independently curated
//! archives into one uniform per-subject representation: canonical channels
//! grouped into four modalities, band-limited and resampled to a common rate,
//! z-scored, labelled per 30 s epoch, and described by availability and
//! validity masks.
//!
//! ## Pipeline overview
//!
//! ```text
//! S.edf  S_1.edf  S_2.edf          (+ stage / event annotations)
//!   │
//!   ├─ select::select_one()        one file per subject-night (suffix priority)
//!   ├─ resolve::resolve_channels() raw names → canonical channels (alias table)
//!   ├─ modality::group_channels()  brain · cardiac · muscle · respiratory
//!   ├─ signal::normalize_channels()
//!   │     ├─ filter                modality FIR band, zero-phase
//!   │     ├─ resample              FFT → target_sfreq (default 128 Hz)
//!   │     └─ normalize             (x − μ) / σ, stats kept
//!   ├─ annotation::align_annotations()   stage per epoch midpoint, events
//!   └─ mask::build_masks()         availability [E, 4], validity [E], chunks
//!        │
//!        └─→ <subject>.safetensors (artifact::SubjectArtifact)
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use psgnorm::{process_subject, AliasTable, PipelineConfig, SubjectInput};
//! use psgnorm::io::SafetensorsDecoder;
//! use std::path::PathBuf;
//!
//! let table = AliasTable::builtin().unwrap();
//! let cfg = PipelineConfig::default();
//! let input = SubjectInput {
//!     subject_id: "shhs1-200001".into(),
//!     candidates: vec![PathBuf::from("raw/shhs1-200001.safetensors")],
//!     annotations: None,
//! };
//! let artifact = process_subject(&input, &SafetensorsDecoder, &table, &cfg).unwrap();
//! println!("{} epochs, {} channels", artifact.labels.len(), artifact.signals.len());
//! artifact.write("out/shhs1-200001.safetensors".as_ref()).unwrap();
//! ```
//!
//! ## Running many subjects
//!
//! [`run_batch`] maps subjects over a rayon pool.  Each subject writes its own
//! artifact; a failing subject is reported in its [`SubjectOutcome`] and never
//! stops the others.

pub mod alias;
pub mod annotation;
pub mod artifact;
pub mod config;
pub mod diagnostics;
pub mod epoch;
pub mod error;
pub mod filter;
pub mod io;
pub mod mask;
pub mod modality;
pub mod normalize;
pub mod pipeline;
pub mod recording;
pub mod resample;
pub mod resolve;
pub mod select;
pub mod signal;

// ── Crate-root re-exports ─────────────────────────────────────────────────

pub use alias::{normalize_name, AliasTable, CanonicalChannel, ChannelId, ChannelSpec, BUILTIN_VERSION};
pub use annotation::{
    align_annotations, check_stage_span, AlignedAnnotations, AlignedEvent, Annotations, EpochLabel,
    EventRecord, LabelConflict, SleepStage, StageRecord, StageSpanMismatch,
};
pub use artifact::{read_artifact, ArtifactMetadata, ArtifactSummary, SubjectArtifact, ARTIFACT_FORMAT};
pub use config::PipelineConfig;
pub use diagnostics::Diagnostics;
pub use epoch::EpochGrid;
pub use error::{Error, Result};
pub use filter::FilterBand;
pub use mask::{build_masks, Masks};
pub use modality::{group_channels, Modality, ModalityGroups, PerModality};
pub use normalize::{denormalize, normalize_channel, NormStats};
pub use pipeline::{
    artifact_path, ensure_distinct_dirs, process_subject, run_batch, run_subject, BatchOptions,
    SubjectInput, SubjectOutcome, SubjectStatus,
};
pub use recording::{InMemoryDecoder, InMemoryRecording, RecordingDecoder, RecordingSource, SubjectRecording};
pub use resample::resample_channel;
pub use resolve::{resolve_channels, resolve_name, ChannelResolution, DiscardedDuplicate, ResolvedChannel};
pub use select::{base_identifier, select_one, select_recordings, Selection};
pub use signal::{normalize_channels, NormalizedSignal};
