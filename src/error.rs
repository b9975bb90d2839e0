//! Error types for the normalization engine.
//!
//! DSP helpers (`filter`, `resample`) return `anyhow::Result`; everything at
//! the engine boundary converts into [`Error`].  Coverage gaps and malformed
//! source data never surface here, they are recorded as
//! [`Diagnostics`](crate::diagnostics::Diagnostics) instead.
use std::path::PathBuf;

use thiserror::Error;

/// Engine error.  The per-subject variants abort one subject's pipeline only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The alias table maps one normalized raw name to two canonical channels.
    #[error("alias '{alias}' maps to both '{first}' and '{second}'")]
    AmbiguousAlias {
        alias: String,
        first: String,
        second: String,
    },

    #[error("subject '{subject}' has no candidate recordings")]
    NoCandidates { subject: String },

    #[error("cannot read recording {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("no channel in {} resolves to a canonical channel", path.display())]
    NoResolvableChannels { path: PathBuf },

    #[error("no channel in {} is long enough to process", path.display())]
    NoUsableChannels { path: PathBuf },

    #[error("channel '{channel}' is empty after resampling")]
    EmptySignal { channel: String },

    #[error("signal processing failed: {0}")]
    Dsp(String),

    #[error("malformed artifact: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an `anyhow` error coming out of the DSP layer.
    pub(crate) fn dsp(err: anyhow::Error) -> Self {
        Self::Dsp(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
