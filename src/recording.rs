//! Source recordings: the decoder contract and the per-subject record.
//!
//! A decoder turns a file path into a [`RecordingSource`], which exposes the
//! raw channel names, per-channel native rate and samples, and recording
//! timing.  The engine never depends on a concrete file format; the
//! safetensors decoder in [`crate::io`] and [`InMemoryRecording`] are the two
//! implementations shipped with the crate.
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, ensure, Result};

use crate::resolve::ChannelResolution;

/// One opened recording file.
pub trait RecordingSource: Send {
    /// Raw channel names in file order.
    fn channel_names(&self) -> &[String];

    /// Native sampling rate of channel `index` in Hz.
    fn sample_rate(&self, index: usize) -> f32;

    /// Native samples of channel `index`.
    fn samples(&self, index: usize) -> Result<Cow<'_, [f32]>>;

    /// Recording start timestamp, as written by the source.
    fn start_time(&self) -> Option<String> {
        None
    }

    /// Recording duration in seconds.
    fn duration_secs(&self) -> f64;
}

/// Opens recording files.  Shared read-only across worker threads.
pub trait RecordingDecoder: Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn RecordingSource>>;
}

// ── In-memory recordings ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct MemChannel {
    name: String,
    sfreq: f32,
    samples: Vec<f32>,
}

/// A recording held entirely in memory.
///
/// ```
/// use psgnorm::recording::{InMemoryRecording, RecordingSource};
///
/// let rec = InMemoryRecording::new()
///     .with_channel("C3-M2", 256.0, vec![0.0; 256 * 60])
///     .with_channel("THOR", 32.0, vec![0.0; 32 * 60]);
/// assert_eq!(rec.channel_names().len(), 2);
/// assert_eq!(rec.duration_secs(), 60.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryRecording {
    names: Vec<String>,
    channels: Vec<MemChannel>,
    start_time: Option<String>,
    duration: Option<f64>,
}

impl InMemoryRecording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, name: &str, sfreq: f32, samples: Vec<f32>) -> Self {
        self.push_channel(name, sfreq, samples);
        self
    }

    pub fn push_channel(&mut self, name: &str, sfreq: f32, samples: Vec<f32>) {
        self.names.push(name.to_string());
        self.channels.push(MemChannel { name: name.to_string(), sfreq, samples });
    }

    pub fn with_start_time(mut self, start: impl Into<String>) -> Self {
        self.start_time = Some(start.into());
        self
    }

    /// Override the duration derived from the longest channel.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    fn channel(&self, index: usize) -> Result<&MemChannel> {
        self.channels
            .get(index)
            .ok_or_else(|| anyhow!("channel index {index} out of range ({} channels)", self.channels.len()))
    }
}

impl RecordingSource for InMemoryRecording {
    fn channel_names(&self) -> &[String] {
        &self.names
    }

    fn sample_rate(&self, index: usize) -> f32 {
        self.channels.get(index).map_or(0.0, |c| c.sfreq)
    }

    fn samples(&self, index: usize) -> Result<Cow<'_, [f32]>> {
        let ch = self.channel(index)?;
        ensure!(ch.sfreq > 0.0, "channel '{}' has no sampling rate", ch.name);
        Ok(Cow::Borrowed(&ch.samples))
    }

    fn start_time(&self) -> Option<String> {
        self.start_time.clone()
    }

    fn duration_secs(&self) -> f64 {
        self.duration.unwrap_or_else(|| {
            self.channels
                .iter()
                .filter(|c| c.sfreq > 0.0)
                .map(|c| c.samples.len() as f64 / c.sfreq as f64)
                .fold(0.0, f64::max)
        })
    }
}

/// Decoder over a fixed set of in-memory recordings keyed by path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDecoder {
    recordings: HashMap<PathBuf, InMemoryRecording>,
}

impl InMemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, rec: InMemoryRecording) {
        self.recordings.insert(path.into(), rec);
    }
}

impl RecordingDecoder for InMemoryDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn RecordingSource>> {
        let rec = self
            .recordings
            .get(path)
            .ok_or_else(|| anyhow!("no such recording: {}", path.display()))?;
        Ok(Box::new(rec.clone()))
    }
}

// ── Subject record ────────────────────────────────────────────────────────

/// One subject-night after selection and resolution.  Built once per subject
/// and left untouched while its signals are normalized.
#[derive(Debug, Clone)]
pub struct SubjectRecording {
    pub subject_id: String,
    /// The single file chosen by the duplicate selector.
    pub source_path: PathBuf,
    pub resolution: ChannelResolution,
    pub start_time: Option<String>,
    pub duration_secs: f64,
}
