//! Safetensors I/O.
//!
//! - [`StWriter`] / [`StFile`]: a minimal safetensors container writer and
//!   parser (F32, I32 and BOOL tensors plus the string `__metadata__` map).
//! - [`SafetensorsDecoder`]: reads raw multi-rate recordings laid out as
//!
//! ```text
//! ch.0, ch.1, …            F32 [n_i]   native samples, file channel order
//! __metadata__.format      "psgnorm-raw/1"
//! __metadata__.channels    raw names, newline-separated
//! __metadata__.sfreq.<i>   native rate of ch.<i> in Hz
//! __metadata__.start_time  optional
//! __metadata__.duration    optional, seconds
//! ```
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::recording::{RecordingDecoder, RecordingSource};

pub const RAW_FORMAT: &str = "psgnorm-raw/1";

// ── Writer ────────────────────────────────────────────────────────────────────

/// Simple safetensors writer.
///
/// ```rust,no_run
/// use psgnorm::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f32("signal", &[1.0f32, 2.0, 3.0], &[3]);
/// w.add_bool("valid", &[true, false], &[2]);
/// w.add_metadata("format", "demo");
/// w.write_atomic(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_bool(&mut self, name: &str, data: &[bool], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().map(|&b| u8::from(b)).collect();
        self.entries.push((name.to_string(), bytes, "BOOL", shape.to_vec()));
    }

    pub fn add_bool_arr2(&mut self, name: &str, arr: &ndarray::Array2<bool>) {
        let data: Vec<bool> = arr.iter().copied().collect();
        self.add_bool(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Serialise the whole container.  Header keys are sorted, so equal
    /// content always gives equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert("__metadata__".into(), serde_json::to_value(&self.metadata)?);
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            ensure!(name != "__metadata__", "tensor name '__metadata__' is reserved");
            let prev = header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            ensure!(prev.is_none(), "duplicate tensor name '{name}'");
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;

        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad + offset);
        out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend(std::iter::repeat(b' ').take(pad));
        for (_, data, _, _) in &self.entries {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?).with_context(|| format!("writing {}", path.display()))
    }

    /// Write to `<path>.partial`, then rename into place.  A file at `path`
    /// is therefore always complete.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp = partial_path(path);
        self.write(&tmp)?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} → {}", tmp.display(), path.display()))
    }
}

/// In-progress sibling of a final output path.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

// ── Parser ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data_offsets: [usize; 2],
}

impl TensorInfo {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A safetensors file held in memory.
#[derive(Debug, Clone)]
pub struct StFile {
    bytes: Vec<u8>,
    data_start: usize,
    tensors: BTreeMap<String, TensorInfo>,
    metadata: BTreeMap<String, String>,
}

impl StFile {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        ensure!(bytes.len() >= 8, "safetensors file too small");
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        ensure!(n <= bytes.len() - 8, "safetensors header overruns the file");

        let mut header: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..8 + n]).context("failed to parse safetensors header")?;
        let metadata = match header.remove("__metadata__") {
            Some(v) => serde_json::from_value(v).context("__metadata__ must be a string map")?,
            None => BTreeMap::new(),
        };
        let data_start = 8 + n;
        let data_len = bytes.len() - data_start;

        let mut tensors = BTreeMap::new();
        for (name, v) in header {
            let info: TensorInfo =
                serde_json::from_value(v).with_context(|| format!("bad header entry '{name}'"))?;
            let [s, e] = info.data_offsets;
            ensure!(s <= e && e <= data_len, "tensor '{name}' offsets out of range");
            let width = dtype_width(&info.dtype)?;
            ensure!(
                e - s == info.numel() * width,
                "tensor '{name}' holds {} bytes, shape {:?} needs {}",
                e - s,
                info.shape,
                info.numel() * width
            );
            tensors.insert(name, info);
        }
        Ok(Self { bytes, data_start, tensors, metadata })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name)
    }

    fn raw(&self, name: &str, dtype: &str) -> Result<&[u8]> {
        let info = self.tensors.get(name).with_context(|| format!("missing '{name}' tensor"))?;
        if info.dtype != dtype {
            bail!("tensor '{name}' is {}, expected {dtype}", info.dtype);
        }
        let [s, e] = info.data_offsets;
        Ok(&self.bytes[self.data_start + s..self.data_start + e])
    }

    pub fn f32(&self, name: &str) -> Result<Vec<f32>> {
        Ok(self
            .raw(name, "F32")?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn i32(&self, name: &str) -> Result<Vec<i32>> {
        Ok(self
            .raw(name, "I32")?
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn bool(&self, name: &str) -> Result<Vec<bool>> {
        Ok(self.raw(name, "BOOL")?.iter().map(|&b| b != 0).collect())
    }
}

fn dtype_width(dtype: &str) -> Result<usize> {
    Ok(match dtype {
        "F32" | "I32" => 4,
        "F64" | "I64" => 8,
        "BOOL" | "U8" | "I8" => 1,
        "F16" | "BF16" | "I16" => 2,
        other => bail!("unsupported dtype {other}"),
    })
}

// ── Raw recordings ────────────────────────────────────────────────────────────

/// A raw recording read from the layout above.
#[derive(Debug, Clone)]
pub struct SafetensorsRecording {
    names: Vec<String>,
    sfreqs: Vec<f32>,
    data: Vec<Vec<f32>>,
    start_time: Option<String>,
    duration: Option<f64>,
}

impl SafetensorsRecording {
    pub fn open(path: &Path) -> Result<Self> {
        let st = StFile::open(path)?;
        let meta = st.metadata();
        let names: Vec<String> = meta
            .get("channels")
            .context("missing 'channels' metadata")?
            .split('\n')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        ensure!(!names.is_empty(), "recording has no channels");

        let mut sfreqs = Vec::with_capacity(names.len());
        let mut data = Vec::with_capacity(names.len());
        for i in 0..names.len() {
            let sfreq: f32 = meta
                .get(&format!("sfreq.{i}"))
                .with_context(|| format!("missing sampling rate of channel {i}"))?
                .parse()
                .with_context(|| format!("bad sampling rate of channel {i}"))?;
            sfreqs.push(sfreq);
            data.push(st.f32(&format!("ch.{i}"))?);
        }
        let duration = match meta.get("duration") {
            Some(d) => Some(d.parse::<f64>().context("bad 'duration' metadata")?),
            None => None,
        };
        Ok(Self { names, sfreqs, data, start_time: meta.get("start_time").cloned(), duration })
    }
}

impl RecordingSource for SafetensorsRecording {
    fn channel_names(&self) -> &[String] {
        &self.names
    }

    fn sample_rate(&self, index: usize) -> f32 {
        self.sfreqs.get(index).copied().unwrap_or(0.0)
    }

    fn samples(&self, index: usize) -> Result<Cow<'_, [f32]>> {
        let x = self.data.get(index).with_context(|| format!("channel index {index} out of range"))?;
        Ok(Cow::Borrowed(x))
    }

    fn start_time(&self) -> Option<String> {
        self.start_time.clone()
    }

    fn duration_secs(&self) -> f64 {
        self.duration.unwrap_or_else(|| {
            self.data
                .iter()
                .zip(&self.sfreqs)
                .filter(|(_, sf)| **sf > 0.0)
                .map(|(x, &sf)| x.len() as f64 / sf as f64)
                .fold(0.0, f64::max)
        })
    }
}

/// Decoder for `*.safetensors` raw recordings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsDecoder;

impl RecordingDecoder for SafetensorsDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn RecordingSource>> {
        Ok(Box::new(SafetensorsRecording::open(path)?))
    }
}

/// Write any recording in the raw layout.
pub fn write_raw_recording(path: &Path, rec: &dyn RecordingSource) -> Result<()> {
    let mut w = StWriter::new();
    let names = rec.channel_names();
    for (i, name) in names.iter().enumerate() {
        ensure!(!name.contains('\n'), "channel name {name:?} contains a newline");
        let x = rec.samples(i)?;
        w.add_f32(&format!("ch.{i}"), &x, &[x.len()]);
        w.add_metadata(&format!("sfreq.{i}"), rec.sample_rate(i).to_string());
    }
    w.add_metadata("format", RAW_FORMAT);
    w.add_metadata("channels", names.join("\n"));
    w.add_metadata("duration", rec.duration_secs().to_string());
    if let Some(t) = rec.start_time() {
        w.add_metadata("start_time", t);
    }
    w.write_atomic(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::InMemoryRecording;

    #[test]
    fn container_round_trip() {
        let mut w = StWriter::new();
        w.add_f32("a", &[1.5, -2.0], &[2]);
        w.add_i32("b", &[-1, 5, 3], &[3]);
        w.add_bool("c", &[true, false, true, true], &[2, 2]);
        w.add_metadata("k", "v");
        let st = StFile::from_bytes(w.to_bytes().unwrap()).unwrap();
        assert_eq!(st.f32("a").unwrap(), vec![1.5, -2.0]);
        assert_eq!(st.i32("b").unwrap(), vec![-1, 5, 3]);
        assert_eq!(st.bool("c").unwrap(), vec![true, false, true, true]);
        assert_eq!(st.info("c").unwrap().shape, vec![2, 2]);
        assert_eq!(st.metadata()["k"], "v");
        assert!(st.f32("b").is_err());
    }

    #[test]
    fn header_is_eight_byte_aligned() {
        let mut w = StWriter::new();
        w.add_f32("x", &[0.0; 3], &[3]);
        let bytes = w.to_bytes().unwrap();
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        assert_eq!(n % 8, 0);
    }

    #[test]
    fn rejects_truncated_file() {
        let mut w = StWriter::new();
        w.add_f32("x", &[0.0; 16], &[16]);
        let mut bytes = w.to_bytes().unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(StFile::from_bytes(bytes).is_err());
    }

    #[test]
    fn raw_recording_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S_1.safetensors");
        let rec = InMemoryRecording::new()
            .with_channel("EEG C3-M2", 256.0, vec![0.5; 512])
            .with_channel("THOR", 32.0, vec![1.0; 64])
            .with_start_time("22:14:05");
        write_raw_recording(&path, &rec).unwrap();
        assert!(!partial_path(&path).exists());

        let back = SafetensorsDecoder.open(&path).unwrap();
        assert_eq!(back.channel_names(), rec.channel_names());
        assert_eq!(back.sample_rate(1), 32.0);
        assert_eq!(back.samples(0).unwrap().len(), 512);
        assert_eq!(back.start_time().as_deref(), Some("22:14:05"));
        assert_eq!(back.duration_secs(), 2.0);
    }
}
