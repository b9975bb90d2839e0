//! Alias table: raw channel spellings → canonical channels → modality.
//!
//! Raw names are compared through [`normalize_name`]: lowercase, with the
//! separators `- : _ . / ( ) [ ] ,` and whitespace stripped.  So `"C3-M2"`,
//! `"c3 m2"` and `"C3_M2"` all share the key `c3m2`.
//!
//! The alias → canonical map must be a function.  If two canonical channels
//! claim the same normalized alias, construction fails with
//! [`Error::AmbiguousAlias`] instead of silently picking one.
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::modality::Modality;

/// Index of a canonical channel in its table.  Declaration order is also the
/// channel priority order used when a modality has too many channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u16);

/// A dataset-independent channel identifier with its fixed modality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalChannel {
    pub id: ChannelId,
    pub name: String,
    pub modality: Modality,
}

/// A raw name reduced to its match key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    /// Lowercase, separators removed.
    pub key: String,
    /// Number of separator-delimited tokens in the raw spelling.
    pub tokens: usize,
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '-' | ':' | '_' | '.' | '/' | '(' | ')' | '[' | ']' | ',')
}

/// Case- and punctuation-fold a raw channel name.
pub fn normalize_name(raw: &str) -> NormalizedName {
    let mut key = String::with_capacity(raw.len());
    let mut tokens = 0;
    let mut in_token = false;
    for c in raw.chars() {
        if is_separator(c) {
            in_token = false;
            continue;
        }
        if !in_token {
            tokens += 1;
            in_token = true;
        }
        key.extend(c.to_lowercase());
    }
    NormalizedName { key, tokens }
}

// ── Table definition (TOML / built-in) ───────────────────────────────────

/// One `[[channel]]` entry of an alias-table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub modality: Modality,
    /// Raw spellings; the canonical name itself is always an alias.
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AliasFile {
    version: String,
    #[serde(rename = "channel")]
    channels: Vec<ChannelSpec>,
}

/// Immutable alias table.  Loaded once and shared by reference with workers.
#[derive(Debug, Clone)]
pub struct AliasTable {
    version: String,
    channels: Vec<CanonicalChannel>,
    index: HashMap<String, ChannelId>,
}

impl AliasTable {
    /// Build a table, checking that every alias key maps to one channel.
    pub fn new(version: impl Into<String>, specs: Vec<ChannelSpec>) -> Result<Self> {
        if specs.len() > u16::MAX as usize {
            return Err(Error::Config(format!("alias table has {} channels", specs.len())));
        }
        let mut channels: Vec<CanonicalChannel> = Vec::with_capacity(specs.len());
        let mut index: HashMap<String, ChannelId> = HashMap::new();

        for (i, spec) in specs.into_iter().enumerate() {
            if channels.iter().any(|c| c.name == spec.name) {
                return Err(Error::Config(format!("canonical channel '{}' declared twice", spec.name)));
            }
            let id = ChannelId(i as u16);
            for alias in std::iter::once(&spec.name).chain(spec.aliases.iter()) {
                let key = normalize_name(alias).key;
                if key.is_empty() {
                    return Err(Error::Config(format!("empty alias for '{}'", spec.name)));
                }
                match index.get(&key) {
                    Some(&other) if other != id => {
                        return Err(Error::AmbiguousAlias {
                            alias: alias.clone(),
                            first: channels[other.0 as usize].name.clone(),
                            second: spec.name.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        index.insert(key, id);
                    }
                }
            }
            channels.push(CanonicalChannel { id, name: spec.name, modality: spec.modality });
        }

        Ok(Self { version: version.into(), channels, index })
    }

    /// Parse a TOML alias table:
    ///
    /// ```toml
    /// version = "site-a-2"
    ///
    /// [[channel]]
    /// name = "C3-M2"
    /// modality = "brain_activity"
    /// aliases = ["C3-A2", "EEG C3-M2"]
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: AliasFile = toml::from_str(s)?;
        Self::new(file.version, file.channels)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The default table covering the STAGES, SHHS, APPLES and MrOS montages.
    pub fn builtin() -> Result<Self> {
        let specs = BUILTIN
            .iter()
            .map(|(name, modality, aliases)| ChannelSpec {
                name: (*name).to_string(),
                modality: *modality,
                aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            })
            .collect();
        Self::new(BUILTIN_VERSION, specs)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn channels(&self) -> &[CanonicalChannel] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&CanonicalChannel> {
        self.channels.get(id.0 as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&CanonicalChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Canonical channels belonging to one modality, in priority order.
    pub fn channels_of(&self, m: Modality) -> impl Iterator<Item = &CanonicalChannel> {
        self.channels.iter().filter(move |c| c.modality == m)
    }

    /// Look up a raw name.  `None` means unresolved.
    pub fn lookup(&self, raw: &str) -> Option<&CanonicalChannel> {
        self.lookup_key(&normalize_name(raw).key)
    }

    pub(crate) fn lookup_key(&self, key: &str) -> Option<&CanonicalChannel> {
        self.index.get(key).and_then(|&id| self.channel(id))
    }
}

// ── Built-in table ───────────────────────────────────────────────────────

pub const BUILTIN_VERSION: &str = "psgnorm-builtin-1";

use Modality::{BrainActivity as Bas, Cardiac as Ecg, Muscle as Emg, Respiratory as Resp};

#[rustfmt::skip]
const BUILTIN: &[(&str, Modality, &[&str])] = &[
    ("C3-M2", Bas, &["C3-A2", "EEG C3-M2", "EEG C3-A2", "C3", "EEG C3", "EEG(sec)", "EEG2", "EEG sec"]),
    ("C4-M1", Bas, &["C4-A1", "EEG C4-M1", "EEG C4-A1", "C4", "EEG C4", "EEG"]),
    ("F3-M2", Bas, &["F3-A2", "EEG F3-M2", "EEG F3-A2", "F3"]),
    ("F4-M1", Bas, &["F4-A1", "EEG F4-M1", "EEG F4-A1", "F4"]),
    ("O1-M2", Bas, &["O1-A2", "EEG O1-M2", "EEG O1-A2", "O1"]),
    ("O2-M1", Bas, &["O2-A1", "EEG O2-M1", "EEG O2-A1", "O2"]),
    ("LOC",   Bas, &["E1", "E1-M2", "E1-A2", "EOG(L)", "LEOG", "EOG LOC-A2", "EOG LOC-M2", "LOC-A2", "LOC-M2", "EOG E1-M2"]),
    ("ROC",   Bas, &["E2", "E2-M1", "E2-A1", "E2-M2", "EOG(R)", "REOG", "EOG ROC-A1", "EOG ROC-M1", "ROC-A1", "ROC-M1", "EOG E2-M1"]),
    ("EKG",   Ecg, &["ECG", "ECG I", "ECG1", "EKG1", "ECG L", "ECG LA-RA"]),
    ("EKG2",  Ecg, &["ECG2", "ECG II", "ECG R"]),
    ("CHIN",  Emg, &["Chin EMG", "EMG", "Chin1", "Chin1-Chin2", "EMG Chin", "Chin1-Chin3", "Chin2-Chin3"]),
    ("LLEG",  Emg, &["L Leg", "Leg L", "LLEG EMG", "Left Leg", "LEG(L)", "LAT"]),
    ("RLEG",  Emg, &["R Leg", "Leg R", "RLEG EMG", "Right Leg", "LEG(R)", "RAT"]),
    ("Thor",  Resp, &["THOR RES", "Thoracic", "Chest", "Thorax", "RIP Thora", "Thor Effort", "Effort THO"]),
    ("ABD",   Resp, &["ABDM", "ABDO RES", "Abdomen", "Abdominal", "ABDO", "RIP Abdom", "Abd Effort", "Effort ABD"]),
];
