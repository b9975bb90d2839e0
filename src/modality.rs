//! Modality taxonomy and the modality grouper.
//!
//! The four modality families are fixed.  The grouper never invents a new
//! category from data: every canonical channel carries its modality tag from
//! the alias table, and grouping is a pure partition of the resolved set.
//!
//! ```text
//! ResolvedChannel ─┬─ brain_activity  C3-M2, C4-M1, LOC, ROC …
//!                  ├─ cardiac         EKG, EKG2
//!                  ├─ muscle          CHIN, LLEG, RLEG
//!                  └─ respiratory     Thor, ABD
//! ```
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::resolve::{ChannelResolution, ResolvedChannel};

/// Physiological modality family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// EEG and EOG derivations.
    #[serde(alias = "bas", alias = "BAS", alias = "eeg", alias = "EEG", alias = "eog", alias = "EOG")]
    BrainActivity,
    #[serde(alias = "ecg", alias = "ECG", alias = "ekg", alias = "EKG")]
    Cardiac,
    #[serde(alias = "emg", alias = "EMG")]
    Muscle,
    #[serde(alias = "resp", alias = "RESP")]
    Respiratory,
}

impl Modality {
    /// All modalities in their fixed output order.
    pub const ALL: [Modality; 4] = [
        Modality::BrainActivity,
        Modality::Cardiac,
        Modality::Muscle,
        Modality::Respiratory,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Column index in availability masks.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::BrainActivity => "brain_activity",
            Modality::Cardiac => "cardiac",
            Modality::Muscle => "muscle",
            Modality::Respiratory => "respiratory",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brain_activity" | "bas" | "eeg" | "eog" => Ok(Modality::BrainActivity),
            "cardiac" | "ecg" | "ekg" => Ok(Modality::Cardiac),
            "muscle" | "emg" => Ok(Modality::Muscle),
            "respiratory" | "resp" => Ok(Modality::Respiratory),
            other => Err(Error::Config(format!("unknown modality '{other}'"))),
        }
    }
}

// ── Per-modality container ────────────────────────────────────────────────

/// One value per modality.  Used for filter bands, channel limits and
/// availability flags so that every modality is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerModality<T> {
    pub brain_activity: T,
    pub cardiac: T,
    pub muscle: T,
    pub respiratory: T,
}

impl<T> PerModality<T> {
    pub fn from_fn(mut f: impl FnMut(Modality) -> T) -> Self {
        Self {
            brain_activity: f(Modality::BrainActivity),
            cardiac: f(Modality::Cardiac),
            muscle: f(Modality::Muscle),
            respiratory: f(Modality::Respiratory),
        }
    }

    pub fn get(&self, m: Modality) -> &T {
        match m {
            Modality::BrainActivity => &self.brain_activity,
            Modality::Cardiac => &self.cardiac,
            Modality::Muscle => &self.muscle,
            Modality::Respiratory => &self.respiratory,
        }
    }

    pub fn get_mut(&mut self, m: Modality) -> &mut T {
        match m {
            Modality::BrainActivity => &mut self.brain_activity,
            Modality::Cardiac => &mut self.cardiac,
            Modality::Muscle => &mut self.muscle,
            Modality::Respiratory => &mut self.respiratory,
        }
    }

    /// Iterate `(modality, value)` in [`Modality::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Modality, &T)> {
        Modality::ALL.into_iter().map(move |m| (m, self.get(m)))
    }
}

// ── Grouper ───────────────────────────────────────────────────────────────

/// A channel removed because its modality exceeded the configured limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitedChannel {
    pub canonical: String,
    pub raw_name: String,
    pub modality: Modality,
}

/// Resolved channels partitioned by modality.
///
/// Within each modality, channels are kept in alias-table declaration order,
/// which doubles as the channel priority order.
#[derive(Debug, Clone, Default)]
pub struct ModalityGroups {
    members: PerModality<Vec<ResolvedChannel>>,
}

/// Partition the selected channels of one recording by modality tag.
pub fn group_channels(resolution: &ChannelResolution) -> ModalityGroups {
    let mut members: PerModality<Vec<ResolvedChannel>> = PerModality::default();
    for ch in &resolution.selected {
        members.get_mut(ch.canonical.modality).push(ch.clone());
    }
    for m in Modality::ALL {
        members.get_mut(m).sort_by_key(|ch| ch.canonical.id);
    }
    ModalityGroups { members }
}

impl ModalityGroups {
    pub fn channels(&self, m: Modality) -> &[ResolvedChannel] {
        self.members.get(m)
    }

    /// All grouped channels, modality by modality.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedChannel> {
        Modality::ALL.into_iter().flat_map(move |m| self.members.get(m).iter())
    }

    pub fn len(&self) -> usize {
        self.counts().iter().map(|(_, &n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `modality_available`: at least one canonical channel of `m` is present.
    pub fn available(&self, m: Modality) -> bool {
        !self.members.get(m).is_empty()
    }

    pub fn availability(&self) -> PerModality<bool> {
        PerModality::from_fn(|m| self.available(m))
    }

    /// Availability as a fixed-order vector (brain, cardiac, muscle, respiratory).
    pub fn availability_vector(&self) -> [bool; Modality::COUNT] {
        Modality::ALL.map(|m| self.available(m))
    }

    pub fn counts(&self) -> PerModality<usize> {
        PerModality::from_fn(|m| self.members.get(m).len())
    }

    /// True iff every modality has at least one channel.  Whether to reject a
    /// subject that fails this is left to the caller.
    pub fn full_coverage(&self) -> bool {
        Modality::ALL.iter().all(|&m| self.available(m))
    }

    pub fn available_modalities(&self) -> Vec<Modality> {
        Modality::ALL.into_iter().filter(|&m| self.available(m)).collect()
    }

    pub fn missing_modalities(&self) -> Vec<Modality> {
        Modality::ALL.into_iter().filter(|&m| !self.available(m)).collect()
    }

    /// Multimodal coverage check: at least `min` modalities present.
    pub fn has_min_modalities(&self, min: usize) -> bool {
        self.available_modalities().len() >= min
    }

    /// Keep at most `limits[m]` channels per modality, highest priority first.
    ///
    /// Returns the channels that were dropped.
    pub fn apply_limits(&mut self, limits: &PerModality<usize>) -> Vec<LimitedChannel> {
        let mut dropped = Vec::new();
        for m in Modality::ALL {
            let max = *limits.get(m);
            let group = self.members.get_mut(m);
            if group.len() > max {
                dropped.extend(group.drain(max..).map(|ch| LimitedChannel {
                    canonical: ch.canonical.name,
                    raw_name: ch.raw_name,
                    modality: m,
                }));
            }
        }
        dropped
    }
}
