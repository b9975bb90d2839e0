//! Channel resolver: one recording's raw channel list → canonical channels.
//!
//! Each raw name is folded with [`normalize_name`] and looked up in the
//! [`AliasTable`].  Unknown names are a coverage gap, not an error.
//!
//! When several raw names land on the same canonical channel, exactly one is
//! kept.  Ranking, best first:
//!   1. fewest tokens (`"C3-M2"` beats `"EEG C3-M2"`),
//!   2. shortest match key,
//!   3. earliest position in the file.
//! The losers are reported as [`DiscardedDuplicate`]s.  The ranking only
//! depends on the names and their order, so resolving the same list twice
//! always gives the same result.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::alias::{normalize_name, AliasTable, CanonicalChannel, ChannelId};

/// A raw channel bound to its canonical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub raw_name: String,
    /// Position of the channel in the source file; the handle used to fetch
    /// its native rate and samples.
    pub source_index: usize,
    pub canonical: CanonicalChannel,
}

/// A raw channel dropped because a better-ranked spelling of the same
/// canonical channel exists in the recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedDuplicate {
    pub canonical: String,
    pub kept: String,
    pub discarded: String,
}

/// Result of resolving one recording's channel list.
#[derive(Debug, Clone, Default)]
pub struct ChannelResolution {
    /// At most one entry per canonical channel, sorted by [`ChannelId`].
    pub selected: Vec<ResolvedChannel>,
    /// Raw names with no alias-table entry, in file order.
    pub unresolved: Vec<String>,
    pub discarded: Vec<DiscardedDuplicate>,
}

impl ChannelResolution {
    pub fn get(&self, name: &str) -> Option<&ResolvedChannel> {
        self.selected.iter().find(|c| c.canonical.name == name)
    }
}

/// Resolve a single raw name.  Names that fold to the same key always
/// resolve identically.
pub fn resolve_name<'t>(raw: &str, table: &'t AliasTable) -> Option<&'t CanonicalChannel> {
    table.lookup(raw)
}

/// Resolve every raw channel of one recording.
pub fn resolve_channels(raw_names: &[String], table: &AliasTable) -> ChannelResolution {
    // (tokens, key length, file index) → lower is better.
    type Rank = (usize, usize, usize);
    let mut best: BTreeMap<ChannelId, (Rank, ResolvedChannel)> = BTreeMap::new();
    let mut unresolved = Vec::new();
    let mut discarded = Vec::new();

    for (index, raw) in raw_names.iter().enumerate() {
        let norm = normalize_name(raw);
        let Some(canonical) = table.lookup_key(&norm.key) else {
            unresolved.push(raw.clone());
            continue;
        };
        let rank = (norm.tokens, norm.key.len(), index);
        let candidate = ResolvedChannel {
            raw_name: raw.clone(),
            source_index: index,
            canonical: canonical.clone(),
        };

        match best.get_mut(&canonical.id) {
            None => {
                best.insert(canonical.id, (rank, candidate));
            }
            Some((held_rank, held)) => {
                let (kept, loser) = if rank < *held_rank {
                    let loser = std::mem::replace(held, candidate);
                    *held_rank = rank;
                    (held.raw_name.clone(), loser.raw_name)
                } else {
                    (held.raw_name.clone(), candidate.raw_name)
                };
                discarded.push(DiscardedDuplicate {
                    canonical: canonical.name.clone(),
                    kept,
                    discarded: loser,
                });
            }
        }
    }

    // A later, better spelling can displace an earlier winner; report every
    // loser against the final winner.
    for d in &mut discarded {
        if let Some((_, winner)) = best.values().find(|(_, w)| w.canonical.name == d.canonical) {
            d.kept = winner.raw_name.clone();
        }
    }

    if !unresolved.is_empty() {
        warn!(count = unresolved.len(), channels = ?unresolved, "unresolved channels");
    }
    for d in &discarded {
        warn!(canonical = %d.canonical, kept = %d.kept, discarded = %d.discarded, "duplicate channel discarded");
    }

    ChannelResolution {
        selected: best.into_values().map(|(_, ch)| ch).collect(),
        unresolved,
        discarded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shorter_spelling_wins_and_loser_is_logged() {
        let table = AliasTable::builtin().unwrap();
        for order in [["EEG C3-M2", "C3-M2"], ["C3-M2", "EEG C3-M2"]] {
            let r = resolve_channels(&names(&order), &table);
            assert_eq!(r.selected.len(), 1);
            assert_eq!(r.selected[0].raw_name, "C3-M2");
            assert_eq!(r.discarded.len(), 1);
            assert_eq!(r.discarded[0].discarded, "EEG C3-M2");
            assert_eq!(r.discarded[0].kept, "C3-M2");
        }
    }

    #[test]
    fn equal_rank_keeps_first_occurrence() {
        let table = AliasTable::builtin().unwrap();
        let r = resolve_channels(&names(&["C3-A2", "C3-M2"]), &table);
        assert_eq!(r.selected[0].raw_name, "C3-A2");
        assert_eq!(r.selected[0].source_index, 0);
    }

    #[test]
    fn winner_displaced_twice_reports_final_winner() {
        let table = AliasTable::builtin().unwrap();
        let r = resolve_channels(&names(&["EEG C3-A2", "C3-A2", "C3"]), &table);
        assert_eq!(r.selected[0].raw_name, "C3");
        assert_eq!(r.discarded.len(), 2);
        assert!(r.discarded.iter().all(|d| d.kept == "C3"));
    }

    #[test]
    fn unknown_channels_are_collected_not_fatal() {
        let table = AliasTable::builtin().unwrap();
        let r = resolve_channels(&names(&["Position", "C4-M1", "Light"]), &table);
        assert_eq!(r.unresolved, vec!["Position", "Light"]);
        assert_eq!(r.selected.len(), 1);
    }

    #[test]
    fn selection_sorted_by_table_order() {
        let table = AliasTable::builtin().unwrap();
        let r = resolve_channels(&names(&["ABDM", "EKG", "C4-M1", "C3-M2"]), &table);
        let got: Vec<&str> = r.selected.iter().map(|c| c.canonical.name.as_str()).collect();
        assert_eq!(got, vec!["C3-M2", "C4-M1", "EKG", "ABD"]);
    }
}
