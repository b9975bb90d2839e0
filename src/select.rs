//! Duplicate recording selector.
//!
//! Archives sometimes hold several files for one subject-night, e.g.
//! `S.edf`, `S_1.edf`, `S_2.edf`.  Files are grouped by base identifier (the
//! file stem with a trailing `_<suffix>` removed) and exactly one file per
//! group is kept:
//!
//! ```text
//! S.edf    → priority 0
//! S_1.edf  → priority 1
//! S_2.edf  → priority 2
//! S_x.edf  → priority 99   (any non-numeric suffix)
//! ```
//!
//! Lowest priority wins; ties fall back to lexicographic path order.  Only
//! file names are inspected, never channel content.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Priority given to a suffix that is not a repeat number.
pub const UNKNOWN_SUFFIX_PRIORITY: u32 = 99;

/// Base identifier and priority of one file stem.
///
/// This is the subject-key normalization shared with the metadata tables;
/// both sides must call it so that identifiers match exactly.
pub fn split_repeat_suffix(stem: &str) -> (&str, u32) {
    match stem.rsplit_once('_') {
        None => (stem, 0),
        Some((base, suffix)) if !base.is_empty() => {
            let priority = suffix.parse::<u32>().unwrap_or(UNKNOWN_SUFFIX_PRIORITY);
            (base, priority)
        }
        Some(_) => (stem, 0),
    }
}

/// Base identifier of a recording path.
pub fn base_identifier(path: &Path) -> String {
    let stem = file_stem(path);
    split_repeat_suffix(&stem).0.to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The file chosen for one base identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub base_id: String,
    pub selected: PathBuf,
    pub priority: u32,
    /// The other candidates, in path order.
    pub discarded: Vec<PathBuf>,
}

/// Group candidates by base identifier and pick one file per group.
///
/// Output is sorted by base identifier.
pub fn select_recordings<P: AsRef<Path>>(candidates: &[P]) -> Vec<Selection> {
    let mut groups: BTreeMap<String, Vec<(u32, PathBuf)>> = BTreeMap::new();
    for p in candidates {
        let path = p.as_ref();
        let stem = file_stem(path);
        let (base, priority) = split_repeat_suffix(&stem);
        groups
            .entry(base.to_string())
            .or_default()
            .push((priority, path.to_path_buf()));
    }

    groups
        .into_iter()
        .filter_map(|(base_id, mut files)| {
            files.sort();
            let mut rest = files.into_iter();
            let (priority, selected) = rest.next()?;
            let mut discarded: Vec<PathBuf> = rest.map(|(_, p)| p).collect();
            discarded.sort();
            for d in &discarded {
                warn!(subject = %base_id, kept = %selected.display(), discarded = %d.display(), "duplicate recording discarded");
            }
            Some(Selection { base_id, selected, priority, discarded })
        })
        .collect()
}

/// Pick one file from the candidates of a single subject.
pub fn select_one<P: AsRef<Path>>(candidates: &[P]) -> Option<Selection> {
    let mut all = select_recordings(candidates);
    if all.len() > 1 {
        // Candidates disagree on the base id; fall back to the best file overall.
        all.sort_by(|a, b| (a.priority, &a.selected).cmp(&(b.priority, &b.selected)));
        let mut iter = all.into_iter();
        let mut first = iter.next()?;
        for other in iter {
            first.discarded.push(other.selected);
            first.discarded.extend(other.discarded);
        }
        first.discarded.sort();
        return Some(first);
    }
    all.pop()
}
