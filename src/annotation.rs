//! Annotation aligner: stage intervals and events → the epoch timeline.
//!
//! ```text
//!  stage records   [0,40) Wake     [30,70) N1
//!                  ├────────────┤
//!                           ├────────────┤
//!  epochs          |   0   |   1   |   2   |
//!  midpoints           15      45      75
//!  labels            Wake     N1    Unscored
//! ```
//!
//! - Stage: the record whose `[start, end)` covers the epoch midpoint.  When
//!   records overlap, the last one in file order wins and a
//!   [`LabelConflict`] is reported.  Uncovered epochs are `Unscored`.
//! - Events: attached to every epoch their span overlaps, partially or not.
//!   A zero-length event attaches to the epoch containing its start.
//! - Intervals with `end < start` (or `end == start` for stages) or
//!   non-finite bounds are skipped and reported as [`MalformedInterval`]s.
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::epoch::EpochGrid;
use crate::error::Result;

// ── Stage categories ──────────────────────────────────────────────────────

/// Sleep stage of one epoch.  Stage 4 is merged into N3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "StageRepr")]
pub enum SleepStage {
    Wake,
    N1,
    N2,
    N3,
    Rem,
    Unscored,
}

impl SleepStage {
    pub const ALL: [SleepStage; 6] = [
        SleepStage::Wake,
        SleepStage::N1,
        SleepStage::N2,
        SleepStage::N3,
        SleepStage::Rem,
        SleepStage::Unscored,
    ];

    /// Integer code written to the `stages` tensor.
    pub fn code(self) -> i32 {
        match self {
            SleepStage::Wake => 0,
            SleepStage::N1 => 1,
            SleepStage::N2 => 2,
            SleepStage::N3 => 3,
            SleepStage::Rem => 5,
            SleepStage::Unscored => -1,
        }
    }

    /// Scoring code → stage.  4 (old R&K stage 4) becomes N3; anything
    /// unknown is `Unscored`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => SleepStage::Wake,
            1 => SleepStage::N1,
            2 => SleepStage::N2,
            3 | 4 => SleepStage::N3,
            5 => SleepStage::Rem,
            _ => SleepStage::Unscored,
        }
    }

    /// Parse a scorer label.  Never fails: unknown labels are `Unscored`.
    ///
    /// Accepts NSRR concepts (`"Stage 2 sleep|2"`, `"REM sleep|5"`), short
    /// forms (`W`, `N1`…`N4`, `R`, `REM`, `?`) and integer codes.
    pub fn parse_label(label: &str) -> Self {
        let label = label.trim();
        if let Some((_, code)) = label.rsplit_once('|') {
            if let Ok(c) = code.trim().parse::<i64>() {
                return Self::from_code(c);
            }
        }
        if let Ok(c) = label.parse::<i64>() {
            return Self::from_code(c);
        }
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "w" | "wake" | "stagew" | "stage0" => SleepStage::Wake,
            "n1" | "s1" | "stage1" | "stage1sleep" | "nrem1" => SleepStage::N1,
            "n2" | "s2" | "stage2" | "stage2sleep" | "nrem2" => SleepStage::N2,
            "n3" | "n4" | "s3" | "s4" | "stage3" | "stage4" | "stage3sleep" | "stage4sleep"
            | "nrem3" | "sws" => SleepStage::N3,
            "r" | "rem" | "remsleep" | "stager" => SleepStage::Rem,
            _ => SleepStage::Unscored,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SleepStage::Wake => "wake",
            SleepStage::N1 => "n1",
            SleepStage::N2 => "n2",
            SleepStage::N3 => "n3",
            SleepStage::Rem => "rem",
            SleepStage::Unscored => "unscored",
        }
    }
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SleepStage {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse_label(s))
    }
}

impl Serialize for SleepStage {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StageRepr {
    Code(i64),
    Label(String),
}

impl From<StageRepr> for SleepStage {
    fn from(r: StageRepr) -> Self {
        match r {
            StageRepr::Code(c) => SleepStage::from_code(c),
            StageRepr::Label(s) => SleepStage::parse_label(&s),
        }
    }
}

// ── Input records ─────────────────────────────────────────────────────────

/// One scored interval, seconds from recording start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub start: f64,
    pub end: f64,
    pub stage: SleepStage,
}

/// One discrete event (apnea, arousal, desaturation…).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub start: f64,
    pub end: f64,
    #[serde(alias = "type", alias = "concept")]
    pub kind: String,
}

/// Parsed annotations of one subject, as delivered by the annotation source
/// or read from a JSON sidecar `{ "stages": [...], "events": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

impl Annotations {
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

// ── Output ────────────────────────────────────────────────────────────────

/// Two stage records that claim the same time span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConflict {
    /// File-order index of the losing record.
    pub earlier: usize,
    /// File-order index of the winning record.
    pub later: usize,
    pub earlier_stage: SleepStage,
    pub later_stage: SleepStage,
    pub overlap_start: f64,
    pub overlap_end: f64,
    /// Epochs whose midpoint falls inside the overlap.
    pub affected_epochs: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    Stage,
    Event,
}

/// An interval skipped because its bounds make no sense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedInterval {
    pub kind: IntervalKind,
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

/// Stage records end far from the end of the signal.  Labels are still
/// produced on the signal's grid: truncated when the hypnogram runs long,
/// padded with `Unscored` when it runs short.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageSpanMismatch {
    pub signal_secs: f64,
    pub annotation_secs: f64,
}

/// Largest tolerated gap between stage span and signal, in epochs.
pub const STAGE_SPAN_TOLERANCE_EPOCHS: f64 = 2.0;

/// Compare the end of the last well-formed stage record with the signal
/// duration.  A subject without stage records has a span of zero.
pub fn check_stage_span(ann: &Annotations, signal_secs: f64, epoch_dur: f64) -> Option<StageSpanMismatch> {
    let annotation_secs = ann
        .stages
        .iter()
        .filter(|r| r.start.is_finite() && r.end.is_finite() && r.end > r.start)
        .map(|r| r.end)
        .fold(0.0, f64::max);
    if (annotation_secs - signal_secs).abs() <= STAGE_SPAN_TOLERANCE_EPOCHS * epoch_dur {
        return None;
    }
    warn!(
        signal_secs,
        annotation_secs,
        action = if annotation_secs > signal_secs { "truncated" } else { "padded" },
        "stage records and signal disagree on duration"
    );
    Some(StageSpanMismatch { signal_secs, annotation_secs })
}

/// An event placed on the normalized timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedEvent {
    pub kind: String,
    pub start_secs: f64,
    pub end_secs: f64,
    /// Offsets at the target rate.
    pub start_sample: usize,
    pub end_sample: usize,
    /// Overlapped epochs, inclusive.  `None` when the event is off the grid.
    pub first_epoch: Option<usize>,
    pub last_epoch: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLabel {
    pub index: usize,
    pub stage: SleepStage,
    /// Indices into [`AlignedAnnotations::events`].
    pub events: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedAnnotations {
    pub labels: Vec<EpochLabel>,
    pub events: Vec<AlignedEvent>,
    pub conflicts: Vec<LabelConflict>,
    pub malformed: Vec<MalformedInterval>,
}

impl AlignedAnnotations {
    /// Stage codes, one per epoch.
    pub fn stage_codes(&self) -> Vec<i32> {
        self.labels.iter().map(|l| l.stage.code()).collect()
    }

    /// Epoch count per stage, every stage listed.
    pub fn stage_distribution(&self) -> BTreeMap<String, usize> {
        let mut dist: BTreeMap<String, usize> =
            SleepStage::ALL.iter().map(|s| (s.as_str().to_string(), 0)).collect();
        for l in &self.labels {
            *dist.entry(l.stage.as_str().to_string()).or_default() += 1;
        }
        dist
    }
}

/// Align annotations (or their absence) to `grid`.
pub fn align_annotations(annotations: Option<&Annotations>, grid: &EpochGrid) -> AlignedAnnotations {
    let mut labels: Vec<EpochLabel> = (0..grid.n_epochs)
        .map(|index| EpochLabel { index, stage: SleepStage::Unscored, events: vec![] })
        .collect();
    let Some(ann) = annotations else {
        return AlignedAnnotations { labels, ..Default::default() };
    };

    let mut malformed = Vec::new();

    // ── Stages ───────────────────────────────────────────────────────────
    let mut valid: Vec<usize> = Vec::with_capacity(ann.stages.len());
    for (i, r) in ann.stages.iter().enumerate() {
        if r.start.is_finite() && r.end.is_finite() && r.end > r.start {
            valid.push(i);
        } else {
            malformed.push(MalformedInterval { kind: IntervalKind::Stage, index: i, start: r.start, end: r.end });
        }
    }
    for &i in &valid {
        let r = &ann.stages[i];
        for e in grid.midpoints_within(r.start, r.end) {
            labels[e].stage = r.stage;
        }
    }
    let conflicts = find_conflicts(&ann.stages, &valid, grid);

    // ── Events ───────────────────────────────────────────────────────────
    let mut events = Vec::with_capacity(ann.events.len());
    for (i, ev) in ann.events.iter().enumerate() {
        if !(ev.start.is_finite() && ev.end.is_finite() && ev.end >= ev.start) {
            malformed.push(MalformedInterval { kind: IntervalKind::Event, index: i, start: ev.start, end: ev.end });
            continue;
        }
        let span = grid.overlapping(ev.start, ev.end);
        let slot = events.len();
        for e in span.clone() {
            labels[e].events.push(slot);
        }
        events.push(AlignedEvent {
            kind: ev.kind.clone(),
            start_secs: ev.start,
            end_secs: ev.end,
            start_sample: to_sample(ev.start, grid.sfreq),
            end_sample: to_sample(ev.end, grid.sfreq),
            first_epoch: (!span.is_empty()).then_some(span.start),
            last_epoch: (!span.is_empty()).then(|| span.end - 1),
        });
    }

    for c in &conflicts {
        warn!(
            earlier = c.earlier, later = c.later,
            start = c.overlap_start, end = c.overlap_end,
            winner = %c.later_stage, "overlapping stage records"
        );
    }
    if !malformed.is_empty() {
        warn!(count = malformed.len(), "malformed annotation intervals skipped");
    }

    AlignedAnnotations { labels, events, conflicts, malformed }
}

/// Pairwise overlaps between valid stage records, by sweep over start time.
fn find_conflicts(stages: &[StageRecord], valid: &[usize], grid: &EpochGrid) -> Vec<LabelConflict> {
    let mut order: Vec<usize> = valid.to_vec();
    order.sort_by(|&a, &b| stages[a].start.total_cmp(&stages[b].start).then(a.cmp(&b)));

    let mut conflicts = Vec::new();
    for (pos, &a) in order.iter().enumerate() {
        for &b in &order[pos + 1..] {
            if stages[b].start >= stages[a].end {
                break;
            }
            let (earlier, later) = (a.min(b), a.max(b));
            let lo = stages[a].start.max(stages[b].start);
            let hi = stages[a].end.min(stages[b].end);
            conflicts.push(LabelConflict {
                earlier,
                later,
                earlier_stage: stages[earlier].stage,
                later_stage: stages[later].stage,
                overlap_start: lo,
                overlap_end: hi,
                affected_epochs: grid.midpoints_within(lo, hi).collect(),
            });
        }
    }
    conflicts.sort_by_key(|c| (c.earlier, c.later));
    conflicts
}

fn to_sample(t: f64, sfreq: f64) -> usize {
    (t.max(0.0) * sfreq).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(secs: f64) -> EpochGrid {
        EpochGrid::new(secs, 30.0, 128.0)
    }

    fn stage(start: f64, end: f64, stage: SleepStage) -> StageRecord {
        StageRecord { start, end, stage }
    }

    #[test]
    fn parses_nsrr_and_short_labels() {
        assert_eq!(SleepStage::parse_label("Stage 4 sleep|4"), SleepStage::N3);
        assert_eq!(SleepStage::parse_label("REM sleep|5"), SleepStage::Rem);
        assert_eq!(SleepStage::parse_label("Wake|0"), SleepStage::Wake);
        assert_eq!(SleepStage::parse_label("Unscored|9"), SleepStage::Unscored);
        assert_eq!(SleepStage::parse_label("N2"), SleepStage::N2);
        assert_eq!(SleepStage::parse_label("R"), SleepStage::Rem);
        assert_eq!(SleepStage::parse_label("?"), SleepStage::Unscored);
        assert_eq!(SleepStage::parse_label("3"), SleepStage::N3);
    }

    #[test]
    fn codes() {
        let codes: Vec<i32> = SleepStage::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 5, -1]);
    }

    #[test]
    fn missing_annotations_are_unscored() {
        let a = align_annotations(None, &grid(300.0));
        assert_eq!(a.labels.len(), 10);
        assert!(a.labels.iter().all(|l| l.stage == SleepStage::Unscored && l.events.is_empty()));
        assert_eq!(a.stage_distribution()["unscored"], 10);
    }

    #[test]
    fn later_record_wins_overlap() {
        let ann = Annotations {
            stages: vec![stage(0.0, 40.0, SleepStage::Wake), stage(30.0, 70.0, SleepStage::N1)],
            events: vec![],
        };
        let a = align_annotations(Some(&ann), &grid(120.0));
        assert_eq!(a.labels[0].stage, SleepStage::Wake);
        assert_eq!(a.labels[1].stage, SleepStage::N1);
        assert_eq!(a.labels[2].stage, SleepStage::Unscored);
        assert_eq!(a.conflicts.len(), 1);
        let c = &a.conflicts[0];
        assert_eq!((c.earlier, c.later), (0, 1));
        assert_eq!((c.overlap_start, c.overlap_end), (30.0, 40.0));
        assert!(c.affected_epochs.is_empty());
    }

    #[test]
    fn file_order_beats_start_order() {
        // The later record starts first but still wins.
        let ann = Annotations {
            stages: vec![stage(30.0, 60.0, SleepStage::N2), stage(0.0, 90.0, SleepStage::Rem)],
            events: vec![],
        };
        let a = align_annotations(Some(&ann), &grid(90.0));
        assert_eq!(a.labels[1].stage, SleepStage::Rem);
        assert_eq!(a.conflicts[0].affected_epochs, vec![1]);
    }

    #[test]
    fn events_attach_to_overlapping_epochs() {
        let ann = Annotations {
            stages: vec![],
            events: vec![
                EventRecord { start: 25.0, end: 65.0, kind: "apnea".into() },
                EventRecord { start: 70.0, end: 70.0, kind: "arousal".into() },
                EventRecord { start: 10.0, end: 5.0, kind: "bad".into() },
            ],
        };
        let a = align_annotations(Some(&ann), &grid(120.0));
        assert_eq!(a.events.len(), 2);
        assert_eq!(a.labels[0].events, vec![0]);
        assert_eq!(a.labels[1].events, vec![0]);
        assert_eq!(a.labels[2].events, vec![0, 1]);
        assert_eq!(a.events[0].start_sample, 3200);
        assert_eq!((a.events[0].first_epoch, a.events[0].last_epoch), (Some(0), Some(2)));
        assert_eq!(a.malformed.len(), 1);
        assert_eq!(a.malformed[0].kind, IntervalKind::Event);
    }

    #[test]
    fn sidecar_json_accepts_codes_and_labels() {
        let ann = Annotations::from_json_str(
            r#"{"stages":[{"start":0,"end":30,"stage":"Stage 2 sleep|2"},
                          {"start":30,"end":60,"stage":5}],
                "events":[{"start":1.5,"end":12,"type":"Arousal"}]}"#,
        )
        .unwrap();
        assert_eq!(ann.stages[0].stage, SleepStage::N2);
        assert_eq!(ann.stages[1].stage, SleepStage::Rem);
        assert_eq!(ann.events[0].kind, "Arousal");
    }

    #[test]
    fn stage_span_within_two_epochs_is_accepted() {
        let ann = Annotations { stages: vec![stage(0.0, 3540.0, SleepStage::N2)], events: vec![] };
        assert_eq!(check_stage_span(&ann, 3600.0, 30.0), None);
    }

    #[test]
    fn stage_span_mismatch_both_ways() {
        let short = Annotations { stages: vec![stage(0.0, 1800.0, SleepStage::N2)], events: vec![] };
        let m = check_stage_span(&short, 3600.0, 30.0).unwrap();
        assert_eq!((m.signal_secs, m.annotation_secs), (3600.0, 1800.0));

        let long = Annotations { stages: vec![stage(0.0, 7200.0, SleepStage::N2)], events: vec![] };
        let m = check_stage_span(&long, 3600.0, 30.0).unwrap();
        assert_eq!(m.annotation_secs, 7200.0);

        // Malformed records do not extend the span.
        let bad = Annotations {
            stages: vec![stage(0.0, 3600.0, SleepStage::Wake), stage(9000.0, f64::NAN, SleepStage::N1)],
            events: vec![],
        };
        assert_eq!(check_stage_span(&bad, 3600.0, 30.0), None);
    }
}
