mod common;
use common::{alternating_stages, psg_recording};
use psgnorm::io::{write_raw_recording, SafetensorsDecoder};
use psgnorm::{
    artifact_path, process_subject, read_artifact, run_batch, AliasTable, Annotations,
    BatchOptions, EventRecord, InMemoryDecoder, Modality, PipelineConfig, SleepStage,
    SubjectInput, SubjectStatus,
};
use std::path::PathBuf;

fn input(id: &str, file: &str, annotations: Option<Annotations>) -> SubjectInput {
    SubjectInput {
        subject_id: id.into(),
        candidates: vec![PathBuf::from(file)],
        annotations,
    }
}

fn night_annotations(secs: f64) -> Annotations {
    let mut ann = alternating_stages(secs, 30.0);
    ann.events.push(EventRecord { start: 100.0, end: 130.0, kind: "Hypopnea".into() });
    ann
}

#[test]
fn one_hour_brain_and_respiratory_night() {
    let mut dec = InMemoryDecoder::new();
    dec.insert("raw/S.edf", psg_recording(256.0, 3600.0));
    let table = AliasTable::builtin().unwrap();
    let cfg = PipelineConfig::default();

    let a = process_subject(&input("S", "raw/S.edf", Some(night_annotations(3600.0))), &dec, &table, &cfg)
        .unwrap();

    // Labels: one per 30 s epoch, alternating Wake / N1.
    assert_eq!(a.labels.len(), 120);
    for (e, l) in a.labels.iter().enumerate() {
        let expect = if e % 2 == 0 { SleepStage::Wake } else { SleepStage::N1 };
        assert_eq!(l.stage, expect, "epoch {e}");
    }
    assert_eq!(a.labels[3].events, [0]);
    assert_eq!(a.labels[4].events, [0]);

    // Channels on the common timeline.
    let names: Vec<&str> = a.signals.iter().map(|s| s.canonical.as_str()).collect();
    assert_eq!(names, ["C3-M2", "Thor", "ABD"]);
    for s in &a.signals {
        assert_eq!(s.sfreq, 128.0);
        assert_eq!(s.native_sfreq, 256.0);
        assert_eq!(s.samples.len(), 3600 * 128);
        let n = s.samples.len() as f64;
        let mean = s.samples.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = s.samples.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(var, 1.0, epsilon = 1e-3);
    }

    // Masks.
    let m = &a.masks;
    assert_eq!(m.availability.dim(), (120, 4));
    for (mo, expect) in [
        (Modality::BrainActivity, true),
        (Modality::Cardiac, false),
        (Modality::Muscle, false),
        (Modality::Respiratory, true),
    ] {
        assert!(m.availability.column(mo.index()).iter().all(|&v| v == expect), "{mo}");
    }
    assert!(m.validity.iter().all(|&v| v));
    assert_eq!(m.chunk_availability.dim(), (12, 4));

    // Metadata.
    let md = &a.metadata;
    assert_eq!(md.n_epochs, 120);
    assert_eq!(md.epoch_samples, 3840);
    assert!(!md.full_coverage);
    assert!(*md.modality_available.get(Modality::Respiratory));
    assert!(!*md.modality_available.get(Modality::Cardiac));
    assert_eq!(md.diagnostics.missing_modalities, vec![Modality::Cardiac, Modality::Muscle]);
    assert!(!md.diagnostics.annotations_missing);
    assert_eq!(md.stage_distribution["wake"], 60);
    assert_eq!(md.stage_distribution["n1"], 60);
    assert_eq!(md.start_time.as_deref(), Some("2001-03-14T22:41:00"));
    assert_eq!(md.events.len(), 1);
}

#[test]
fn identical_inputs_give_identical_bytes() {
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", psg_recording(200.0, 300.0));
    let table = AliasTable::builtin().unwrap();
    let cfg = PipelineConfig::default();
    let inp = input("S", "S.edf", Some(night_annotations(300.0)));

    let a = process_subject(&inp, &dec, &table, &cfg).unwrap().to_bytes().unwrap();
    let b = process_subject(&inp, &dec, &table, &cfg).unwrap().to_bytes().unwrap();
    assert_eq!(a, b);
}

#[test]
fn written_artifact_reads_back_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", psg_recording(128.0, 600.0));
    let table = AliasTable::builtin().unwrap();
    let cfg = PipelineConfig::default();
    let inputs = vec![input("S", "S.edf", Some(night_annotations(600.0)))];

    let out = run_batch(&inputs, &dec, &table, &cfg, dir.path(), &BatchOptions::default()).unwrap();
    assert!(matches!(out[0].status, SubjectStatus::Completed { .. }));

    let path = artifact_path(dir.path(), "S");
    let summary = read_artifact(&path).unwrap();
    summary.validate().unwrap();
    assert_eq!(summary.stages.len(), 20);
    assert_eq!(summary.stages[..4], [0, 1, 0, 1]);
    assert_eq!(summary.signals.len(), 3);
    assert_eq!(summary.signals["Thor"].len(), 600 * 128);
    assert_eq!(summary.metadata.alias_table_version, table.version());
    assert_eq!(summary.chunk_validity.len(), 2);

    // Nothing left behind but the artifact.
    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(files.len(), 1);
}

#[test]
fn safetensors_recording_matches_in_memory_source() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("S.safetensors");
    let rec = psg_recording(256.0, 300.0);
    write_raw_recording(&raw, &rec).unwrap();

    let mut dec = InMemoryDecoder::new();
    dec.insert(raw.clone(), rec);
    let table = AliasTable::builtin().unwrap();
    let cfg = PipelineConfig::default();
    let inp = SubjectInput { subject_id: "S".into(), candidates: vec![raw], annotations: None };

    let from_mem = process_subject(&inp, &dec, &table, &cfg).unwrap();
    let from_file = process_subject(&inp, &SafetensorsDecoder, &table, &cfg).unwrap();
    assert_eq!(from_mem.signals, from_file.signals);
    assert_eq!(from_mem.metadata, from_file.metadata);
    assert!(from_file.labels.iter().all(|l| l.stage == SleepStage::Unscored));
}

#[test]
fn short_channel_is_reported_not_fatal() {
    let mut rec = psg_recording(128.0, 300.0);
    rec.push_channel("ECG", 128.0, vec![0.5; 128 * 20]);
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", rec);

    let a = process_subject(&input("S", "S.edf", None), &dec, &AliasTable::builtin().unwrap(), &PipelineConfig::default())
        .unwrap();
    let d = &a.metadata.diagnostics;
    assert_eq!(d.insufficient_duration.len(), 1);
    assert_eq!(d.insufficient_duration[0].canonical, "EKG");
    assert!(a.signals.iter().all(|s| s.modality != Modality::Cardiac));
    assert!(a.masks.availability.column(Modality::Cardiac.index()).iter().all(|&v| !v));
}

#[test]
fn failed_rerun_removes_earlier_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let table = AliasTable::builtin().unwrap();
    let cfg = PipelineConfig::default();
    let inputs = vec![input("S", "S.edf", None)];
    let path = artifact_path(dir.path(), "S");

    let mut good = InMemoryDecoder::new();
    good.insert("S.edf", psg_recording(128.0, 300.0));
    let out = run_batch(&inputs, &good, &table, &cfg, dir.path(), &BatchOptions::default()).unwrap();
    assert!(matches!(out[0].status, SubjectStatus::Completed { .. }));
    assert!(path.is_file());

    let mut junk = InMemoryDecoder::new();
    junk.insert("S.edf", psgnorm::InMemoryRecording::new().with_channel("Junk", 128.0, vec![0.1; 128 * 300]));
    let out = run_batch(&inputs, &junk, &table, &cfg, dir.path(), &BatchOptions::default()).unwrap();
    assert!(out[0].is_failed());
    assert!(!path.is_file(), "stale artifact survived a failed rerun");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

fn n2_until(end: f64) -> Annotations {
    Annotations {
        stages: vec![psgnorm::StageRecord { start: 0.0, end, stage: SleepStage::N2 }],
        events: Vec::new(),
    }
}

#[test]
fn short_hypnogram_is_padded_and_reported() {
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", psg_recording(128.0, 600.0));
    let a = process_subject(&input("S", "S.edf", Some(n2_until(300.0))), &dec, &AliasTable::builtin().unwrap(), &PipelineConfig::default())
        .unwrap();

    let m = a.metadata.diagnostics.stage_span_mismatch.unwrap();
    assert_eq!((m.signal_secs, m.annotation_secs), (600.0, 300.0));
    assert_eq!(a.labels.len(), 20);
    assert!(a.labels[..10].iter().all(|l| l.stage == SleepStage::N2));
    assert!(a.labels[10..].iter().all(|l| l.stage == SleepStage::Unscored));
}

#[test]
fn long_hypnogram_is_truncated_and_reported() {
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", psg_recording(128.0, 600.0));
    let a = process_subject(&input("S", "S.edf", Some(n2_until(1200.0))), &dec, &AliasTable::builtin().unwrap(), &PipelineConfig::default())
        .unwrap();

    let m = a.metadata.diagnostics.stage_span_mismatch.unwrap();
    assert_eq!(m.annotation_secs, 1200.0);
    assert_eq!(a.labels.len(), 20);
    assert!(a.labels.iter().all(|l| l.stage == SleepStage::N2));
}

#[test]
fn matching_hypnogram_is_not_reported() {
    let mut dec = InMemoryDecoder::new();
    dec.insert("S.edf", psg_recording(128.0, 600.0));
    let a = process_subject(&input("S", "S.edf", Some(n2_until(570.0))), &dec, &AliasTable::builtin().unwrap(), &PipelineConfig::default())
        .unwrap();
    assert_eq!(a.metadata.diagnostics.stage_span_mismatch, None);
}
