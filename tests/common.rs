/// Shared helpers for synthetic recordings.
use psgnorm::{Annotations, InMemoryRecording, SleepStage, StageRecord};
use std::f32::consts::PI;

#[allow(unused)]
pub fn sine(freq: f32, sfreq: f32, secs: f32, amp: f32) -> Vec<f32> {
    let n = (secs * sfreq).round() as usize;
    (0..n).map(|i| amp * (2.0 * PI * freq * i as f32 / sfreq).sin()).collect()
}

/// Deterministic mix of in-band tones plus a little pseudo-random jitter.
#[allow(unused)]
pub fn eeg_like(sfreq: f32, secs: f32, seed: u32) -> Vec<f32> {
    let n = (secs * sfreq).round() as usize;
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..n)
        .map(|i| {
            let t = i as f32 / sfreq;
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let jitter = (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
            40.0 * (2.0 * PI * 2.0 * t).sin()
                + 15.0 * (2.0 * PI * 6.5 * t).sin()
                + 8.0 * (2.0 * PI * 11.0 * t).sin()
                + 2.0 * jitter
        })
        .collect()
}

/// Brain + respiratory montage, no cardiac or muscle channels.
#[allow(unused)]
pub fn psg_recording(sfreq: f32, secs: f32) -> InMemoryRecording {
    InMemoryRecording::new()
        .with_channel("C3-M2", sfreq, eeg_like(sfreq, secs, 1))
        .with_channel("THOR", sfreq, sine(0.25, sfreq, secs, 500.0))
        .with_channel("ABDM", sfreq, sine(0.3, sfreq, secs, 350.0))
        .with_start_time("2001-03-14T22:41:00")
}

/// Stage records alternating Wake / N1 every `epoch_dur` seconds.
#[allow(unused)]
pub fn alternating_stages(secs: f64, epoch_dur: f64) -> Annotations {
    let n = (secs / epoch_dur).floor() as usize;
    let stages = (0..n)
        .map(|e| StageRecord {
            start: e as f64 * epoch_dur,
            end: (e + 1) as f64 * epoch_dur,
            stage: if e % 2 == 0 { SleepStage::Wake } else { SleepStage::N1 },
        })
        .collect();
    Annotations { stages, events: Vec::new() }
}

#[allow(unused)]
pub fn names(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Sign changes, used as a frequency estimate.
#[allow(unused)]
pub fn zero_crossings(x: &[f32]) -> usize {
    x.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count()
}

#[allow(unused)]
pub fn rms(x: &[f32]) -> f32 {
    (x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32).sqrt()
}
