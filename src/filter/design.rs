//! Windowed-sinc FIR design for modality band-limiting.
//!
//! Every kernel is a Hamming-windowed sinc of odd length (linear phase, so it
//! can be applied zero-phase).  Transition bandwidths follow the usual
//! automatic rules:
//!   • lower edge:  `min(max(0.25 · low, 2.0), low)`
//!   • upper edge:  `min(max(0.25 · high, 2.0), nyquist − high)`
//!   • length N:    `ceil(3.3 / min(transition) · sfreq)`, rounded up to odd
//!
//! A band-pass kernel is `lowpass(high_edge) − lowpass(low_edge)`; a missing
//! lower edge gives a plain lowpass, a missing (or above-Nyquist) upper edge
//! gives a highpass by spectral inversion.
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Pass band of one modality.
///
/// `order` is the FIR order (taps − 1).  `None` derives it from the
/// transition bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterBand {
    pub low_hz: Option<f32>,
    pub high_hz: Option<f32>,
    #[serde(default)]
    pub order: Option<usize>,
}

impl FilterBand {
    pub const fn new(low_hz: f32, high_hz: f32) -> Self {
        Self { low_hz: Some(low_hz), high_hz: Some(high_hz), order: None }
    }
}

/// Lower-edge transition bandwidth.
pub fn lower_trans_bandwidth(low: f32) -> f32 {
    (0.25 * low).max(2.0).min(low)
}

/// Upper-edge transition bandwidth, bounded by the distance to Nyquist.
pub fn upper_trans_bandwidth(high: f32, sfreq: f32) -> f32 {
    (0.25 * high).max(2.0).min(sfreq / 2.0 - high)
}

/// Number of taps for a transition bandwidth.  Always odd.
pub fn auto_filter_length(trans_bw: f32, sfreq: f32) -> usize {
    make_odd((3.3 / trans_bw as f64 * sfreq as f64).ceil() as usize)
}

fn make_odd(n: usize) -> usize {
    if n % 2 == 0 { n + 1 } else { n }
}

/// Design the kernel for `band` at sampling rate `sfreq`.
///
/// Edges outside `(0, nyquist)` are dropped.  Returns `None` when nothing is
/// left to filter, i.e. the band is all-pass at this rate.
pub fn design_band(band: &FilterBand, sfreq: f32) -> Option<Vec<f32>> {
    let nyq = sfreq / 2.0;
    let low = band.low_hz.filter(|&l| l > 0.0 && l < nyq);
    // An upper edge within one transition of Nyquist cannot be honoured.
    let high = band.high_hz.filter(|&h| h > 0.0 && h < nyq * 0.99);
    if let (Some(l), Some(h)) = (low, high) {
        if l >= h {
            return None;
        }
    }

    let l_tb = low.map(lower_trans_bandwidth);
    let h_tb = high.map(|h| upper_trans_bandwidth(h, sfreq));
    let min_tb = match (l_tb, h_tb) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    let n = match band.order {
        Some(order) => make_odd(order + 1),
        None => auto_filter_length(min_tb, sfreq),
    };

    // Cutoffs sit at the middle of each transition band.
    let low_cut = low.zip(l_tb).map(|(l, tb)| l - tb / 2.0);
    let high_cut = high.zip(h_tb).map(|(h, tb)| h + tb / 2.0);

    let h: Vec<f64> = match (low_cut, high_cut) {
        (Some(lc), Some(hc)) => {
            let lp_hi = firwin(n, hc, sfreq);
            let lp_lo = firwin(n, lc, sfreq);
            lp_hi.iter().zip(&lp_lo).map(|(a, b)| a - b).collect()
        }
        (None, Some(hc)) => firwin(n, hc, sfreq),
        (Some(lc), None) => {
            let mut h: Vec<f64> = firwin(n, lc, sfreq).iter().map(|v| -v).collect();
            h[n / 2] += 1.0;
            h
        }
        (None, None) => return None,
    };
    Some(h.into_iter().map(|v| v as f32).collect())
}

/// Hamming-windowed sinc lowpass with unit DC gain.
///
/// `n` must be odd; `cutoff_hz` is the −6 dB point.
pub fn firwin(n: usize, cutoff_hz: f32, sfreq: f32) -> Vec<f64> {
    debug_assert!(n % 2 == 1, "firwin requires an odd length");
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz as f64 / (sfreq as f64 / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    let s: f64 = h.iter().sum();
    if s != 0.0 {
        h.iter_mut().for_each(|v| *v /= s);
    }
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}
