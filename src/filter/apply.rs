//! Zero-phase FIR application by FFT overlap-add.
//!
//! The kernel is linear-phase with odd length N, so zero phase is obtained by
//! shifting the convolution output left by `(N-1)/2` samples; there is no
//! forward-backward pass.  Edge transients are tamed by padding each side
//! with `N-1` samples of odd reflection around the end samples (zeros beyond
//! what the signal can supply).
use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, FftPlanner};

/// Filter one channel.  Output has the same length as `x`.
pub fn filter_zero_phase(x: &[f32], h: &[f32]) -> Result<Vec<f32>> {
    let n_x = x.len();
    let n_h = h.len();
    ensure!(n_h % 2 == 1, "zero-phase FIR needs an odd kernel, got {n_h} taps");
    if n_x == 0 {
        return Ok(vec![]);
    }

    let shift = (n_h - 1) / 2;
    let n_edge = n_h - 1;
    let x_ext = reflect_pad(x, n_edge);
    let n_ext = x_ext.len();

    let n_fft = choose_fft_len(n_h, n_ext);
    let n_seg = n_fft - n_h + 1;

    let mut planner: FftPlanner<f32> = FftPlanner::new();
    let fwd = planner.plan_fft_forward(n_fft);
    let inv = planner.plan_fft_inverse(n_fft);

    let mut h_fft = zero_padded(h, n_fft);
    fwd.process(&mut h_fft);

    let inv_scale = 1.0 / n_fft as f32;
    let mut y = vec![0.0_f32; n_ext];
    let mut buf = vec![Complex::<f32>::default(); n_fft];

    for start in (0..n_ext).step_by(n_seg) {
        let stop = (start + n_seg).min(n_ext);
        buf.fill(Complex::default());
        for (b, &v) in buf.iter_mut().zip(&x_ext[start..stop]) {
            b.re = v;
        }
        fwd.process(&mut buf);
        for (b, &hf) in buf.iter_mut().zip(&h_fft) {
            *b *= hf;
        }
        inv.process(&mut buf);

        // Output sample o receives product sample o + shift - start.
        let out_start = start.saturating_sub(shift);
        let prod_start = shift.saturating_sub(start);
        let out_end = (start + n_fft).saturating_sub(shift).min(n_ext);
        for (o, p) in (out_start..out_end).zip(prod_start..n_fft) {
            y[o] += buf[p].re * inv_scale;
        }
    }

    Ok(y[n_edge..n_edge + n_x].to_vec())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Pad `n` samples per side: odd reflection, then zeros once the signal
/// runs out.
///
/// Left:  `2·x[0] − x[i]`,        i = n..1
/// Right: `2·x[last] − x[last−i]`, i = 1..n
fn reflect_pad(x: &[f32], n: usize) -> Vec<f32> {
    let len = x.len();
    let avail = n.min(len - 1);
    let first = x[0];
    let last = x[len - 1];

    let mut out = Vec::with_capacity(len + 2 * n);
    out.resize(n - avail, 0.0);
    out.extend((1..=avail).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=avail).map(|i| 2.0 * last - x[len - 1 - i]));
    out.resize(len + 2 * n, 0.0);
    out
}

/// Power-of-two block size minimising
/// `ceil(n_x / (N − n_h + 1)) · N · (log2 N + 1) + 4e-5 · N · n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = (2 * n_h - 1).next_power_of_two();
    let max_fft = n_x.next_power_of_two().max(min_fft) * 2;

    let mut best = (f64::INFINITY, min_fft);
    let mut n = min_fft;
    while n <= max_fft {
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * ((n as f64).log2() + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best.0 {
            best = (cost, n);
        }
        n *= 2;
    }
    best.1
}

fn zero_padded(h: &[f32], n_fft: usize) -> Vec<Complex<f32>> {
    let mut buf = vec![Complex::<f32>::default(); n_fft];
    for (b, &v) in buf.iter_mut().zip(h) {
        b.re = v;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::design::{design_band, FilterBand};

    #[test]
    fn preserves_length() {
        let x: Vec<f32> = (0..1000).map(|i| (i as f32 / 50.0).sin()).collect();
        let h = design_band(&FilterBand::new(0.3, 35.0), 256.0).unwrap();
        assert_eq!(filter_zero_phase(&x, &h).unwrap().len(), x.len());
    }

    #[test]
    fn identity_kernel_is_transparent() {
        let x: Vec<f32> = (0..300).map(|i| ((i * 7) % 13) as f32).collect();
        let y = filter_zero_phase(&x, &[0.0, 1.0, 0.0]).unwrap();
        for (a, b) in x.iter().zip(&y) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 1e-4_f32);
        }
    }

    #[test]
    fn removes_dc_in_interior() {
        let x = vec![1.0_f32; 8192];
        let h = design_band(&FilterBand::new(0.5, 35.0), 256.0).unwrap();
        let y = filter_zero_phase(&x, &h).unwrap();
        let n_h = h.len();
        let max = y[n_h..y.len() - n_h].iter().map(|v| v.abs()).fold(0.0_f32, f32::max);
        assert!(max < 1e-3, "DC not removed: max={max}");
    }

    #[test]
    fn reflect_pad_short_signal_zero_fills() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0], 4);
        // avail = 2 per side, 2 zeros outside each reflection.
        assert_eq!(padded, vec![0.0, 0.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_even_kernel() {
        assert!(filter_zero_phase(&[1.0, 2.0], &[0.5, 0.5]).is_err());
    }
}
