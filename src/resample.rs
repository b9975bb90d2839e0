//! FFT resampler.
//!
//! Each channel is resampled independently from its native rate to the common
//! target rate:
//!   1. Pad both ends by odd reflection (`auto_npad`: up to the next power of 2).
//!   2. Forward FFT of the padded signal.
//!   3. Keep the bins up to the lower of the two Nyquist frequencies.  That
//!      truncation is the anti-aliasing filter: nothing above
//!      `min(src, dst) / 2` survives.  The shared Nyquist bin is doubled when
//!      shrinking and halved when growing.
//!   4. Inverse FFT at the new padded length, scaled by `new_len / old_len`.
//!   5. Strip the resampled padding.
//!
//! Output length is always `round(n · dst / src)`.
use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, FftPlanner};

/// Reflection padding per side for an `n`-sample signal:
///
/// ```text
/// min_add = min(n / 8, 100) · 2
/// total   = 2^ceil(log2(n + min_add)) − n
/// ```
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let total = (n + min_add).next_power_of_two() - n;
    (total / 2, total - total / 2)
}

/// Number of output samples for `n` input samples.
pub fn resampled_len(n: usize, src_sfreq: f32, dst_sfreq: f32) -> usize {
    (n as f64 * dst_sfreq as f64 / src_sfreq as f64).round() as usize
}

/// Resample one channel from `src_sfreq` to `dst_sfreq`.
pub fn resample_channel(x: &[f32], src_sfreq: f32, dst_sfreq: f32) -> Result<Vec<f32>> {
    ensure!(
        src_sfreq > 0.0 && dst_sfreq > 0.0,
        "sampling rates must be positive (src={src_sfreq}, dst={dst_sfreq})"
    );
    if (src_sfreq - dst_sfreq).abs() < 1e-6 {
        return Ok(x.to_vec());
    }
    let (npad_l, npad_r) = auto_npad(x.len());
    resample_padded(x, dst_sfreq as f64 / src_sfreq as f64, npad_l, npad_r)
}

/// Resample with explicit padding.  `ratio = dst / src`.
pub fn resample_padded(x: &[f32], ratio: f64, npad_l: usize, npad_r: usize) -> Result<Vec<f32>> {
    let n_in = x.len();
    if n_in == 0 {
        return Ok(vec![]);
    }
    let final_len = (ratio * n_in as f64).round() as usize;

    // ── 1. Odd-reflection padding (limited by the signal length) ─────────
    let pad_l = npad_l.min(n_in - 1);
    let pad_r = npad_r.min(n_in - 1);
    let old_len = n_in + pad_l + pad_r;
    let first = x[0];
    let last = x[n_in - 1];

    let mut buf: Vec<Complex<f64>> = Vec::with_capacity(old_len);
    buf.extend((1..=pad_l).rev().map(|i| real(2.0 * first - x[i])));
    buf.extend(x.iter().map(|&v| real(v)));
    buf.extend((1..=pad_r).map(|i| real(2.0 * last - x[n_in - 1 - i])));

    // ── 2. Forward FFT ───────────────────────────────────────────────────
    let mut planner: FftPlanner<f64> = FftPlanner::new();
    planner.plan_fft_forward(old_len).process(&mut buf);

    let new_len = ((ratio * old_len as f64).round() as usize).max(1);
    let shrinking = new_len < old_len;
    let mut half: Vec<Complex<f64>> = buf[..old_len / 2 + 1].to_vec();

    // ── 3. Shared Nyquist bin ────────────────────────────────────────────
    let use_len = if shrinking { new_len } else { old_len };
    if use_len % 2 == 0 {
        let nyq = use_len / 2;
        if let Some(bin) = half.get_mut(nyq) {
            *bin *= if shrinking { 2.0 } else { 0.5 };
        }
    }

    // ── 4. Rebuild a Hermitian spectrum of the new length ────────────────
    let scale = new_len as f64 / old_len as f64;
    let new_half = new_len / 2 + 1;
    let mut spec = vec![Complex::<f64>::default(); new_len];
    for (dst, src) in spec.iter_mut().zip(half.iter().take(new_half)) {
        *dst = *src * scale;
    }
    for k in 1..new_half {
        let mirror = new_len - k;
        if mirror >= new_half {
            spec[mirror] = spec[k].conj();
        }
    }
    planner.plan_fft_inverse(new_len).process(&mut spec);
    let inv = 1.0 / new_len as f64;

    // ── 5. Strip padding ─────────────────────────────────────────────────
    let skip = ((ratio * pad_l as f64).round() as usize).min(new_len);
    let mut out: Vec<f32> = spec[skip..]
        .iter()
        .take(final_len)
        .map(|c| (c.re * inv) as f32)
        .collect();
    out.resize(final_len, 0.0);
    Ok(out)
}

#[inline]
fn real(v: f32) -> Complex<f64> {
    Complex { re: v as f64, im: 0.0 }
}
