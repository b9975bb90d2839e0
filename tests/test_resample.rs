mod common;
use common::{rms, sine, zero_crossings};
use psgnorm::resample::resampled_len;
use psgnorm::resample_channel;

/// Middle of a signal, away from the padded edges.
fn middle(x: &[f32]) -> &[f32] {
    let q = x.len() / 4;
    &x[q..x.len() - q]
}

fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[test]
fn downsampling_keeps_frequency_and_amplitude() {
    let x = sine(5.0, 512.0, 60.0, 1.0);
    let y = resample_channel(&x, 512.0, 128.0).unwrap();

    assert_eq!(y.len(), 60 * 128);
    let zc = zero_crossings(&y) as i64;
    assert!((zc - 600).abs() <= 2, "zero crossings {zc}");
    let r = rms(middle(&y));
    assert!((r - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01, "rms {r}");

    let reference = sine(5.0, 128.0, 60.0, 1.0);
    let err = max_abs_diff(middle(&y), middle(&reference));
    assert!(err < 1e-2, "max error {err:.2e}");
}

#[test]
fn non_integer_ratio() {
    let x = sine(3.0, 200.0, 60.0, 1.0);
    let y = resample_channel(&x, 200.0, 128.0).unwrap();
    assert_eq!(y.len(), resampled_len(x.len(), 200.0, 128.0));
    assert_eq!(y.len(), 7680);

    let reference = sine(3.0, 128.0, 60.0, 1.0);
    let err = max_abs_diff(middle(&y), middle(&reference));
    assert!(err < 3e-2, "max error {err:.2e}");
}

#[test]
fn upsampling_slow_respiratory_signal() {
    let x = sine(0.25, 32.0, 120.0, 1.0);
    let y = resample_channel(&x, 32.0, 128.0).unwrap();
    assert_eq!(y.len(), 120 * 128);
    let zc = zero_crossings(&y) as i64;
    assert!((zc - 60).abs() <= 2, "zero crossings {zc}");
}

#[test]
fn same_rate_is_passthrough() {
    let x = sine(7.0, 128.0, 10.0, 1.0);
    assert_eq!(resample_channel(&x, 128.0, 128.0).unwrap(), x);
}
