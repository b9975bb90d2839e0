mod common;
use common::{rms, sine};
use psgnorm::filter::{design_band, filter_zero_phase};
use psgnorm::{FilterBand, Modality, PipelineConfig};

fn middle(x: &[f32]) -> &[f32] {
    let q = x.len() / 4;
    &x[q..x.len() - q]
}

fn band_filter(x: &[f32], band: &FilterBand, sfreq: f32) -> Vec<f32> {
    let h = design_band(band, sfreq).expect("band should need filtering");
    filter_zero_phase(x, &h).unwrap()
}

#[test]
fn brain_band_keeps_alpha_and_drops_line_noise() {
    let sfreq = 256.0;
    let alpha = sine(10.0, sfreq, 60.0, 1.0);
    let line = sine(60.0, sfreq, 60.0, 1.0);
    let x: Vec<f32> = alpha.iter().zip(&line).map(|(a, b)| a + b + 5.0).collect();

    let cfg = PipelineConfig::default();
    let y = band_filter(&x, cfg.bands.get(Modality::BrainActivity), sfreq);
    assert_eq!(y.len(), x.len());

    // Zero phase: the passband tone lines up sample for sample.
    let err = middle(&y)
        .iter()
        .zip(middle(&alpha))
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f32, f32::max);
    assert!(err < 2e-2, "max error {err:.2e}");

    let mean = middle(&y).iter().sum::<f32>() / middle(&y).len() as f32;
    assert!(mean.abs() < 1e-2, "offset survived: {mean}");
}

#[test]
fn respiratory_band_rejects_cardiac_leak() {
    let sfreq = 64.0;
    let breath = sine(0.25, sfreq, 600.0, 1.0);
    let leak = sine(8.0, sfreq, 600.0, 0.5);
    let x: Vec<f32> = breath.iter().zip(&leak).map(|(a, b)| a + b).collect();

    let cfg = PipelineConfig::default();
    let y = band_filter(&x, cfg.bands.get(Modality::Respiratory), sfreq);

    let residual: Vec<f32> = middle(&y).iter().zip(middle(&breath)).map(|(a, b)| a - b).collect();
    assert!(rms(&residual) < 2e-2, "residual rms {}", rms(&residual));
}

#[test]
fn band_above_nyquist_degrades_to_highpass() {
    // Muscle band tops out at 100 Hz, past Nyquist of a 100 Hz channel.
    let cfg = PipelineConfig::default();
    let band = cfg.bands.get(Modality::Muscle);
    let h = design_band(band, 100.0).unwrap();
    assert_eq!(h.len() % 2, 1);
    // Highpass: no DC gain.
    let dc: f32 = h.iter().sum();
    assert!(dc.abs() < 1e-3, "dc gain {dc}");
}

#[test]
fn empty_band_is_all_pass() {
    let band = FilterBand { low_hz: None, high_hz: None, order: None };
    assert!(design_band(&band, 256.0).is_none());
}
