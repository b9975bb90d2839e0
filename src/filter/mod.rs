//! Modality band-limiting.
//!
//! - [`design`]: Hamming-windowed sinc band-pass / lowpass / highpass design.
//! - [`apply`]: zero-phase FFT overlap-add convolution.

pub mod apply;
pub mod design;

pub use apply::filter_zero_phase;
pub use design::{
    auto_filter_length, design_band, firwin, hamming, lower_trans_bandwidth,
    upper_trans_bandwidth, FilterBand,
};
