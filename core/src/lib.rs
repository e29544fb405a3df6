//! # rfimask-core
//!
//! Radio-Frequency Interference (RFI) flagging for radio-telescope power
//! spectrograms, with optional Python bindings via [PyO3](https://pyo3.rs).
//!
//! ## Overview
//!
//! Complex voltages are decimated into power and power² grids, two
//! independent detectors turn those grids into binary masks, and the masks
//! are ORed for downstream calibration:
//!
//! | Module                    | Purpose                                                   |
//! |---------------------------|-----------------------------------------------------------|
//! | [`mod@decimate`]          | Complex voltages to power and power² grids, per channel   |
//! | [`mod@spectral_kurtosis`] | Pointwise Spectral Kurtosis detector                      |
//! | [`mod@sum_threshold`]     | Multi-resolution SumThreshold detector with χ² thresholds |
//! | [`stats`]                 | Median/MAD and χ² calibration                             |
//! | [`mask`]                  | Combining, applying and summarising masks                 |
//! | [`pipeline`]              | [`RfiFlagger`] engine running the enabled detectors       |
//! | [`mod@radiometer`]        | Radiometer-equation quality metric                        |
//! | [`observe`]               | Structured progress events                                |
//! | [`types`]                 | Grids, masks, parameters and results                      |
//!
//! ## Rust usage
//!
//! ```no_run
//! use ndarray::Array2;
//! use num_complex::Complex64;
//! use rfimask_core::{decimate, FlagParams, LogObserver, Polarization, RfiFlagger};
//!
//! # fn main() -> rfimask_core::Result<()> {
//! let voltages = Array2::<Complex64>::zeros((128 * 256, 64));
//! let pairs = decimate(voltages.view().into_dyn(), 128, Polarization::First)?.into_pairs();
//!
//! let result = RfiFlagger::new(FlagParams::default()).flag(&pairs[0], &LogObserver)?;
//! println!("{:.2}% flagged", result.flagged_fraction * 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Python usage
//!
//! With the `python` feature the crate builds a module called
//! `rfimask_core`:
//!
//! ```python
//! import rfimask_core
//!
//! (power, moment), = rfimask_core.decimate(samples, shape, factor=128)
//! engine = rfimask_core.RfiFlagger(rfimask_core.FlagParams())
//! result = engine.flag(power[0], moment[0], power[1], power[2], 128)
//! print(result.flagged_fraction)
//! ```

pub mod decimate;
pub mod error;
pub mod mask;
pub mod observe;
pub mod pipeline;
pub mod radiometer;
pub mod spectral_kurtosis;
pub mod stats;
pub mod sum_threshold;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export the most commonly used items at crate root for convenience.
pub use decimate::{decimate, Decimated};
pub use error::{FlagError, Result};
pub use mask::{apply_mask, combine, flagged_fraction};
pub use observe::{FlagEvent, LogObserver, NullObserver, Observer};
pub use pipeline::RfiFlagger;
pub use radiometer::{compare, radiometer, RadiometerParams, RadiometerReport};
pub use spectral_kurtosis::{spectral_kurtosis, SpectralKurtosis};
pub use sum_threshold::{sum_threshold, SumThreshold};
pub use types::{
    AxisSelection, FlagParams, FlagResult, Grid, Mask, Polarization, PowerMoments, SkParams,
    SumThresholdParams,
};
