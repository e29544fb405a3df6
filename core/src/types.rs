//! Common types shared across the flagging pipeline.
//!
//! These structures represent the data objects that move between the
//! stages: decimated power/moment grids, binary masks, detector
//! configuration, and the aggregated result of a flagging run.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
#[cfg(feature = "python")]
use pyo3::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{FlagError, Result};

/// A spectrogram of real values, indexed `[channel, time]`.
pub type Grid = Array2<f64>;

/// A binary mask with the shape of its source [`Grid`]: 1 = flagged, 0 = clean.
pub type Mask = Array2<u8>;

// ---------------------------------------------------------------------------
// Axis and polarization selectors
// ---------------------------------------------------------------------------

/// Which axis (or axes) SumThreshold scans along.
///
/// `Frequency` is axis 0 (each time column is scanned across channels),
/// `Time` is axis 1 (each channel is scanned across samples), and `Both`
/// runs the two passes independently and ORs their masks.
#[cfg_attr(feature = "python", pyclass(eq, eq_int))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisSelection {
    Frequency,
    Time,
    #[default]
    Both,
}

impl FromStr for AxisSelection {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "frequency" | "freq" => Ok(Self::Frequency),
            "1" | "time" => Ok(Self::Time),
            "both" => Ok(Self::Both),
            other => Err(FlagError::InvalidParameter(format!(
                "unknown axis '{}' (expected 0, 1 or both)",
                other
            ))),
        }
    }
}

/// The orientation of a single SumThreshold pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanAxis {
    Frequency,
    Time,
}

impl fmt::Display for ScanAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frequency => f.write_str("frequency"),
            Self::Time => f.write_str("time"),
        }
    }
}

/// Polarization(s) to extract from a three-dimensional voltage array.
#[cfg_attr(feature = "python", pyclass(eq, eq_int))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarization {
    /// The first polarization (selector `1`).
    #[default]
    First,
    /// The last polarization (selector `2`).
    Second,
    /// Both of the above, decimated separately.
    Both,
}

impl FromStr for Polarization {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" => Ok(Self::First),
            "2" => Ok(Self::Second),
            "both" => Ok(Self::Both),
            _ => Err(FlagError::InvalidPolarization(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// PowerMoments
// ---------------------------------------------------------------------------

/// A decimated power grid (Σ|V|²) paired with its moment grid (Σ|V|⁴).
///
/// Both grids are `[channel, time / factor]` and were reduced with the same
/// decimation factor; the constructor refuses pairs that disagree in shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerMoments {
    power: Grid,
    moment: Grid,
    factor: usize,
}

impl PowerMoments {
    pub fn new(power: Grid, moment: Grid, factor: usize) -> Result<Self> {
        if power.dim() != moment.dim() {
            return Err(FlagError::Shape(format!(
                "power grid {:?} and moment grid {:?} differ in shape",
                power.dim(),
                moment.dim()
            )));
        }
        if factor == 0 {
            return Err(FlagError::InvalidParameter("decimation factor must be positive".into()));
        }
        Ok(Self { power, moment, factor })
    }

    pub fn power(&self) -> &Grid {
        &self.power
    }

    pub fn moment(&self) -> &Grid {
        &self.moment
    }

    /// Number of raw samples summed into each cell.
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// `(n_channels, n_times)` of both grids.
    pub fn dim(&self) -> (usize, usize) {
        self.power.dim()
    }

    pub fn into_parts(self) -> (Grid, Grid) {
        (self.power, self.moment)
    }
}

// ---------------------------------------------------------------------------
// SkParams
// ---------------------------------------------------------------------------

/// Configuration for the Spectral Kurtosis detector.
///
/// The default bounds work well for `m = 128`; they should be widened for
/// smaller accumulations, where the SK estimator is noisier.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkParams {
    /// Number of raw power samples accumulated into each cell.
    pub m: usize,
    /// Cells with SK above this value are flagged.
    pub upper: f64,
    /// Cells with SK below this value are flagged.
    pub lower: f64,
}

impl Default for SkParams {
    fn default() -> Self {
        Self { m: 128, upper: 1.5, lower: 0.6 }
    }
}

impl SkParams {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(FlagError::InvalidParameter(format!(
                "SK accumulation length must be at least 2, got {}",
                self.m
            )));
        }
        if !self.upper.is_finite() || !self.lower.is_finite() || self.lower > self.upper {
            return Err(FlagError::InvalidParameter(format!(
                "SK bounds must be finite with lower <= upper (lower={}, upper={})",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl SkParams {
    #[new]
    #[pyo3(signature = (m=128, upper=1.5, lower=0.6))]
    pub fn py_new(m: usize, upper: f64, lower: f64) -> Self {
        Self { m, upper, lower }
    }

    fn __repr__(&self) -> String {
        format!("SkParams(m={}, upper={:.3}, lower={:.3})", self.m, self.upper, self.lower)
    }
}

// ---------------------------------------------------------------------------
// SumThresholdParams
// ---------------------------------------------------------------------------

/// Configuration for the SumThreshold detector.
///
/// The defaults reproduce the calibrated detector: eight window lengths
/// (1..128) when a single axis is scanned, seven (1..64) per axis in
/// combined mode, and a 1.2× threshold multiplier on time-axis passes only.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SumThresholdParams {
    /// Number of window lengths (`L = 2^i`) used when one axis is scanned.
    pub single_axis_levels: usize,
    /// Number of window lengths used by each pass in combined mode.
    pub combined_levels: usize,
    /// Threshold multiplier for passes along the time axis.
    pub time_multiplier: f64,
    /// Threshold multiplier for passes along the frequency axis.
    pub frequency_multiplier: f64,
    /// Raw samples per decimated cell; each contributes a real and an
    /// imaginary degree of freedom.
    pub combination: usize,
    /// Upper-tail probability at which the fitted χ² is cut.
    pub tail_probability: f64,
    /// Draws for a Monte Carlo reference distribution. 0 selects the exact,
    /// deterministic calibration.
    pub monte_carlo_draws: usize,
    /// Seed for the Monte Carlo reference distribution.
    pub seed: u64,
}

impl Default for SumThresholdParams {
    fn default() -> Self {
        Self {
            single_axis_levels: 8,
            combined_levels: 7,
            time_multiplier: 1.2,
            frequency_multiplier: 1.0,
            combination: 128,
            tail_probability: 1e-15,
            monte_carlo_draws: 0,
            seed: 0,
        }
    }
}

/// Window lengths beyond `2^MAX_LEVELS` are never useful and would overflow
/// the degrees-of-freedom arithmetic on 32-bit targets.
const MAX_LEVELS: usize = 24;

impl SumThresholdParams {
    pub fn validate(&self) -> Result<()> {
        for (name, levels) in [
            ("single_axis_levels", self.single_axis_levels),
            ("combined_levels", self.combined_levels),
        ] {
            if levels == 0 || levels > MAX_LEVELS {
                return Err(FlagError::InvalidParameter(format!(
                    "{} must be in 1..={}, got {}",
                    name, MAX_LEVELS, levels
                )));
            }
        }
        for (name, value) in [
            ("time_multiplier", self.time_multiplier),
            ("frequency_multiplier", self.frequency_multiplier),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FlagError::InvalidParameter(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if self.combination == 0 {
            return Err(FlagError::InvalidParameter("combination must be positive".into()));
        }
        if !(self.tail_probability > 0.0 && self.tail_probability < 0.5) {
            return Err(FlagError::InvalidParameter(format!(
                "tail_probability must lie in (0, 0.5), got {}",
                self.tail_probability
            )));
        }
        Ok(())
    }

    /// Threshold multiplier for a pass along `axis`.
    pub fn multiplier(&self, axis: ScanAxis) -> f64 {
        match axis {
            ScanAxis::Time => self.time_multiplier,
            ScanAxis::Frequency => self.frequency_multiplier,
        }
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl SumThresholdParams {
    #[new]
    #[pyo3(signature = (
        single_axis_levels=8,
        combined_levels=7,
        time_multiplier=1.2,
        frequency_multiplier=1.0,
        combination=128,
        tail_probability=1e-15,
        monte_carlo_draws=0,
        seed=0
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn py_new(
        single_axis_levels: usize,
        combined_levels: usize,
        time_multiplier: f64,
        frequency_multiplier: f64,
        combination: usize,
        tail_probability: f64,
        monte_carlo_draws: usize,
        seed: u64,
    ) -> Self {
        Self {
            single_axis_levels,
            combined_levels,
            time_multiplier,
            frequency_multiplier,
            combination,
            tail_probability,
            monte_carlo_draws,
            seed,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "SumThresholdParams(levels={}/{}, multipliers=t{:.2}/f{:.2}, combination={})",
            self.single_axis_levels,
            self.combined_levels,
            self.time_multiplier,
            self.frequency_multiplier,
            self.combination,
        )
    }
}

// ---------------------------------------------------------------------------
// FlagParams
// ---------------------------------------------------------------------------

/// Configuration for a full flagging run.
///
/// Each detector is enabled by giving it parameters; the masks of every
/// enabled detector are ORed together.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagParams {
    pub sk: Option<SkParams>,
    pub sum_threshold: Option<SumThresholdParams>,
    /// Axis selection for SumThreshold.
    pub axis: AxisSelection,
    /// Number of rayon worker threads.  Set to 0 to use the ambient pool.
    pub n_workers: usize,
}

impl Default for FlagParams {
    fn default() -> Self {
        Self {
            sk: Some(SkParams::default()),
            sum_threshold: Some(SumThresholdParams::default()),
            axis: AxisSelection::Both,
            n_workers: 0,
        }
    }
}

impl FlagParams {
    pub fn validate(&self) -> Result<()> {
        if self.sk.is_none() && self.sum_threshold.is_none() {
            return Err(FlagError::InvalidParameter("no detector enabled".into()));
        }
        if let Some(sk) = &self.sk {
            sk.validate()?;
        }
        if let Some(st) = &self.sum_threshold {
            st.validate()?;
        }
        Ok(())
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl FlagParams {
    #[new]
    #[pyo3(signature = (sk=Some(SkParams::default()), sum_threshold=Some(SumThresholdParams::default()), axis=AxisSelection::Both, n_workers=0))]
    pub fn py_new(
        sk: Option<SkParams>,
        sum_threshold: Option<SumThresholdParams>,
        axis: AxisSelection,
        n_workers: usize,
    ) -> Self {
        Self { sk, sum_threshold, axis, n_workers }
    }

    fn __repr__(&self) -> String {
        format!(
            "FlagParams(sk={}, sum_threshold={}, axis={:?}, workers={})",
            self.sk.is_some(),
            self.sum_threshold.is_some(),
            self.axis,
            self.n_workers,
        )
    }
}

// ---------------------------------------------------------------------------
// FlagResult
// ---------------------------------------------------------------------------

/// Aggregated output of a flagging run.
#[cfg_attr(feature = "python", pyclass)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlagResult {
    /// OR of every enabled detector's mask.
    pub mask: Mask,

    /// Fraction of cells flagged by Spectral Kurtosis, if it ran.
    pub sk_fraction: Option<f64>,

    /// Fraction of cells flagged by SumThreshold, if it ran.
    pub sum_threshold_fraction: Option<f64>,

    /// Fraction of cells flagged in the combined mask.
    pub flagged_fraction: f64,

    /// Wall-clock processing time for the run, in milliseconds.
    pub processing_time_ms: u64,
}

impl FlagResult {
    /// Serialise the result to a JSON string for interoperability.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl FlagResult {
    /// The combined mask as `(flat_row_major, n_channels, n_times)`.
    #[getter]
    fn mask(&self) -> (Vec<u8>, usize, usize) {
        let (rows, cols) = self.mask.dim();
        (self.mask.iter().copied().collect(), rows, cols)
    }

    #[getter]
    fn sk_fraction(&self) -> Option<f64> {
        self.sk_fraction
    }

    #[getter]
    fn sum_threshold_fraction(&self) -> Option<f64> {
        self.sum_threshold_fraction
    }

    #[getter]
    fn flagged_fraction(&self) -> f64 {
        self.flagged_fraction
    }

    #[getter]
    fn processing_time_ms(&self) -> u64 {
        self.processing_time_ms
    }

    #[pyo3(name = "to_json")]
    fn py_to_json(&self) -> PyResult<String> {
        Ok(self.to_json()?)
    }

    fn __repr__(&self) -> String {
        let (rows, cols) = self.mask.dim();
        format!(
            "FlagResult(shape={}x{}, flagged={:.3}%, time={}ms)",
            rows,
            cols,
            self.flagged_fraction * 100.0,
            self.processing_time_ms,
        )
    }
}
