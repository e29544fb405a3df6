//! Python bindings (cargo feature `python`).
//!
//! Grids cross the boundary as flat row-major buffers plus their
//! dimensions so they can be reshaped on the Python side with numpy.

use ndarray::{Array2, ArrayD, IxDyn};
use num_complex::Complex64;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::decimate::decimate;
use crate::error::FlagError;
use crate::observe::LogObserver;
use crate::pipeline::RfiFlagger;
use crate::spectral_kurtosis::{SkOutcome, SpectralKurtosis};
use crate::sum_threshold::SumThreshold;
use crate::types::{
    AxisSelection, FlagParams, FlagResult, Grid, Mask, Polarization, PowerMoments, SkParams,
    SumThresholdParams,
};

type FlatGrid = (Vec<f64>, usize, usize);
type FlatMask = (Vec<u8>, usize, usize);

fn grid(data: Vec<f64>, rows: usize, cols: usize) -> Result<Grid, FlagError> {
    Array2::from_shape_vec((rows, cols), data).map_err(|e| FlagError::Shape(e.to_string()))
}

fn flat_grid(grid: Grid) -> FlatGrid {
    let (rows, cols) = grid.dim();
    (grid.iter().copied().collect(), rows, cols)
}

fn flat_mask(mask: Mask) -> FlatMask {
    let (rows, cols) = mask.dim();
    (mask.iter().copied().collect(), rows, cols)
}

pub(crate) fn power_moments(
    power: Vec<f64>,
    moment: Vec<f64>,
    n_chans: usize,
    n_times: usize,
    factor: usize,
) -> Result<PowerMoments, FlagError> {
    PowerMoments::new(grid(power, n_chans, n_times)?, grid(moment, n_chans, n_times)?, factor)
}

/// Decimate a flat complex array of shape `shape` (`[time, chan]` or
/// `[time, chan, pol]`).  Returns one `(power, moment)` pair per
/// polarization.
#[pyfunction]
#[pyo3(name = "decimate", signature = (samples, shape, factor=128, polarization="1"))]
fn py_decimate(
    py: Python<'_>,
    samples: Vec<Complex64>,
    shape: Vec<usize>,
    factor: usize,
    polarization: &str,
) -> PyResult<Vec<(FlatGrid, FlatGrid)>> {
    let polarization: Polarization = polarization.parse()?;
    let samples = ArrayD::from_shape_vec(IxDyn(&shape), samples)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let decimated = py.allow_threads(|| decimate(samples.view(), factor, polarization))?;
    Ok(decimated
        .into_pairs()
        .into_iter()
        .map(|pair| {
            let (power, moment) = pair.into_parts();
            (flat_grid(power), flat_grid(moment))
        })
        .collect())
}

/// Spectral Kurtosis mask of a flat power/moment pair.
#[pyfunction]
#[pyo3(name = "spectral_kurtosis", signature = (power, moment, n_chans, n_times, m=128, upper=1.5, lower=0.6))]
#[allow(clippy::too_many_arguments)]
fn py_spectral_kurtosis(
    py: Python<'_>,
    power: Vec<f64>,
    moment: Vec<f64>,
    n_chans: usize,
    n_times: usize,
    m: usize,
    upper: f64,
    lower: f64,
) -> PyResult<FlatMask> {
    let power = grid(power, n_chans, n_times)?;
    let moment = grid(moment, n_chans, n_times)?;
    let SkOutcome { mask, .. } = py.allow_threads(|| {
        SpectralKurtosis::new(SkParams { m, upper, lower }).flag(power.view(), moment.view(), &LogObserver)
    })?;
    Ok(flat_mask(mask))
}

/// SumThreshold mask of a flat power grid.  `axis` is "0", "1" or "both".
#[pyfunction]
#[pyo3(name = "sum_threshold", signature = (power, n_chans, n_times, axis="both", params=None))]
fn py_sum_threshold(
    py: Python<'_>,
    power: Vec<f64>,
    n_chans: usize,
    n_times: usize,
    axis: &str,
    params: Option<SumThresholdParams>,
) -> PyResult<FlatMask> {
    let axis: AxisSelection = axis.parse()?;
    let power = grid(power, n_chans, n_times)?;
    let detector = SumThreshold::new(params.unwrap_or_default());
    let outcome = py.allow_threads(|| detector.flag(power.view(), axis, &LogObserver))?;
    Ok(flat_mask(outcome.mask))
}

/// The top-level Python module exposed by this crate.
#[pymodule]
fn rfimask_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<RfiFlagger>()?;
    m.add_class::<FlagParams>()?;
    m.add_class::<FlagResult>()?;
    m.add_class::<SkParams>()?;
    m.add_class::<SumThresholdParams>()?;
    m.add_class::<AxisSelection>()?;
    m.add_class::<Polarization>()?;

    m.add_function(wrap_pyfunction!(py_decimate, m)?)?;
    m.add_function(wrap_pyfunction!(py_spectral_kurtosis, m)?)?;
    m.add_function(wrap_pyfunction!(py_sum_threshold, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("__doc__", "Spectral Kurtosis and SumThreshold RFI flagging.")?;

    Ok(())
}
