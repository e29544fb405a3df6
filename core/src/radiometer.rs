//! Radiometer-equation quality metric for comparing RFI excision results.
//!
//! For clean Gaussian noise, the ratio of the mean to the standard
//! deviation of `N` accumulated power samples follows the radiometer
//! equation, `mean / σ = √(Δν · τ)`.  Splitting every channel into time
//! chunks and computing
//!
//! ```text
//! rad = mean / (σ · √(Δν · τ))
//! ```
//!
//! therefore gives ≈ 1 on clean data; chunks outside `[lower, upper]` are
//! counted as outliers.  Comparing the outlier percentage before and after
//! masking measures how much of the non-Gaussian structure a detector
//! removed.
//!
//! Masked cells are expected as NaN (see [`crate::mask::apply_mask`]) and
//! are left out of each chunk's statistics.

use std::time::Instant;

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{FlagError, Result};
use crate::observe::{FlagEvent, Observer, Stage};

/// Number of histogram bins over [`HISTOGRAM_RANGE`].
pub const HISTOGRAM_BINS: usize = 200;

/// Histogram range of the radiometer metric.
pub const HISTOGRAM_RANGE: (f64, f64) = (0.0, 4.0);

/// Instrument constants and outlier bounds for the metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadiometerParams {
    /// Time per raw sample, in seconds.
    pub tsamp: f64,
    /// Raw samples accumulated into each grid cell.
    pub decimation: usize,
    /// Bandwidth of one channel, in Hz.
    pub bandwidth_hz: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Default for RadiometerParams {
    fn default() -> Self {
        Self {
            tsamp: 2.56e-6,
            decimation: 128,
            bandwidth_hz: 390_625.0,
            lower: 0.825,
            upper: 1.175,
        }
    }
}

/// Counts of metric values in equal-width bins over [`HISTOGRAM_RANGE`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub range: (f64, f64),
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Histogram of the non-zero values, with the last bin closed on the
    /// right.  Values outside the range are dropped.
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let (lo, hi) = HISTOGRAM_RANGE;
        let mut counts = vec![0u64; HISTOGRAM_BINS];
        for v in values.filter(|&v| v != 0.0 && (lo..=hi).contains(&v)) {
            let bin = ((v - lo) * HISTOGRAM_BINS as f64 / (hi - lo)) as usize;
            let bin = bin.min(HISTOGRAM_BINS - 1);
            counts[bin] += 1;
        }
        Self { range: HISTOGRAM_RANGE, counts }
    }
}

/// Metric values and outlier statistics for one grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RadiometerReport {
    pub chunk_len: usize,
    /// Metric per `[channel, chunk]`; 0 where it was not finite.
    pub values: Array2<f64>,
    pub outliers: usize,
    /// Chunks whose metric was NaN or infinite.
    pub excluded: usize,
    /// Outliers as a percentage of all chunks.
    pub outlier_percent: f64,
    pub histogram: Histogram,
}

/// Evaluate the radiometer metric over `chunk_len`-sample chunks.
pub fn radiometer(
    power: ArrayView2<'_, f64>,
    chunk_len: usize,
    params: &RadiometerParams,
    observer: &dyn Observer,
) -> Result<RadiometerReport> {
    let (n_chans, n_times) = power.dim();
    if n_chans == 0 || n_times == 0 {
        return Err(FlagError::Shape(format!(
            "input grid has zero-length axis (shape: {}×{})",
            n_chans, n_times
        )));
    }
    if chunk_len == 0 || chunk_len > n_times {
        return Err(FlagError::InvalidParameter(format!(
            "improper chunk length {} for {} time samples",
            chunk_len, n_times
        )));
    }
    if n_times % chunk_len != 0 {
        return Err(FlagError::Shape(format!(
            "chunk length {} does not divide {} time samples",
            chunk_len, n_times
        )));
    }

    let start = Instant::now();
    observer.record(&FlagEvent::StageStarted {
        stage: Stage::Radiometer,
        rows: n_chans,
        cols: n_times,
    });

    let norm = (params.bandwidth_hz * params.tsamp * params.decimation as f64).sqrt();
    let mut values = Array2::<f64>::zeros((n_chans, n_times / chunk_len));
    Zip::from(values.rows_mut())
        .and(power.rows())
        .par_for_each(|mut out, channel| {
            for (k, chunk) in channel.exact_chunks(chunk_len).into_iter().enumerate() {
                out[k] = chunk_metric(chunk.iter().copied(), norm);
            }
        });

    let excluded = values.iter().filter(|v| !v.is_finite()).count();
    values.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    let outliers = values
        .iter()
        .filter(|&&v| v != 0.0 && (v > params.upper || v < params.lower))
        .count();
    let outlier_percent = 100.0 * outliers as f64 / values.len() as f64;
    let histogram = Histogram::of(values.iter().copied());

    observer.record(&FlagEvent::StageFinished {
        stage: Stage::Radiometer,
        flagged_fraction: outlier_percent / 100.0,
        non_finite: excluded,
        elapsed_ms: start.elapsed().as_millis() as u64,
    });

    Ok(RadiometerReport {
        chunk_len,
        values,
        outliers,
        excluded,
        outlier_percent,
        histogram,
    })
}

/// Outlier percentage of `before` minus that of `after`.
///
/// A positive value means `after` (typically the masked grid) is closer to
/// radiometer-limited noise.
pub fn compare(
    before: ArrayView2<'_, f64>,
    after: ArrayView2<'_, f64>,
    chunk_len: usize,
    params: &RadiometerParams,
    observer: &dyn Observer,
) -> Result<f64> {
    let a = radiometer(before, chunk_len, params, observer)?;
    let b = radiometer(after, chunk_len, params, observer)?;
    Ok(a.outlier_percent - b.outlier_percent)
}

/// `mean / (σ · norm)` over the finite samples of one chunk.
fn chunk_metric(samples: impl Iterator<Item = f64>, norm: f64) -> f64 {
    let finite: Vec<f64> = samples.filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    mean / (var.sqrt() * norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::NullObserver;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// Parameters with `√(Δν·τ) = 1` so the metric is simply mean/σ.
    fn unit_params() -> RadiometerParams {
        RadiometerParams {
            tsamp: 1.0,
            decimation: 1,
            bandwidth_hz: 1.0,
            lower: 0.5,
            upper: 1.5,
        }
    }

    #[test]
    fn metric_is_mean_over_population_std() {
        // mean 2, population σ 1.
        let grid = array![[1.0, 3.0, 1.0, 3.0]];
        let report = radiometer(grid.view(), 4, &unit_params(), &NullObserver).unwrap();
        assert_relative_eq!(report.values[[0, 0]], 2.0);
        assert_eq!(report.outliers, 1);
        assert_relative_eq!(report.outlier_percent, 100.0);
    }

    #[test]
    fn constant_chunks_are_excluded() {
        let grid = array![[5.0, 5.0, 1.0, 3.0]];
        let report = radiometer(grid.view(), 2, &unit_params(), &NullObserver).unwrap();
        assert_eq!(report.excluded, 1);
        assert_eq!(report.values[[0, 0]], 0.0);
        assert_eq!(report.values[[0, 1]], 2.0);
        assert_eq!(report.outliers, 1);
        assert_relative_eq!(report.outlier_percent, 50.0);
    }

    #[test]
    fn masked_cells_are_skipped() {
        let grid = array![[1.0, 3.0, f64::NAN, 1.0, 3.0, f64::NAN]];
        let report = radiometer(grid.view(), 6, &unit_params(), &NullObserver).unwrap();
        assert_relative_eq!(report.values[[0, 0]], 2.0);
        assert_eq!(report.excluded, 0);
    }

    #[test]
    fn histogram_drops_zeros() {
        let grid = array![[1.0, 3.0, 5.0, 5.0]];
        let report = radiometer(grid.view(), 2, &unit_params(), &NullObserver).unwrap();
        assert_eq!(report.histogram.counts.len(), HISTOGRAM_BINS);
        assert_eq!(report.histogram.counts.iter().sum::<u64>(), 1);
        assert_eq!(report.histogram.counts[100], 1);
    }

    #[test]
    fn chunk_length_is_validated() {
        let grid = Array2::<f64>::ones((2, 12));
        let params = RadiometerParams::default();
        assert!(matches!(
            radiometer(grid.view(), 0, &params, &NullObserver),
            Err(FlagError::InvalidParameter(_))
        ));
        assert!(matches!(
            radiometer(grid.view(), 24, &params, &NullObserver),
            Err(FlagError::InvalidParameter(_))
        ));
        assert!(matches!(
            radiometer(grid.view(), 5, &params, &NullObserver),
            Err(FlagError::Shape(_))
        ));
    }

    #[test]
    fn compare_reports_improvement() {
        let before = array![[1.0, 3.0, 1.0, 3.0], [1.0, 1.2, 1.0, 1.2]];
        let after = array![[1.0, 1.2, 1.0, 1.2], [1.0, 1.2, 1.0, 1.2]];
        let params = RadiometerParams { upper: 20.0, lower: 5.0, ..unit_params() };
        // mean/σ is 2 for the first row and 11 for the others.
        let diff = compare(before.view(), after.view(), 4, &params, &NullObserver).unwrap();
        assert_relative_eq!(diff, 50.0);
    }
}
