//! Spectral Kurtosis (SK) RFI detector.
//!
//! For `M` accumulated power samples with sum `S1` and sum of squares `S2`,
//! the SK estimator
//!
//! ```text
//! SK = (M + 1) / (M - 1) · (M · S2 / S1² − 1)
//! ```
//!
//! has expectation ≈ 1 for Gaussian voltage noise (exponentially
//! distributed power) and departs from 1 for non-Gaussian signals:
//! continuous-wave interference pulls it below 1, intermittent bursts push
//! it above.  Cells outside `[lower, upper]` are flagged.  This is a
//! pointwise test with no neighbour interaction, evaluated in parallel.

use std::time::Instant;

use ndarray::{ArrayView2, Zip};

use crate::error::{FlagError, Result};
use crate::mask::flagged_fraction;
use crate::observe::{FlagEvent, LogObserver, Observer, Stage};
use crate::types::{Mask, SkParams};

/// Added to numerator and denominator so all-zero cells stay finite.
pub const SK_EPSILON: f64 = 1e-5;

/// The SK estimator for one cell.
pub fn sk_statistic(s1: f64, s2: f64, m: usize) -> f64 {
    let m = m as f64;
    ((m + 1.0) / (m - 1.0)) * (m * (s2 + SK_EPSILON) / (s1 * s1 + SK_EPSILON) - 1.0)
}

/// Mask produced by [`SpectralKurtosis::flag`] together with its summary.
#[derive(Clone, Debug)]
pub struct SkOutcome {
    pub mask: Mask,
    pub flagged_fraction: f64,
    /// Cells whose statistic was NaN or infinite; these are never flagged.
    pub non_finite: usize,
}

/// Spectral Kurtosis detector.
#[derive(Clone, Debug, Default)]
pub struct SpectralKurtosis {
    params: SkParams,
}

impl SpectralKurtosis {
    pub fn new(params: SkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SkParams {
        &self.params
    }

    /// Flag every cell whose SK lies outside the configured bounds.
    ///
    /// `power` and `moment` must be decimated by the same factor, which
    /// should equal `params.m`.
    pub fn flag(
        &self,
        power: ArrayView2<'_, f64>,
        moment: ArrayView2<'_, f64>,
        observer: &dyn Observer,
    ) -> Result<SkOutcome> {
        self.params.validate()?;
        if power.dim() != moment.dim() {
            return Err(FlagError::Shape(format!(
                "power grid {:?} and moment grid {:?} differ in shape",
                power.dim(),
                moment.dim()
            )));
        }
        let (rows, cols) = power.dim();
        if rows == 0 || cols == 0 {
            return Err(FlagError::Shape(format!(
                "input grid has zero-length axis (shape: {}×{})",
                rows, cols
            )));
        }

        let start = Instant::now();
        observer.record(&FlagEvent::StageStarted { stage: Stage::SpectralKurtosis, rows, cols });

        let SkParams { m, upper, lower } = self.params;
        let statistic = Zip::from(&power)
            .and(&moment)
            .par_map_collect(|&s1, &s2| sk_statistic(s1, s2, m));

        let non_finite = statistic.iter().filter(|v| !v.is_finite()).count();
        let mask = statistic.mapv(|sk| u8::from(sk.is_finite() && (sk > upper || sk < lower)));
        let fraction = flagged_fraction(mask.view());

        observer.record(&FlagEvent::StageFinished {
            stage: Stage::SpectralKurtosis,
            flagged_fraction: fraction,
            non_finite,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        Ok(SkOutcome { mask, flagged_fraction: fraction, non_finite })
    }
}

/// Spectral Kurtosis mask of a decimated power/moment pair.
///
/// `m` is the number of raw samples per cell (128 by default), with
/// `upper = 1.5` and `lower = 0.6` as the usual bounds for that `m`.
pub fn spectral_kurtosis(
    power: ArrayView2<'_, f64>,
    moment: ArrayView2<'_, f64>,
    m: usize,
    upper: f64,
    lower: f64,
) -> Result<Mask> {
    SpectralKurtosis::new(SkParams { m, upper, lower })
        .flag(power, moment, &LogObserver)
        .map(|outcome| outcome.mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::{NullObserver, RecordingObserver};
    use crate::types::Grid;
    use approx::assert_relative_eq;

    const M: usize = 128;

    /// Moment grid consistent with exponentially distributed power:
    /// E[p²] = 2·E[p]², so S2 = 2·S1² / M.
    fn gaussian_pair(rows: usize, cols: usize, c: f64) -> (Grid, Grid) {
        let power = Grid::from_elem((rows, cols), c);
        let moment = Grid::from_elem((rows, cols), 2.0 * c * c / M as f64);
        (power, moment)
    }

    #[test]
    fn gaussian_noise_has_unit_kurtosis() {
        let sk = sk_statistic(1000.0, 2.0 * 1000.0 * 1000.0 / M as f64, M);
        assert_relative_eq!(sk, (M as f64 + 1.0) / (M as f64 - 1.0), max_relative = 1e-6);
        assert_relative_eq!(sk, 1.0, epsilon = 0.02);
    }

    #[test]
    fn gaussian_input_is_not_flagged() {
        let (power, moment) = gaussian_pair(8, 16, 500.0);
        let mask = spectral_kurtosis(power.view(), moment.view(), M, 1.5, 0.6).unwrap();
        assert!(mask.iter().all(|&v| v == 0));
    }

    #[test]
    fn both_bounds_flag() {
        let (power, mut moment) = gaussian_pair(4, 4, 500.0);
        moment[[1, 2]] *= 10.0;
        moment[[3, 0]] = 0.0;

        let outcome = SpectralKurtosis::default()
            .flag(power.view(), moment.view(), &NullObserver)
            .unwrap();
        assert_eq!(outcome.mask[[1, 2]], 1);
        assert_eq!(outcome.mask[[3, 0]], 1);
        assert_eq!(outcome.mask.iter().filter(|&&v| v == 1).count(), 2);
        assert_relative_eq!(outcome.flagged_fraction, 2.0 / 16.0);
    }

    #[test]
    fn non_finite_cells_are_left_unflagged() {
        let (mut power, moment) = gaussian_pair(2, 2, 500.0);
        power[[0, 0]] = f64::NAN;
        let outcome = SpectralKurtosis::default()
            .flag(power.view(), moment.view(), &NullObserver)
            .unwrap();
        assert_eq!(outcome.mask[[0, 0]], 0);
        assert_eq!(outcome.non_finite, 1);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let power = Grid::zeros((2, 4));
        let moment = Grid::zeros((4, 2));
        let err = spectral_kurtosis(power.view(), moment.view(), M, 1.5, 0.6).unwrap_err();
        assert!(matches!(err, FlagError::Shape(_)));
    }

    #[test]
    fn degenerate_accumulation_is_rejected() {
        let (power, moment) = gaussian_pair(2, 2, 1.0);
        let err = spectral_kurtosis(power.view(), moment.view(), 1, 1.5, 0.6).unwrap_err();
        assert!(matches!(err, FlagError::InvalidParameter(_)));
    }

    #[test]
    fn observer_sees_start_and_finish() {
        let (power, moment) = gaussian_pair(2, 2, 1.0);
        let observer = RecordingObserver::new();
        SpectralKurtosis::default()
            .flag(power.view(), moment.view(), &observer)
            .unwrap();
        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            FlagEvent::StageFinished { stage: Stage::SpectralKurtosis, .. }
        ));
    }
}
