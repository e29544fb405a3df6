//! Robust statistics and χ² calibration for SumThreshold.
//!
//! SumThreshold models the sum of `L` decimated cells as a χ² variable with
//! `dof = 2 · combination · L` degrees of freedom, shifted and scaled to
//! match each row's median and MAD.  The shape-to-scale mapping depends
//! only on `dof`, so it is computed once per window length by
//! [`Calibration`] and shared by every row; the per-row fit is the
//! throwaway [`ChiSquaredFit`].
//!
//! Two calibrations are available:
//!
//! * [`Calibration::exact`] inverts the χ² CDF numerically (bisection on
//!   statrs' regularised incomplete gamma).  This is deterministic.
//! * [`Calibration::monte_carlo`] estimates median and MAD from a seeded
//!   sample, the way the detector was first calibrated.

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{FlagError, Result};

/// Median of `values`, averaging the two middle elements for even lengths.
///
/// The slice is reordered.  Returns `None` when it is empty.
pub fn median(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper_mid, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper_mid = *upper_mid;
    if n % 2 == 1 {
        return Some(upper_mid);
    }
    let lower_mid = lower.iter().copied().max_by(f64::total_cmp).unwrap_or(upper_mid);
    Some(0.5 * (lower_mid + upper_mid))
}

/// Median absolute deviation of `values` about `center`.
pub fn median_abs_deviation(values: &[f64], center: f64) -> Option<f64> {
    let mut deviations: Vec<f64> = values.iter().map(|&v| (v - center).abs()).collect();
    median(&mut deviations)
}

/// `(median, MAD)` of the finite entries of `values`.
pub fn robust_location_scale(values: &[f64]) -> Option<(f64, f64)> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let med = median(&mut finite)?;
    let mad = median_abs_deviation(&finite, med)?;
    Some((med, mad))
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Reference statistics of an unscaled χ²(dof) distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub dof: f64,
    /// Median of χ²(dof).
    pub median: f64,
    /// Median absolute deviation of χ²(dof).
    pub mad: f64,
    /// Quantile of χ²(dof) at `1 - tail_probability`.
    pub upper_quantile: f64,
}

impl Calibration {
    /// Deterministic calibration by numerical inversion of the CDF.
    pub fn exact(dof: f64, tail_probability: f64) -> Result<Self> {
        let dist = reference(dof)?;
        let hi = search_ceiling(dof);

        let median = bisect(|x| dist.cdf(x) - 0.5, 0.0, hi);
        // MAD is the half-width d of the interval around the median that
        // holds half of the probability mass.
        let mad = bisect(
            |d| dist.cdf(median + d) - dist.cdf((median - d).max(0.0)) - 0.5,
            0.0,
            hi,
        );
        let upper_quantile = upper_quantile(&dist, dof, tail_probability);

        Self::checked(dof, median, mad, upper_quantile)
    }

    /// Monte Carlo calibration from `draws` seeded samples.
    ///
    /// Only median and MAD are sampled; the tail quantile is always exact
    /// since a sample cannot resolve a 1e-15 tail.
    pub fn monte_carlo(dof: f64, tail_probability: f64, draws: usize, seed: u64) -> Result<Self> {
        if draws == 0 {
            return Err(FlagError::InvalidParameter("Monte Carlo draws must be positive".into()));
        }
        let dist = reference(dof)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let sample: Vec<f64> = (0..draws).map(|_| dist.sample(&mut rng)).collect();

        let (median, mad) = robust_location_scale(&sample)
            .ok_or_else(|| FlagError::Numeric(format!("empty χ² sample for dof={}", dof)))?;
        let upper_quantile = upper_quantile(&dist, dof, tail_probability);

        Self::checked(dof, median, mad, upper_quantile)
    }

    fn checked(dof: f64, median: f64, mad: f64, upper_quantile: f64) -> Result<Self> {
        if !(median.is_finite() && mad.is_finite() && mad > 0.0 && upper_quantile.is_finite()) {
            return Err(FlagError::Numeric(format!(
                "degenerate χ² calibration for dof={} (median={}, mad={}, quantile={})",
                dof, median, mad, upper_quantile
            )));
        }
        Ok(Self { dof, median, mad, upper_quantile })
    }
}

fn reference(dof: f64) -> Result<ChiSquared> {
    ChiSquared::new(dof).map_err(|e| FlagError::Numeric(format!("χ²({}): {}", dof, e)))
}

/// Bisection on the survival function keeps full relative precision deep
/// in the tail, where `1 - cdf` would cancel to zero.
fn upper_quantile(dist: &ChiSquared, dof: f64, tail_probability: f64) -> f64 {
    bisect(|x| tail_probability - dist.sf(x), 0.0, search_ceiling(dof))
}

/// An upper bound comfortably beyond the 1e-15 tail of χ²(dof).
fn search_ceiling(dof: f64) -> f64 {
    dof + 60.0 * (2.0 * dof).sqrt() + 200.0
}

/// Root of a non-decreasing `f` on `[lo, hi]`, to floating-point resolution.
fn bisect<F>(f: F, mut lo: f64, mut hi: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if f(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

// ---------------------------------------------------------------------------
// ChiSquaredFit
// ---------------------------------------------------------------------------

/// A χ²(dof) shifted by `loc` and scaled by `scale` to match one row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChiSquaredFit {
    pub dof: f64,
    pub loc: f64,
    pub scale: f64,
}

impl ChiSquaredFit {
    /// Match the reference median/MAD to a row's median/MAD.
    ///
    /// A row with zero MAD yields `scale = 0`: the fit collapses onto the
    /// row median.
    pub fn from_row(calibration: &Calibration, med: f64, mad: f64) -> Self {
        let scale = mad / calibration.mad;
        Self {
            dof: calibration.dof,
            loc: med - calibration.median * scale,
            scale,
        }
    }

    /// Upper-tail quantile of the fitted distribution.
    pub fn threshold(&self, calibration: &Calibration) -> f64 {
        self.loc + self.scale * calibration.upper_quantile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Wilson–Hilferty approximation of a χ² quantile for standard normal
    /// deviate `z`.
    fn wilson_hilferty(dof: f64, z: f64) -> f64 {
        let a = 2.0 / (9.0 * dof);
        dof * (1.0 - a + z * a.sqrt()).powi(3)
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn mad_of_constant_is_zero() {
        let values = [7.0; 9];
        assert_eq!(robust_location_scale(&values), Some((7.0, 0.0)));
    }

    #[test]
    fn robust_statistics_skip_non_finite() {
        let values = [1.0, f64::NAN, 2.0, f64::INFINITY, 3.0];
        let (med, mad) = robust_location_scale(&values).unwrap();
        assert_eq!(med, 2.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn exact_calibration_matches_known_chi_squared_values() {
        let cal = Calibration::exact(256.0, 1e-15).unwrap();
        assert_relative_eq!(cal.median, wilson_hilferty(256.0, 0.0), max_relative = 1e-4);
        // For large dof, χ² is close to normal with σ = √(2·dof).
        assert_relative_eq!(cal.mad, 0.674_49 * (512.0f64).sqrt(), max_relative = 0.02);
        assert_relative_eq!(cal.upper_quantile, wilson_hilferty(256.0, 7.941_3), max_relative = 0.02);
        assert!(cal.upper_quantile > cal.median);
    }

    #[test]
    fn exact_calibration_is_deterministic() {
        let a = Calibration::exact(2048.0, 1e-15).unwrap();
        let b = Calibration::exact(2048.0, 1e-15).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn monte_carlo_calibration_is_reproducible_and_close() {
        let exact = Calibration::exact(512.0, 1e-15).unwrap();
        let a = Calibration::monte_carlo(512.0, 1e-15, 100_000, 42).unwrap();
        let b = Calibration::monte_carlo(512.0, 1e-15, 100_000, 42).unwrap();
        assert_eq!(a, b);
        assert_relative_eq!(a.median, exact.median, max_relative = 5e-3);
        assert_relative_eq!(a.mad, exact.mad, max_relative = 3e-2);
        assert_eq!(a.upper_quantile, exact.upper_quantile);
    }

    #[test]
    fn invalid_dof_is_a_numeric_error() {
        assert!(matches!(Calibration::exact(-1.0, 1e-15), Err(FlagError::Numeric(_))));
    }

    #[test]
    fn zero_mad_fit_collapses_to_median() {
        let cal = Calibration::exact(256.0, 1e-15).unwrap();
        let fit = ChiSquaredFit::from_row(&cal, 100.0, 0.0);
        assert_eq!(fit.scale, 0.0);
        assert_eq!(fit.threshold(&cal), 100.0);
    }

    #[test]
    fn fit_reproduces_row_median() {
        let cal = Calibration::exact(256.0, 1e-15).unwrap();
        let fit = ChiSquaredFit::from_row(&cal, 1000.0, 30.0);
        // The fitted distribution's median is loc + scale·med_chi.
        assert_relative_eq!(fit.loc + fit.scale * cal.median, 1000.0, max_relative = 1e-12);
        assert!(fit.threshold(&cal) > 1000.0);
    }
}
