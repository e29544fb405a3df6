//! Flagging engine: runs the enabled detectors over a decimated pair and
//! combines their masks.
//!
//! # Steps
//!
//! 1. **Validation**: every parameter set is checked before any work.
//! 2. **Worker pool**: with `n_workers > 0` the run is confined to a
//!    dedicated rayon pool of that size.
//! 3. **Spectral Kurtosis**: pointwise test on the power/moment pair.
//! 4. **SumThreshold**: multi-resolution scan of the power grid.
//! 5. **Combination**: logical OR of the detector masks.

use std::time::Instant;

use log::{info, warn};
#[cfg(feature = "python")]
use pyo3::prelude::*;

use crate::error::{FlagError, Result};
use crate::mask::{combine_into, flagged_fraction};
use crate::observe::Observer;
use crate::spectral_kurtosis::SpectralKurtosis;
use crate::sum_threshold::SumThreshold;
use crate::types::{FlagParams, FlagResult, Mask, PowerMoments};

/// The main flagging engine.
///
/// Construct with a [`FlagParams`] and call [`RfiFlagger::flag`] on a
/// decimated [`PowerMoments`] pair to obtain a [`FlagResult`].
#[cfg_attr(feature = "python", pyclass)]
#[derive(Clone, Debug, Default)]
pub struct RfiFlagger {
    params: FlagParams,
}

impl RfiFlagger {
    pub fn new(params: FlagParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FlagParams {
        &self.params
    }

    /// Flag a decimated power/moment pair.
    pub fn flag(&self, data: &PowerMoments, observer: &dyn Observer) -> Result<FlagResult> {
        self.params.validate()?;

        if self.params.n_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.n_workers)
                .build()
                .map_err(|e| FlagError::ThreadPool(e.to_string()))?;
            pool.install(|| self.run(data, observer))
        } else {
            self.run(data, observer)
        }
    }

    fn run(&self, data: &PowerMoments, observer: &dyn Observer) -> Result<FlagResult> {
        let start = Instant::now();
        let (n_chans, n_times) = data.dim();
        info!(
            "Flagging {}×{} grid (decimation {}), sk={}, sum_threshold={:?}",
            n_chans,
            n_times,
            data.factor(),
            self.params.sk.is_some(),
            self.params.sum_threshold.as_ref().map(|_| self.params.axis),
        );

        let mut mask: Option<Mask> = None;

        let sk_fraction = match &self.params.sk {
            Some(sk) => {
                if sk.m != data.factor() {
                    warn!(
                        "SK accumulation length {} differs from decimation factor {}",
                        sk.m,
                        data.factor()
                    );
                }
                let outcome = SpectralKurtosis::new(sk.clone()).flag(
                    data.power().view(),
                    data.moment().view(),
                    observer,
                )?;
                mask = Some(outcome.mask);
                Some(outcome.flagged_fraction)
            }
            None => None,
        };

        let sum_threshold_fraction = match &self.params.sum_threshold {
            Some(st) => {
                let outcome = SumThreshold::new(st.clone()).flag(
                    data.power().view(),
                    self.params.axis,
                    observer,
                )?;
                match mask.as_mut() {
                    Some(existing) => combine_into(existing, outcome.mask.view())?,
                    None => mask = Some(outcome.mask),
                }
                Some(outcome.flagged_fraction)
            }
            None => None,
        };

        // validate() guarantees at least one detector ran.
        let mask = mask.ok_or_else(|| FlagError::InvalidParameter("no detector enabled".into()))?;
        let flagged = flagged_fraction(mask.view());
        let elapsed = start.elapsed().as_millis() as u64;
        info!("Flagging complete in {} ms, {:.4}% flagged", elapsed, flagged * 100.0);

        Ok(FlagResult {
            mask,
            sk_fraction,
            sum_threshold_fraction,
            flagged_fraction: flagged,
            processing_time_ms: elapsed,
        })
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl RfiFlagger {
    /// Create a new flagger with the given parameters.
    #[new]
    #[pyo3(signature = (params=None))]
    pub fn py_new(params: Option<FlagParams>) -> Self {
        Self::new(params.unwrap_or_default())
    }

    /// Flag a decimated pair from Python.
    ///
    /// `power` and `moment` are flattened (row-major) grids with shape
    /// `(n_chans, n_times)`.
    #[pyo3(name = "flag")]
    pub fn py_flag(
        &self,
        py: Python<'_>,
        power: Vec<f64>,
        moment: Vec<f64>,
        n_chans: usize,
        n_times: usize,
        factor: usize,
    ) -> PyResult<FlagResult> {
        let data = crate::python::power_moments(power, moment, n_chans, n_times, factor)?;
        Ok(py.allow_threads(|| self.flag(&data, &crate::observe::LogObserver))?)
    }

    fn __repr__(&self) -> String {
        format!("RfiFlagger({:?})", self.params)
    }
}
