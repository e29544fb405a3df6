//! Decimation of complex voltages into power and power² grids.
//!
//! Raw voltage data arrives as complex samples indexed `[time, channel]`
//! (optionally with a trailing polarization axis).  Both detectors work on
//! the power `|V|²` summed over `D` consecutive samples, and Spectral
//! Kurtosis additionally needs the matching sum of `|V|⁴`.  The two sums are
//! always produced together so they share a shape and a decimation factor.
//!
//! Output is channel-major (`[channel, time / D]`), the orientation every
//! downstream consumer expects.  Channels are reduced in parallel.

use std::time::Instant;

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2, Ix3, Zip};
use num_complex::Complex64;

use crate::error::{FlagError, Result};
use crate::observe::{FlagEvent, LogObserver, Observer, Stage};
use crate::types::{Grid, Polarization, PowerMoments};

/// Decimated output for one or two polarizations.
#[derive(Clone, Debug, PartialEq)]
pub enum Decimated {
    Single(PowerMoments),
    Dual(PowerMoments, PowerMoments),
}

impl Decimated {
    /// All decimated pairs, in polarization order.
    pub fn into_pairs(self) -> Vec<PowerMoments> {
        match self {
            Self::Single(pair) => vec![pair],
            Self::Dual(first, second) => vec![first, second],
        }
    }
}

/// Decimate `samples` by `factor`, logging progress through `log`.
///
/// See [`decimate_with`].
pub fn decimate(
    samples: ArrayViewD<'_, Complex64>,
    factor: usize,
    polarization: Polarization,
) -> Result<Decimated> {
    decimate_with(samples, factor, polarization, &LogObserver)
}

/// Decimate a `[time, channel]` or `[time, channel, pol]` array.
///
/// For a two-dimensional input the polarization selector is ignored.  For a
/// three-dimensional input, [`Polarization::First`] selects index 0,
/// [`Polarization::Second`] the last index, and [`Polarization::Both`]
/// decimates both.
pub fn decimate_with(
    samples: ArrayViewD<'_, Complex64>,
    factor: usize,
    polarization: Polarization,
    observer: &dyn Observer,
) -> Result<Decimated> {
    match samples.ndim() {
        2 => {
            let samples = samples
                .into_dimensionality::<Ix2>()
                .map_err(|e| FlagError::Shape(e.to_string()))?;
            decimate_channels(samples, factor, observer).map(Decimated::Single)
        }
        3 => {
            let samples = samples
                .into_dimensionality::<Ix3>()
                .map_err(|e| FlagError::Shape(e.to_string()))?;
            let n_pols = samples.len_of(Axis(2));
            if n_pols == 0 {
                return Err(FlagError::Shape("input has no polarizations".into()));
            }
            let first = samples.index_axis(Axis(2), 0);
            let last = samples.index_axis(Axis(2), n_pols - 1);

            match polarization {
                Polarization::First => decimate_channels(first, factor, observer).map(Decimated::Single),
                Polarization::Second => decimate_channels(last, factor, observer).map(Decimated::Single),
                Polarization::Both => {
                    let (a, b) = rayon::join(
                        || decimate_channels(first, factor, observer),
                        || decimate_channels(last, factor, observer),
                    );
                    Ok(Decimated::Dual(a?, b?))
                }
            }
        }
        n => Err(FlagError::Shape(format!(
            "expected a [time, channel] or [time, channel, pol] array, got {} dimensions",
            n
        ))),
    }
}

/// Decimate one polarization, `[time, channel]` → `[channel, time / factor]`.
pub fn decimate_channels(
    samples: ArrayView2<'_, Complex64>,
    factor: usize,
    observer: &dyn Observer,
) -> Result<PowerMoments> {
    let (n_times, n_chans) = samples.dim();
    if factor == 0 {
        return Err(FlagError::InvalidParameter("decimation factor must be positive".into()));
    }
    if n_times == 0 || n_chans == 0 {
        return Err(FlagError::Shape(format!(
            "input has zero-length axis (shape: {}×{})",
            n_times, n_chans
        )));
    }
    if n_times % factor != 0 {
        return Err(FlagError::Shape(format!(
            "time axis of length {} is not divisible by decimation factor {}",
            n_times, factor
        )));
    }

    let start = Instant::now();
    observer.record(&FlagEvent::StageStarted {
        stage: Stage::Decimation,
        rows: n_times,
        cols: n_chans,
    });

    let n_out = n_times / factor;
    let mut power = Grid::zeros((n_chans, n_out));
    let mut moment = Grid::zeros((n_chans, n_out));

    Zip::from(power.rows_mut())
        .and(moment.rows_mut())
        .and(samples.columns())
        .par_for_each(|mut power_row, mut moment_row, channel| {
            for (k, block) in channel.exact_chunks(factor).into_iter().enumerate() {
                let (s1, s2) = block.iter().fold((0.0, 0.0), |(s1, s2), v| {
                    let p = v.norm_sqr();
                    (s1 + p, s2 + p * p)
                });
                power_row[k] = s1;
                moment_row[k] = s2;
            }
        });

    observer.record(&FlagEvent::StageFinished {
        stage: Stage::Decimation,
        flagged_fraction: 0.0,
        non_finite: power.iter().filter(|v| !v.is_finite()).count(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    });

    PowerMoments::new(power, moment, factor)
}
