//! SumThreshold RFI detector (Offringa et al. 2010), with χ²-fitted
//! thresholds.
//!
//! # Algorithm overview
//!
//! A pass scans every row of the grid (a channel when scanning along time,
//! a time column when scanning along frequency) with non-overlapping
//! windows of exponentially increasing length `L = 2^i`:
//!
//! 1. **Calibration**: for `dof = 2 · combination · L`, compute the median,
//!    MAD and extreme upper quantile of a reference χ²(dof).  This happens
//!    once per window length, before any row is scanned.
//! 2. **Row fit**: sum the row in blocks of `L`, take the median and MAD of
//!    those sums, and shift/scale the reference χ² to match them.  The
//!    threshold is the fitted distribution's `1 - tail` quantile times the
//!    pass multiplier.
//! 3. **Window scan**: within each window, cells already flagged by a
//!    shorter window (or non-finite on input) are replaced by the mean of
//!    the others and written back, so longer windows see in-filled data
//!    rather than the RFI that was already excised.  A window whose sum
//!    exceeds the threshold is flagged as a whole.
//!
//! Rows are independent and scanned in parallel; each row is owned by one
//! task for a whole window length, so its flags and in-filled values are in
//! place before the next length starts.  In combined mode the time and
//! frequency passes each work on a private copy of the input and run
//! concurrently; their masks are ORed at the end.
//!
//! Scanned lengths must be a multiple of the longest window; there is no
//! partial trailing window.

use std::time::Instant;

use ndarray::{s, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip};

use crate::error::{FlagError, Result};
use crate::mask::{combine_into, flagged_fraction};
use crate::observe::{FlagEvent, LogObserver, Observer, Stage};
use crate::stats::{robust_location_scale, Calibration, ChiSquaredFit};
use crate::types::{AxisSelection, Grid, Mask, ScanAxis, SumThresholdParams};

/// Mask produced by [`SumThreshold::flag`] together with its summary.
#[derive(Clone, Debug)]
pub struct SumThresholdOutcome {
    pub mask: Mask,
    pub flagged_fraction: f64,
    /// Windows skipped because every cell in them was already excluded.
    pub degenerate_windows: usize,
    /// Rows or windows whose threshold or sum was not finite; never flagged.
    pub non_finite: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ScanTally {
    flagged_windows: usize,
    degenerate_windows: usize,
    non_finite: usize,
}

impl ScanTally {
    fn merge(self, other: Self) -> Self {
        Self {
            flagged_windows: self.flagged_windows + other.flagged_windows,
            degenerate_windows: self.degenerate_windows + other.degenerate_windows,
            non_finite: self.non_finite + other.non_finite,
        }
    }
}

/// SumThreshold detector.
#[derive(Clone, Debug, Default)]
pub struct SumThreshold {
    params: SumThresholdParams,
}

impl SumThreshold {
    pub fn new(params: SumThresholdParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SumThresholdParams {
        &self.params
    }

    /// Flag `power` (`[channel, time]`) along the selected axis or axes.
    pub fn flag(
        &self,
        power: ArrayView2<'_, f64>,
        axis: AxisSelection,
        observer: &dyn Observer,
    ) -> Result<SumThresholdOutcome> {
        self.params.validate()?;
        let (rows, cols) = power.dim();
        if rows == 0 || cols == 0 {
            return Err(FlagError::Shape(format!(
                "input grid has zero-length axis (shape: {}×{})",
                rows, cols
            )));
        }

        let passes: Vec<(ScanAxis, usize)> = match axis {
            AxisSelection::Frequency => vec![(ScanAxis::Frequency, self.params.single_axis_levels)],
            AxisSelection::Time => vec![(ScanAxis::Time, self.params.single_axis_levels)],
            AxisSelection::Both => vec![
                (ScanAxis::Time, self.params.combined_levels),
                (ScanAxis::Frequency, self.params.combined_levels),
            ],
        };
        for &(scan, levels) in &passes {
            check_scan_length(power.dim(), scan, levels)?;
        }

        let max_levels = passes.iter().map(|&(_, levels)| levels).max().unwrap_or(0);
        let calibrations = (0..max_levels)
            .map(|level| self.calibrate(level))
            .collect::<Result<Vec<_>>>()?;

        let start = Instant::now();
        observer.record(&FlagEvent::StageStarted { stage: Stage::SumThreshold, rows, cols });

        let (mask, tally) = match passes.as_slice() {
            [(scan, levels)] => self.pass(power, *scan, &calibrations[..*levels], observer),
            [(first, first_levels), (second, second_levels)] => {
                let ((mut mask, a), (other, b)) = rayon::join(
                    || self.pass(power, *first, &calibrations[..*first_levels], observer),
                    || self.pass(power, *second, &calibrations[..*second_levels], observer),
                );
                combine_into(&mut mask, other.view())?;
                (mask, a.merge(b))
            }
            _ => unreachable!("one or two passes per run"),
        };

        let fraction = flagged_fraction(mask.view());
        observer.record(&FlagEvent::StageFinished {
            stage: Stage::SumThreshold,
            flagged_fraction: fraction,
            non_finite: tally.non_finite,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        Ok(SumThresholdOutcome {
            mask,
            flagged_fraction: fraction,
            degenerate_windows: tally.degenerate_windows,
            non_finite: tally.non_finite,
        })
    }

    /// Reference χ² statistics for window length `2^level`.
    fn calibrate(&self, level: usize) -> Result<Calibration> {
        let window = 1usize << level;
        let dof = 2.0 * self.params.combination as f64 * window as f64;
        if self.params.monte_carlo_draws > 0 {
            Calibration::monte_carlo(
                dof,
                self.params.tail_probability,
                self.params.monte_carlo_draws,
                self.params.seed.wrapping_add(level as u64),
            )
        } else {
            Calibration::exact(dof, self.params.tail_probability)
        }
    }

    /// One pass over all window lengths along `scan`.  The returned mask is
    /// in the input's `[channel, time]` orientation.
    fn pass(
        &self,
        power: ArrayView2<'_, f64>,
        scan: ScanAxis,
        calibrations: &[Calibration],
        observer: &dyn Observer,
    ) -> (Mask, ScanTally) {
        // Rows of `work` are the sequences being scanned.
        let mut work: Grid = match scan {
            ScanAxis::Time => power.to_owned(),
            ScanAxis::Frequency => power.t().as_standard_layout().into_owned(),
        };
        let invalid: Array2<bool> = work.mapv(|v| !v.is_finite());
        let mut flags = Mask::zeros(work.raw_dim());
        let multiplier = self.params.multiplier(scan);

        let mut tally = ScanTally::default();
        for (level, calibration) in calibrations.iter().enumerate() {
            let window = 1usize << level;
            let level_tally = Zip::from(work.rows_mut())
                .and(flags.rows_mut())
                .and(invalid.rows())
                .par_map_collect(|row, row_flags, row_invalid| {
                    scan_row(row, row_flags, row_invalid, window, calibration, multiplier)
                })
                .fold(ScanTally::default(), |acc, row| acc.merge(*row));

            observer.record(&FlagEvent::LevelCompleted {
                axis: scan,
                window,
                dof: calibration.dof,
                flagged_windows: level_tally.flagged_windows,
                degenerate_windows: level_tally.degenerate_windows,
                non_finite: level_tally.non_finite,
            });
            tally = tally.merge(level_tally);
        }

        let mask = match scan {
            ScanAxis::Time => flags,
            ScanAxis::Frequency => flags.reversed_axes().as_standard_layout().into_owned(),
        };
        (mask, tally)
    }
}

fn check_scan_length(dim: (usize, usize), scan: ScanAxis, levels: usize) -> Result<()> {
    let (rows, cols) = dim;
    let len = match scan {
        ScanAxis::Time => cols,
        ScanAxis::Frequency => rows,
    };
    let longest = 1usize << (levels - 1);
    if len % longest != 0 {
        return Err(FlagError::Shape(format!(
            "{} axis of length {} is not a multiple of the longest window ({})",
            scan, len, longest
        )));
    }
    Ok(())
}

/// Apply one window length to one row, updating its values and flags.
fn scan_row(
    mut row: ArrayViewMut1<'_, f64>,
    mut flags: ArrayViewMut1<'_, u8>,
    invalid: ArrayView1<'_, bool>,
    window: usize,
    calibration: &Calibration,
    multiplier: f64,
) -> ScanTally {
    let mut tally = ScanTally::default();
    let n = row.len();
    let n_windows = n / window;

    let block_sums: Vec<f64> = (0..n)
        .step_by(window)
        .map(|start| row.slice(s![start..start + window]).sum())
        .collect();
    let threshold = robust_location_scale(&block_sums).map(|(med, mad)| {
        multiplier * ChiSquaredFit::from_row(calibration, med, mad).threshold(calibration)
    });
    let threshold = match threshold {
        Some(t) if t.is_finite() => t,
        _ => {
            tally.non_finite += n_windows;
            return tally;
        }
    };

    for start in (0..n).step_by(window) {
        let end = start + window;
        let (sum, count) = (start..end)
            .filter(|&k| flags[k] == 0 && !invalid[k])
            .fold((0.0, 0usize), |(sum, count), k| (sum + row[k], count + 1));

        if count == 0 {
            tally.degenerate_windows += 1;
            continue;
        }
        if count < window {
            let mean = sum / count as f64;
            for k in start..end {
                if flags[k] != 0 || invalid[k] {
                    row[k] = mean;
                }
            }
        }

        let window_sum = row.slice(s![start..end]).sum();
        if !window_sum.is_finite() {
            tally.non_finite += 1;
            continue;
        }
        if window_sum > threshold {
            flags.slice_mut(s![start..end]).fill(1);
            tally.flagged_windows += 1;
        }
    }

    tally
}

/// SumThreshold mask of `power` with the default calibration.
///
/// `axis` selects the frequency axis (0), the time axis (1), or both.
pub fn sum_threshold(power: ArrayView2<'_, f64>, axis: AxisSelection) -> Result<Mask> {
    SumThreshold::default()
        .flag(power, axis, &LogObserver)
        .map(|outcome| outcome.mask)
}
