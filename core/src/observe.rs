//! Progress reporting for the flagging stages.
//!
//! The detectors never write to a process-wide logger themselves.  Each
//! entry point takes an [`Observer`] and reports structured [`FlagEvent`]s
//! to it; [`LogObserver`] forwards those events to the `log` facade so the
//! host application decides where (and whether) they end up.

use std::sync::Mutex;

use log::{debug, info, warn};
use serde::Serialize;

use crate::types::ScanAxis;

/// Pipeline stage an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decimation,
    SpectralKurtosis,
    SumThreshold,
    Radiometer,
}

/// A structured progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlagEvent {
    StageStarted {
        stage: Stage,
        rows: usize,
        cols: usize,
    },
    /// One SumThreshold window length has been applied to every row.
    LevelCompleted {
        axis: ScanAxis,
        window: usize,
        dof: f64,
        flagged_windows: usize,
        degenerate_windows: usize,
        non_finite: usize,
    },
    StageFinished {
        stage: Stage,
        flagged_fraction: f64,
        non_finite: usize,
        elapsed_ms: u64,
    },
}

/// Sink for [`FlagEvent`]s.
///
/// Observers must be `Sync`: the two passes of combined-mode SumThreshold
/// report concurrently.
pub trait Observer: Sync {
    fn record(&self, event: &FlagEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn record(&self, _event: &FlagEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn record(&self, event: &FlagEvent) {
        match event {
            FlagEvent::StageStarted { stage, rows, cols } => {
                info!("Beginning {:?} on {}×{} grid", stage, rows, cols);
            }
            FlagEvent::LevelCompleted {
                axis,
                window,
                dof,
                flagged_windows,
                degenerate_windows,
                non_finite,
            } => {
                debug!(
                    "SumThreshold {} pass: window={} dof={} flagged_windows={} fully_excluded={}",
                    axis, window, dof, flagged_windows, degenerate_windows
                );
                if *non_finite > 0 {
                    warn!(
                        "SumThreshold {} pass, window {}: {} non-finite decisions skipped",
                        axis, window, non_finite
                    );
                }
            }
            FlagEvent::StageFinished {
                stage,
                flagged_fraction,
                non_finite,
                elapsed_ms,
            } => {
                info!(
                    "Finished {:?} in {} ms: {:.4}% flagged",
                    stage,
                    elapsed_ms,
                    flagged_fraction * 100.0
                );
                if *non_finite > 0 {
                    warn!("{:?}: {} non-finite cells left unflagged", stage, non_finite);
                }
            }
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<FlagEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<FlagEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Observer for RecordingObserver {
    fn record(&self, event: &FlagEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_event_carries_stage_timing() {
        let observer = RecordingObserver::new();
        observer.record(&FlagEvent::StageFinished {
            stage: Stage::SumThreshold,
            flagged_fraction: 0.25,
            non_finite: 0,
            elapsed_ms: 17,
        });

        let json = serde_json::to_value(&observer.events()[0]).unwrap();
        assert_eq!(json["event"], "stage_finished");
        assert_eq!(json["stage"], "sum_threshold");
        assert_eq!(json["elapsed_ms"], 17);
    }
}
