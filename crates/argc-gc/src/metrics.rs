//! Collection cycle metrics.

use std::time::Duration;

use parking_lot::Mutex;

/// Statistics from the most recent collection cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleMetrics {
    /// Duration of the whole cycle.
    pub duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase, reclamation included.
    pub sweep_duration: Duration,
    /// Objects marked reachable (strongly) this cycle.
    pub objects_marked: usize,
    /// Objects handed to reclamation this cycle.
    pub objects_reclaimed: usize,
    /// Objects that survived the sweep.
    pub objects_surviving: usize,
    /// Generation pattern the cycle ran under.
    pub generation: u64,
    /// Cycles completed since process start.
    pub total_cycles: u64,
}

impl CycleMetrics {
    /// All-zero metrics, the state before the first cycle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            mark_duration: Duration::from_secs(0),
            sweep_duration: Duration::from_secs(0),
            objects_marked: 0,
            objects_reclaimed: 0,
            objects_surviving: 0,
            generation: 0,
            total_cycles: 0,
        }
    }
}

impl Default for CycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static LAST: Mutex<CycleMetrics> = Mutex::new(CycleMetrics::new());

/// Metrics of the most recently completed cycle.
#[must_use]
pub fn last_cycle_metrics() -> CycleMetrics {
    *LAST.lock()
}

pub(crate) fn record(metrics: CycleMetrics) {
    *LAST.lock() = metrics;
}
