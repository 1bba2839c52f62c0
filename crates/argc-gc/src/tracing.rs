//! Structured spans and events for collection cycles.

use std::sync::atomic::{AtomicU64, Ordering};

use ::tracing::{debug, span, Level};

/// Collection cycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// Trace the live object graph from the root set.
    Mark,
    /// Scan the slot table and claim unreachable objects.
    Sweep,
    /// Deliver finalizers and return memory.
    Finalize,
}

/// Stable identifier correlating all events of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleId(pub u64);

static NEXT_CYCLE_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_cycle_id() -> CycleId {
    CycleId(NEXT_CYCLE_ID.fetch_add(1, Ordering::Relaxed))
}

/// Span covering one full collection cycle.
pub fn trace_cycle(cycle_id: CycleId, generation: u64) -> span::EnteredSpan {
    span!(
        Level::DEBUG,
        "gc_cycle",
        cycle_id = cycle_id.0,
        generation
    )
    .entered()
}

/// Log the end of a cycle phase with its headline count.
pub fn log_phase(phase: CyclePhase, objects: usize) {
    debug!(phase = ?phase, objects, "phase_end");
}
