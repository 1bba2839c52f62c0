//! The phantom list and finalization delivery.
//!
//! A reclaimed object is first demoted to a phantom placeholder: its
//! fields are severed, its slot is retired, and the carcass is appended to
//! a lock-free queue. A separate drain step, never the hot collection
//! path, delivers each registered finalizer exactly once and then returns
//! the memory.

use std::sync::OnceLock;

use crossbeam_queue::SegQueue;

use crate::class;
use crate::heap::{self, ObjRef};

fn queue() -> &'static SegQueue<ObjRef> {
    static PHANTOMS: OnceLock<SegQueue<ObjRef>> = OnceLock::new();
    PHANTOMS.get_or_init(SegQueue::new)
}

/// Append a detached carcass. The caller has already won the object's
/// `pending_release` transition and retired its slot.
pub(crate) fn enqueue(obj: ObjRef) {
    queue().push(obj);
}

/// Number of phantoms awaiting delivery.
#[must_use]
pub fn pending_phantoms() -> usize {
    queue().len()
}

/// Drain the phantom list: deliver finalizers, then deallocate.
///
/// Runs with the cycle lock held so no sweep is concurrently reading the
/// headers about to be freed. `mark_finalized` guards re-entry: racing
/// deliveries for one object resolve to exactly one finalizer call.
pub(crate) fn drain_locked() -> usize {
    let mut delivered = 0;
    while let Some(obj) = queue().pop() {
        if let Some(finalizer) = class::layout(obj.class()).finalizer {
            if obj.state().mark_finalized() {
                finalizer(obj);
                delivered += 1;
            }
        }
        heap::dealloc_object(obj);
    }
    #[cfg(feature = "tracing")]
    crate::tracing::log_phase(crate::tracing::CyclePhase::Finalize, delivered);
    delivered
}

/// Best-effort drain after a host-release teardown, so memory comes back
/// even when no collection cycle ever runs.
///
/// Skips when the cycle lock is held: the holder (an in-flight cycle or
/// another drain, possibly further up this very stack) drains instead.
pub(crate) fn drain_opportunistic() {
    if let Some(_guard) = crate::collector::try_cycle_lock() {
        drain_locked();
    }
}

/// Deliver pending finalizers and free their objects.
///
/// Blocks behind any in-flight collection cycle. Returns the number of
/// finalizers delivered.
pub fn drain_phantoms() -> usize {
    let _guard = crate::collector::cycle_lock();
    drain_locked()
}
