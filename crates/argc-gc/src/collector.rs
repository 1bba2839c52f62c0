//! The collection cycle: mark, sweep, generation rotation and triggers.
//!
//! At most one cycle runs at a time, serialized behind the cycle lock; a
//! second requester blocks until the in-flight cycle finishes. Mutator
//! threads are never stopped: the mark and sweep phases race allocation
//! and assignment by design, and an edge mutated mid-cycle is at worst
//! reclaimed one cycle late.
//!
//! Because mutators keep running, the mark phase alone is not proof of
//! death: a reference can move between two already/not-yet scanned
//! holders and stay invisible to the tracer. Sweep therefore confirms
//! every unmarked candidate against its retain count before claiming it;
//! see [`confirm_garbage`].
//!
//! Triggers: a background thread timer ([`set_collection_interval`],
//! default 1000 ms), [`request_gc`] (non-blocking wake), or
//! [`collect_now`] (synchronous).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::heap::{self, ObjRef};
use crate::metrics::{self, CycleMetrics};
use crate::phantom;
use crate::state;
use crate::walk::{self, EdgeKind, RefVisitor, MAX_MARK_DEPTH};

#[cfg(feature = "tracing")]
use crate::tracing::{log_phase, next_cycle_id, trace_cycle, CyclePhase};

/// Default background collection interval.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

struct Collector {
    /// Serializes collection cycles and phantom drains.
    cycle_lock: Mutex<()>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    interval_ms: AtomicU64,
    thread_spawned: AtomicBool,
    total_cycles: AtomicU64,
}

fn collector() -> &'static Collector {
    static COLLECTOR: OnceLock<Collector> = OnceLock::new();
    COLLECTOR.get_or_init(|| Collector {
        cycle_lock: Mutex::new(()),
        wake: Mutex::new(false),
        wake_cv: Condvar::new(),
        interval_ms: AtomicU64::new(DEFAULT_INTERVAL_MS),
        thread_spawned: AtomicBool::new(false),
        total_cycles: AtomicU64::new(0),
    })
}

pub(crate) fn cycle_lock() -> MutexGuard<'static, ()> {
    collector().cycle_lock.lock()
}

pub(crate) fn try_cycle_lock() -> Option<MutexGuard<'static, ()>> {
    collector().cycle_lock.try_lock()
}

/// Run a full collection cycle synchronously.
///
/// Blocks behind any in-flight cycle, then marks, sweeps and drains the
/// phantom list before returning.
pub fn collect_now() {
    let c = collector();
    let _guard = c.cycle_lock.lock();
    run_cycle(c);
    phantom::drain_locked();
}

/// Wake the background collector without blocking the caller.
///
/// Spawns the background thread on first use.
pub fn request_gc() {
    let c = collector();
    ensure_background_thread(c);
    *c.wake.lock() = true;
    c.wake_cv.notify_one();
}

/// Set the background collection interval.
///
/// Spawns the background thread on first use and re-arms its timer.
pub fn set_collection_interval(interval: Duration) {
    let c = collector();
    let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    c.interval_ms.store(ms.max(1), Ordering::SeqCst);
    ensure_background_thread(c);
    c.wake_cv.notify_one();
}

fn ensure_background_thread(c: &'static Collector) {
    if c.thread_spawned.swap(true, Ordering::SeqCst) {
        return;
    }
    std::thread::Builder::new()
        .name("argc-gc".into())
        .spawn(move || background_loop(c))
        .expect("failed to spawn collector thread");
}

fn background_loop(c: &'static Collector) {
    loop {
        {
            let mut wake = c.wake.lock();
            if !*wake {
                let ms = c.interval_ms.load(Ordering::SeqCst);
                let _ = c.wake_cv.wait_for(&mut wake, Duration::from_millis(ms));
            }
            *wake = false;
        }
        let _guard = c.cycle_lock.lock();
        run_cycle(c);
        phantom::drain_locked();
    }
}

// ============================================================================
// The cycle: Idle -> Marking -> Sweeping -> Idle
// ============================================================================

/// Requires the cycle lock.
fn run_cycle(c: &Collector) {
    let started = Instant::now();
    let generation = state::advance_generation();

    #[cfg(feature = "tracing")]
    let _span = trace_cycle(next_cycle_id(), generation);

    // Marking: every live slot whose root count is non-zero seeds the
    // traversal. Objects allocated from here on carry the new generation
    // pattern already and cannot be swept below.
    let mark_started = Instant::now();
    let mut marker = Marker {
        generation,
        overflow: Vec::new(),
        marked: 0,
    };
    for (_, header) in heap::heap().slots.scan() {
        let obj = ObjRef::from_header(header);
        if obj.state().is_root_reachable() {
            marker.mark_root(obj);
        }
    }
    marker.drain_overflow();
    let mark_duration = mark_started.elapsed();
    #[cfg(feature = "tracing")]
    log_phase(CyclePhase::Mark, marker.marked);

    // Sweeping: anything the mark phase did not stamp with the current
    // generation, and that no root holds, is a candidate. Candidates are
    // then confirmed dead against their retain counts before any claim.
    let sweep_started = Instant::now();
    let mut surviving = 0usize;
    let mut candidates = Vec::new();
    let mut protected = Vec::new();
    for (_, header) in heap::heap().slots.scan() {
        let obj = ObjRef::from_header(header);
        let st = obj.state();
        if st.is_strong_reachable(generation) {
            surviving += 1;
            continue;
        }
        if st.is_root_reachable() {
            // Bound by a mutator after the mark phase passed this slot.
            surviving += 1;
            continue;
        }
        // A weak-reachable object is never claimed directly (its live
        // holder may still dereference the field), but it stays in the
        // candidate set: its edges into dead cycles must count as
        // internal, and an external retain on it must rescue what it
        // reaches. The scratch bit is cleared for the next cycle.
        let weak = st.is_weak_reachable();
        if weak {
            st.clear_weak_reachable();
        }
        candidates.push(obj);
        protected.push(weak);
    }
    let dead = confirm_garbage(&candidates, &protected);
    surviving += candidates.len() - dead.len();

    // Claim the whole set first, then reclaim: each member's
    // pending_release is already taken, so intra-set releases only
    // decrement and cyclic garbage collapses without double handling.
    let mut garbage = Vec::with_capacity(dead.len());
    for &obj in &dead {
        obj.state().mark_untouchable();
        if obj.state().mark_pending_release() {
            garbage.push(obj);
        }
    }
    for &obj in &garbage {
        heap::reclaim_dead(obj);
    }
    let sweep_duration = sweep_started.elapsed();
    #[cfg(feature = "tracing")]
    log_phase(CyclePhase::Sweep, garbage.len());

    let total_cycles = c.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::record(CycleMetrics {
        duration: started.elapsed(),
        mark_duration,
        sweep_duration,
        objects_marked: marker.marked,
        objects_reclaimed: garbage.len(),
        objects_surviving: surviving,
        generation,
        total_cycles,
    });
}

/// Filter sweep candidates down to confirmed garbage.
///
/// For every candidate, the strong edges reaching it from other
/// candidates are counted and compared against its host retain count. A
/// surplus retain means a reference from outside the set, i.e. a live
/// holder the tracer missed because the edge moved mid-mark; the object,
/// and everything it reaches inside the set, stays alive for this cycle.
/// Mutators retain a value before publishing a field pointing at it, so a
/// strongly held object always shows the surplus, on every schedule.
///
/// All races err toward survival: a stale edge inflates the internal
/// count and a missed edge leaves the retain surplus visible, both of
/// which defer the object to the next cycle instead of claiming it.
///
/// `protected` marks candidates that may not be claimed this cycle (weak
/// reachability); they still contribute edges and liveness so a dead
/// cycle they point into collapses around them.
fn confirm_garbage(candidates: &[ObjRef], protected: &[bool]) -> Vec<ObjRef> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let index: HashMap<ObjRef, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, &obj)| (obj, i))
        .collect();

    let mut internal_refs = vec![0u32; candidates.len()];
    for &obj in candidates {
        walk::for_each_reference(
            obj,
            &mut |child: ObjRef, kind: EdgeKind, _: u32| {
                if kind == EdgeKind::Strong {
                    if let Some(&i) = index.get(&child) {
                        internal_refs[i] += 1;
                    }
                }
            },
            0,
        );
    }

    let mut alive = vec![false; candidates.len()];
    let mut work: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].ref_count() > internal_refs[i])
        .collect();
    for &i in &work {
        alive[i] = true;
    }
    // Liveness propagates through the set; fields are re-read here so an
    // edge installed after the counting pass still rescues its target.
    while let Some(i) = work.pop() {
        let mut reached = Vec::new();
        walk::for_each_reference(
            candidates[i],
            &mut |child: ObjRef, kind: EdgeKind, _: u32| {
                if kind == EdgeKind::Strong {
                    if let Some(&j) = index.get(&child) {
                        reached.push(j);
                    }
                }
            },
            0,
        );
        for j in reached {
            if !alive[j] {
                alive[j] = true;
                work.push(j);
            }
        }
    }

    candidates
        .iter()
        .enumerate()
        .filter(|&(i, _)| !alive[i] && !protected[i])
        .map(|(_, &obj)| obj)
        .collect()
}

/// Marking visitor: stamps strong reachability transitively, records weak
/// reachability without traversing past it, and spills to an explicit
/// worklist past [`MAX_MARK_DEPTH`].
struct Marker {
    generation: u64,
    overflow: Vec<ObjRef>,
    marked: usize,
}

impl Marker {
    fn mark_root(&mut self, obj: ObjRef) {
        if obj.state().mark_strong_reachable(self.generation) {
            self.marked += 1;
            walk::for_each_reference(obj, self, 0);
        }
    }

    fn drain_overflow(&mut self) {
        while let Some(obj) = self.overflow.pop() {
            walk::for_each_reference(obj, self, 0);
        }
    }
}

impl RefVisitor for Marker {
    fn visit(&mut self, child: ObjRef, kind: EdgeKind, depth: u32) {
        match kind {
            EdgeKind::Strong => {
                if child.state().mark_strong_reachable(self.generation) {
                    self.marked += 1;
                    if depth >= MAX_MARK_DEPTH {
                        self.overflow.push(child);
                    } else {
                        walk::for_each_reference(child, self, depth);
                    }
                }
            }
            EdgeKind::Weak => {
                // Recorded only; a weak target's children stay dark unless
                // a strong path reaches them.
                child.state().mark_weak_reachable(self.generation);
            }
        }
    }
}
