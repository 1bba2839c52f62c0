//! A concurrent cycle collector layered on a retain/release substrate.
//!
//! `argc-gc` is the runtime half of a source-to-source translation
//! pipeline: translated code runs under compiler-inserted retain/release
//! calls, which cannot reclaim cyclic object graphs on their own. This
//! crate embeds a concurrent, generational, reference-count-augmented
//! collector that detects and reclaims cycles without disabling the
//! retain/release discipline.
//!
//! Every managed object carries a single packed atomic state word (root
//! reference count, reachability marks, a rotating generation field and a
//! slot index), so all liveness transitions are one CAS. A background or
//! on-demand cycle marks from the root set and sweeps the global slot
//! table; advancing the generation marker unmarks the whole heap in O(1).
//!
//! # Quick Start
//!
//! ```ignore
//! use argc_gc::{alloc, assign_strong_field, collect_now, register_class, ClassDesc, StackRoot};
//!
//! let node = register_class(ClassDesc {
//!     name: "Node",
//!     super_class: None,
//!     instance_size: 16,
//!     strong_offsets: vec![0],
//!     weak_offsets: vec![8],
//!     finalizer: None,
//! });
//!
//! let a = StackRoot::adopt(alloc(node, 0));
//! let b = StackRoot::adopt(alloc(node, 0));
//!
//! // a -> b -> a: a cycle the retain counts alone would leak.
//! unsafe {
//!     assign_strong_field(a.get().field(0), Some(b.get()));
//!     assign_strong_field(b.get().field(0), Some(a.get()));
//! }
//!
//! drop(a);
//! drop(b);
//! collect_now(); // the cycle is detected and reclaimed
//! ```
//!
//! # Thread Safety
//!
//! Mutator threads run concurrently with the collector; no operation on
//! the state word, the mutator API or the graph walker blocks. The only
//! blocking points are layout construction, slot table growth, and
//! [`collect_now`] waiting behind an in-flight cycle.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod class;
mod collector;
mod heap;
mod metrics;
mod phantom;
mod slots;
#[cfg(feature = "tracing")]
mod tracing;
mod walk;

/// Packed atomic state word internals.
///
/// This module is public for testing and advanced use cases. Most users
/// should stay on the mutator API.
pub mod state;

pub use class::{class_name, layout, register_class, ClassDesc, ClassId, ClassLayout, Finalizer};
pub use collector::{collect_now, request_gc, set_collection_interval, DEFAULT_INTERVAL_MS};
pub use heap::{
    alloc, assign_generic_field, assign_strong_field, bind, clone_obj, heap_stats, live_objects,
    release, retain, unbind, FieldSlot, HeapStats, ObjRef, StackRoot, OBJ_ALIGN,
};
pub use metrics::{last_cycle_metrics, CycleMetrics};
pub use phantom::{drain_phantoms, pending_phantoms};
pub use walk::{for_each_reference, EdgeKind, RefVisitor, MAX_MARK_DEPTH};

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    pub use crate::state::current_generation;

    /// Rotate the generation marker without running a cycle.
    pub fn advance_generation() -> u64 {
        crate::state::advance_generation()
    }
}
