//! The per-object packed atomic state word.
//!
//! Every managed object carries exactly one `StateWord` at the start of its
//! header. All liveness bookkeeping for an object (root reference count,
//! reachability marks, phantom/finalization flags and the slot index) lives
//! in this single 64-bit word so that every multi-field transition is a
//! single CAS.
//!
//! Bit layout (low to high):
//!
//! ```text
//! [ 0..28)  root_refs        count of stack/static holders
//! [28]      PHANTOM          demoted to a finalization placeholder
//! [29]      FINALIZED        finalizer already delivered
//! [30]      PENDING_RELEASE  claimed for reclamation
//! [31]      WEAK_REACHABLE   reached only through a weak edge this cycle
//! [32..40)  strong generation field (one-hot, rotated per cycle)
//! [40..64)  slot index into the global slot table
//! ```
//!
//! Strong reachability is not a boolean: the 8-bit generation field is
//! compared against a process-wide rotating marker. Advancing the marker
//! unmarks every object in O(1) because stale patterns simply stop matching.
//!
//! This module is public for testing and advanced use cases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Width of the root reference counter.
pub const ROOT_REF_BITS: u32 = 28;
/// Maximum representable root reference count.
pub const MAX_ROOT_REFS: u64 = (1 << ROOT_REF_BITS) - 1;

const ROOT_REF_MASK: u64 = MAX_ROOT_REFS;

const PHANTOM: u64 = 1 << 28;
const FINALIZED: u64 = 1 << 29;
const PENDING_RELEASE: u64 = 1 << 30;
const WEAK_REACHABLE: u64 = 1 << 31;

const GEN_SHIFT: u32 = 32;
const GEN_MASK: u64 = 0xFF << GEN_SHIFT;

const SLOT_SHIFT: u32 = 40;
/// Width of the slot index field.
pub const SLOT_INDEX_BITS: u32 = 24;
/// Largest slot index the state word can carry.
pub const MAX_SLOT_INDEX: u32 = (1 << SLOT_INDEX_BITS) - 1;
const SLOT_MASK: u64 = (MAX_SLOT_INDEX as u64) << SLOT_SHIFT;

/// The process-wide generation marker.
///
/// A one-hot pattern confined to the 8-bit strong-reachability field.
/// Starts at the lowest bit and wraps back to it after eight cycles.
static GENERATION: AtomicU64 = AtomicU64::new(1);

/// The generation pattern of the cycle currently in effect.
#[inline]
#[must_use]
pub fn current_generation() -> u64 {
    GENERATION.load(Ordering::SeqCst)
}

/// Rotate the generation marker, unmarking every object in O(1).
///
/// Only the collector advances the marker, and only while it holds the
/// cycle lock, so a plain store is sufficient.
pub(crate) fn advance_generation() -> u64 {
    let next = match GENERATION.load(Ordering::SeqCst) << 1 {
        g if g & 0xFF == 0 => 1,
        g => g,
    };
    GENERATION.store(next, Ordering::SeqCst);
    next
}

/// A single managed object's packed atomic state.
///
/// All operations are lock-free CAS loops over the one word. None of them
/// can fail from the caller's perspective: each either performs the
/// requested transition or reports that a racing thread already did.
#[derive(Debug)]
pub struct StateWord(AtomicU64);

impl StateWord {
    /// Compose the initial word for a freshly allocated object.
    ///
    /// Newborns start with one root reference and with their strong
    /// generation field already matching `generation`, so an object
    /// allocated in the middle of a cycle can never be swept before its
    /// first outgoing edges are installed.
    #[must_use]
    pub fn new(slot_index: u32, generation: u64) -> Self {
        debug_assert!(slot_index <= MAX_SLOT_INDEX, "slot index out of range");
        debug_assert!(generation & !0xFF == 0 && generation != 0);
        let word = 1 | (generation << GEN_SHIFT) | (u64::from(slot_index) << SLOT_SHIFT);
        Self(AtomicU64::new(word))
    }

    #[inline]
    fn load(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment the root reference count.
    pub fn bind(&self) {
        let prev = self.0.fetch_add(1, Ordering::SeqCst);
        debug_assert!(
            prev & ROOT_REF_MASK < MAX_ROOT_REFS,
            "root reference count overflow"
        );
    }

    /// Decrement the root reference count, returning the remaining count.
    pub fn unbind(&self) -> u64 {
        let prev = self.0.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev & ROOT_REF_MASK > 0, "root reference count underflow");
        (prev & ROOT_REF_MASK).wrapping_sub(1)
    }

    /// Whether any stack/static holder still references this object.
    #[inline]
    #[must_use]
    pub fn is_root_reachable(&self) -> bool {
        self.load() & ROOT_REF_MASK > 0
    }

    /// The current root reference count.
    #[must_use]
    pub fn root_refs(&self) -> u64 {
        self.load() & ROOT_REF_MASK
    }

    /// Whether the strong generation field matches `generation`.
    #[inline]
    #[must_use]
    pub fn is_strong_reachable(&self, generation: u64) -> bool {
        (self.load() & GEN_MASK) >> GEN_SHIFT == generation
    }

    /// Whether the object was reached through a weak edge this cycle.
    #[inline]
    #[must_use]
    pub fn is_weak_reachable(&self) -> bool {
        self.load() & WEAK_REACHABLE != 0
    }

    /// Stamp the strong generation field with `generation`.
    ///
    /// Returns `false` if the object already matched, in which case the
    /// caller must not re-traverse its children. Marking strong clears the
    /// weak bit: exactly one of {untouched, weak, strong} holds per
    /// generation.
    ///
    /// An object already claimed for release is never marked: a tracer
    /// can legitimately hold a reference it read before a racing mutator
    /// severed the last edge, and reclamation has priority over marking.
    pub fn mark_strong_reachable(&self, generation: u64) -> bool {
        loop {
            let cur = self.load();
            if (cur & GEN_MASK) >> GEN_SHIFT == generation || cur & PENDING_RELEASE != 0 {
                return false;
            }
            let next = (cur & !(GEN_MASK | WEAK_REACHABLE)) | (generation << GEN_SHIFT);
            if self
                .0
                .compare_exchange_weak(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Set the weak bit iff the object is not already reachable, weakly
    /// or strongly, in the current generation. Claimed objects are left
    /// alone, as with the strong mark.
    ///
    /// Returns whether the transition was performed.
    pub fn mark_weak_reachable(&self, generation: u64) -> bool {
        loop {
            let cur = self.load();
            if (cur & GEN_MASK) >> GEN_SHIFT == generation
                || cur & (WEAK_REACHABLE | PENDING_RELEASE) != 0
            {
                return false;
            }
            if self
                .0
                .compare_exchange_weak(cur, cur | WEAK_REACHABLE, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Clear both reachability marks. Used by sweep once an object is
    /// confirmed unreachable. Returns whether any mark was cleared.
    pub fn mark_untouchable(&self) -> bool {
        loop {
            let cur = self.load();
            if cur & (GEN_MASK | WEAK_REACHABLE) == 0 {
                return false;
            }
            if self
                .0
                .compare_exchange_weak(
                    cur,
                    cur & !(GEN_MASK | WEAK_REACHABLE),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Clear a stale weak bit on a survivor so the next cycle re-evaluates
    /// it from scratch.
    pub(crate) fn clear_weak_reachable(&self) {
        self.0.fetch_and(!WEAK_REACHABLE, Ordering::SeqCst);
    }

    /// Demote the object to a phantom placeholder. One-shot: returns
    /// `false` if it was already a phantom.
    pub fn mark_phantom(&self) -> bool {
        self.set_flag_once(PHANTOM)
    }

    /// Record that a finalizer has run. One-shot: returns `false` if the
    /// finalizer was already delivered.
    pub fn mark_finalized(&self) -> bool {
        self.set_flag_once(FINALIZED)
    }

    /// Claim the object for reclamation. One-shot: returns `false` if a
    /// racing thread (or the collector) already claimed it. The winner of
    /// this transition owns teardown; everyone else must stand down.
    pub fn mark_pending_release(&self) -> bool {
        self.set_flag_once(PENDING_RELEASE)
    }

    /// Whether the object has been claimed for reclamation.
    #[must_use]
    pub fn is_pending_release(&self) -> bool {
        self.load() & PENDING_RELEASE != 0
    }

    /// Whether the object has been demoted to a phantom placeholder.
    #[must_use]
    pub fn is_phantom(&self) -> bool {
        self.load() & PHANTOM != 0
    }

    fn set_flag_once(&self, flag: u64) -> bool {
        loop {
            let cur = self.load();
            if cur & flag != 0 {
                return false;
            }
            if self
                .0
                .compare_exchange_weak(cur, cur | flag, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// The slot index recorded for this object.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn slot_index(&self) -> u32 {
        // The field is 24 bits wide, the cast cannot truncate.
        ((self.load() & SLOT_MASK) >> SLOT_SHIFT) as u32
    }

    /// Replace the slot index bits, leaving every other bit untouched.
    ///
    /// CAS-retry so a concurrent flag update from another operation is
    /// never lost.
    pub fn set_slot_index(&self, idx: u32) {
        debug_assert!(idx <= MAX_SLOT_INDEX, "slot index out of range");
        loop {
            let cur = self.load();
            let next = (cur & !SLOT_MASK) | (u64::from(idx) << SLOT_SHIFT);
            if self
                .0
                .compare_exchange_weak(cur, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }
}
