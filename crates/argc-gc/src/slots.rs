//! The global slot table.
//!
//! Every managed object claims one slot at allocation time, so the sweep
//! phase can discover the whole population by scanning this table instead
//! of the heap. Claiming, retiring and reading never take a lock; only
//! growth does. A growth version counter (odd while a copy is in
//! flight) lets writers validate that no growth overlapped their store
//! and redo it in the new table when one did, so no entry is lost to the
//! copy. Superseded tables are leaked so a reader holding a stale
//! snapshot never races a free.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use crate::heap::ObjHeader;
use crate::state::MAX_SLOT_INDEX;

const INITIAL_CAPACITY: usize = 1024;

struct TableInner {
    entries: Box<[AtomicPtr<ObjHeader>]>,
}

impl TableInner {
    fn with_capacity(cap: usize) -> Self {
        Self {
            entries: (0..cap).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
        }
    }
}

/// Growable registry mapping slot indices to live object headers.
pub(crate) struct SlotTable {
    /// Currently published table. Only ever replaced by a strictly larger
    /// copy, under the growth lock.
    current: AtomicPtr<TableInner>,
    /// Next never-used index; retired indices bypass it via `free`.
    next: AtomicU32,
    /// Incremented to odd before a growth copy starts and back to even
    /// once the new table is published.
    version: AtomicU64,
    /// Taken only to grow the table, never on the claim fast path.
    growth: Mutex<()>,
    /// Indices retired by reclamation, ready for reuse.
    free: SegQueue<u32>,
    live: AtomicUsize,
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        Self {
            current: AtomicPtr::new(ptr::null_mut()),
            next: AtomicU32::new(0),
            version: AtomicU64::new(0),
            growth: Mutex::new(()),
            free: SegQueue::new(),
            live: AtomicUsize::new(0),
        }
    }

    /// Claim a slot for `obj` and return its index. Lock-free unless the
    /// table has to grow.
    ///
    /// Panics when the 24-bit index space is exhausted; the process cannot
    /// continue with an untracked object.
    pub(crate) fn claim(&self, obj: NonNull<ObjHeader>) -> u32 {
        let idx = self.free.pop().unwrap_or_else(|| {
            let idx = self.next.fetch_add(1, Ordering::SeqCst);
            assert!(idx <= MAX_SLOT_INDEX, "slot table exhausted");
            idx
        });
        self.publish(idx, obj.as_ptr());
        self.live.fetch_add(1, Ordering::Relaxed);
        idx
    }

    /// Release `idx` back to the free pool. The entry is nulled first so a
    /// concurrent scan cannot resolve it anymore.
    pub(crate) fn retire(&self, idx: u32) {
        self.publish(idx, ptr::null_mut());
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.free.push(idx);
    }

    /// Store `value` at `idx`, surviving a concurrent growth.
    ///
    /// Growth copies the old table while writers keep storing into it. A
    /// store is only final if the growth version is even and unchanged
    /// around it: then no copy overlapped, so either the store went to
    /// the current table or a later copy will carry it over. Otherwise
    /// the copy may have missed the store and it is redone in the new
    /// table. Each index has a single owner, so two `publish` calls never
    /// race each other on the same entry.
    fn publish(&self, idx: u32, value: *mut ObjHeader) {
        loop {
            let version = self.version.load(Ordering::SeqCst);
            if version & 1 == 1 {
                // A copy is in flight; storing now could be lost to it.
                std::hint::spin_loop();
                continue;
            }
            let table = self.ensure_capacity(idx as usize);
            // SAFETY: published tables are immutable in structure and
            // leaked; ensure_capacity returned one covering idx.
            unsafe { &*table }.entries[idx as usize].store(value, Ordering::SeqCst);
            if self.version.load(Ordering::SeqCst) == version {
                return;
            }
        }
    }

    /// The published table, grown if it does not cover `idx` yet.
    fn ensure_capacity(&self, idx: usize) -> *mut TableInner {
        let table = self.current.load(Ordering::Acquire);
        // SAFETY: published tables are immutable in structure and leaked.
        if !table.is_null() && idx < unsafe { &*table }.entries.len() {
            return table;
        }
        self.grow(idx + 1)
    }

    /// Resolve a slot index to its object, lock-free.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn get(&self, idx: u32) -> Option<NonNull<ObjHeader>> {
        let table = self.current.load(Ordering::Acquire);
        if table.is_null() {
            return None;
        }
        // SAFETY: published tables are immutable in structure and leaked.
        let entry = unsafe { &*table }.entries.get(idx as usize)?;
        NonNull::new(entry.load(Ordering::Acquire))
    }

    /// Number of currently claimed slots.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Snapshot the published table for a full scan.
    ///
    /// The scan observes entries through atomic loads, so slots claimed or
    /// retired mid-scan are picked up by the next cycle instead.
    pub(crate) fn scan(&self) -> SlotScan {
        let table = self.current.load(Ordering::Acquire);
        // SAFETY: published tables are immutable in structure and leaked,
        // so the reference is valid for the process lifetime.
        let entries: &'static [AtomicPtr<ObjHeader>] =
            if table.is_null() { &[] } else { unsafe { &(*table).entries } };
        SlotScan { entries, pos: 0 }
    }

    /// Replace the published table with a larger copy. Slot contents are
    /// copied, not recomputed; a store racing the copy is caught by the
    /// verification loop in [`Self::publish`].
    #[cold]
    fn grow(&self, needed: usize) -> *mut TableInner {
        let _guard = self.growth.lock();

        // A racing grower may have published enough capacity already.
        let old = self.current.load(Ordering::Acquire);
        // SAFETY: old, when non-null, is the published (leaked) table.
        if let Some(old_ref) = unsafe { old.as_ref() } {
            if needed <= old_ref.entries.len() {
                return old;
            }
        }

        let new_len = needed.next_power_of_two().max(INITIAL_CAPACITY);
        let fresh = TableInner::with_capacity(new_len);
        self.version.fetch_add(1, Ordering::SeqCst);
        // SAFETY: as above.
        if let Some(old_ref) = unsafe { old.as_ref() } {
            for (i, entry) in old_ref.entries.iter().enumerate() {
                fresh.entries[i].store(entry.load(Ordering::SeqCst), Ordering::SeqCst);
            }
        }
        let fresh_ptr = std::ptr::from_mut(Box::leak(Box::new(fresh)));
        self.current.store(fresh_ptr, Ordering::SeqCst);
        self.version.fetch_add(1, Ordering::SeqCst);
        fresh_ptr
    }
}

/// Iterator over the occupied entries of a table snapshot.
pub(crate) struct SlotScan {
    entries: &'static [AtomicPtr<ObjHeader>],
    pos: usize,
}

impl Iterator for SlotScan {
    type Item = (u32, NonNull<ObjHeader>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.entries.len() {
            let idx = self.pos;
            self.pos += 1;
            if let Some(obj) = NonNull::new(self.entries[idx].load(Ordering::Acquire)) {
                #[allow(clippy::cast_possible_truncation)]
                return Some((idx as u32, obj));
            }
        }
        None
    }
}
