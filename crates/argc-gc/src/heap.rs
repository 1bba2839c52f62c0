//! The managed object model and the mutator-facing API.
//!
//! Every managed allocation begins with an [`ObjHeader`] at offset zero:
//! the packed atomic state word, the host retain count, the class id and
//! the payload size. Translated code never touches the header directly; it
//! goes through [`alloc`], [`assign_strong_field`] /
//! [`assign_generic_field`], [`clone_obj`] and the retain/release and
//! bind/unbind pairs, which keep the collector's bookkeeping consistent
//! while mutator threads run concurrently.
//!
//! The host retain count is authoritative for immediate reclamation; the
//! state word's reachability marks are authoritative only for cycle
//! detection. The two counters are deliberately not unified.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::class::{self, ClassId};
use crate::phantom;
use crate::slots::SlotTable;
use crate::state::{self, StateWord};

/// Alignment of every managed allocation.
pub const OBJ_ALIGN: usize = 8;

/// The fixed-offset header carried by every managed object.
///
/// Its address is derivable from the object's address: the header *is* the
/// object's first bytes, and the payload follows immediately after.
#[repr(C)]
pub struct ObjHeader {
    state: StateWord,
    /// Host retain count. Kept separate from `root_refs`: stack/static
    /// holders count as roots, heap-to-heap edges only as retains.
    ref_count: AtomicU32,
    class: ClassId,
    payload_size: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<ObjHeader>();

/// A handle to a managed object.
///
/// Plain address, `Copy`, no ownership: the holder is responsible for the
/// retain/release and bind/unbind discipline, exactly as translated code
/// is. Use [`StackRoot`] for scope-based handling in hand-written glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(NonNull<ObjHeader>);

// SAFETY: an ObjRef is an address; all header access goes through atomics
// and the holder carries the liveness obligation.
unsafe impl Send for ObjRef {}
// SAFETY: as above.
unsafe impl Sync for ObjRef {}

impl ObjRef {
    pub(crate) const fn from_header(ptr: NonNull<ObjHeader>) -> Self {
        Self(ptr)
    }

    fn header(&self) -> &ObjHeader {
        // SAFETY: the holder guarantees the object is alive.
        unsafe { self.0.as_ref() }
    }

    /// The object's packed atomic state word.
    #[must_use]
    pub fn state(&self) -> &StateWord {
        &self.header().state
    }

    /// The object's class.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.header().class
    }

    /// Current host retain count.
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.header().ref_count.load(Ordering::SeqCst)
    }

    /// Payload size in bytes, `extra_bytes` included.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.header().payload_size as usize
    }

    /// Raw pointer to the first payload byte.
    #[must_use]
    pub fn payload_ptr(self) -> *mut u8 {
        // SAFETY: the payload begins right after the header.
        unsafe { self.0.as_ptr().cast::<u8>().add(HEADER_SIZE) }
    }

    /// A reference field inside the payload.
    ///
    /// # Safety
    ///
    /// The object must be alive and `offset` must be one of the reference
    /// offsets registered for its class.
    #[must_use]
    pub unsafe fn field(self, offset: usize) -> &'static FieldSlot {
        debug_assert!(offset + std::mem::size_of::<*mut u8>() <= self.payload_size());
        // SAFETY: caller guarantees offset validity; FieldSlot is a
        // transparent wrapper over AtomicPtr.
        unsafe { &*self.payload_ptr().add(offset).cast::<FieldSlot>() }
    }

    /// Whether the object is still live, i.e. not yet demoted to a
    /// phantom placeholder.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.state().is_phantom()
    }

    /// Bytes of tail storage past the class's fixed instance layout.
    #[must_use]
    pub fn extra_bytes(self) -> usize {
        self.payload_size() - class::layout(self.class()).instance_size
    }

    /// Pointer to element `index` of the tail array, treating the extra
    /// bytes as elements of `elem_size` bytes each.
    ///
    /// Returns `None` when the element would reach past the payload; an
    /// out-of-range index is a caller error, not a runtime fault.
    #[must_use]
    pub fn element_ptr(self, elem_size: usize, index: usize) -> Option<*mut u8> {
        if elem_size == 0 {
            return None;
        }
        let base = class::layout(self.class()).instance_size;
        let off = base.checked_add(index.checked_mul(elem_size)?)?;
        if off + elem_size > self.payload_size() {
            return None;
        }
        // SAFETY: off + elem_size lies within the payload.
        Some(unsafe { self.payload_ptr().add(off) })
    }

}

/// A managed reference field: a transparent atomic pointer slot.
///
/// The only sanctioned way to mutate one is [`assign_strong_field`] or
/// [`assign_generic_field`]; a direct write would make the edge invisible
/// to the collector and risk a premature reclaim.
#[repr(transparent)]
pub struct FieldSlot(AtomicPtr<ObjHeader>);

impl FieldSlot {
    /// Read the field.
    #[must_use]
    pub fn load(&self) -> Option<ObjRef> {
        NonNull::new(self.0.load(Ordering::SeqCst)).map(ObjRef)
    }

    fn swap(&self, value: Option<ObjRef>) -> Option<ObjRef> {
        let raw = value.map_or(std::ptr::null_mut(), |v| v.0.as_ptr());
        NonNull::new(self.0.swap(raw, Ordering::SeqCst)).map(ObjRef)
    }
}

// ============================================================================
// Global heap
// ============================================================================

pub(crate) struct Heap {
    pub(crate) slots: SlotTable,
}

pub(crate) fn heap() -> &'static Heap {
    static HEAP: OnceLock<Heap> = OnceLock::new();
    HEAP.get_or_init(|| Heap {
        slots: SlotTable::new(),
    })
}

/// Number of live managed objects (claimed slots).
#[must_use]
pub fn live_objects() -> usize {
    heap().slots.live()
}

static TOTAL_ALLOCATED: AtomicU64 = AtomicU64::new(0);

/// Aggregate heap counters.
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    /// Currently live managed objects.
    pub live_objects: usize,
    /// Objects allocated since process start.
    pub total_allocated: u64,
}

/// Snapshot of the heap counters.
#[must_use]
pub fn heap_stats() -> HeapStats {
    HeapStats {
        live_objects: live_objects(),
        total_allocated: TOTAL_ALLOCATED.load(Ordering::Relaxed),
    }
}

// ============================================================================
// Allocation
// ============================================================================

fn block_layout(payload: usize) -> Layout {
    Layout::from_size_align(HEADER_SIZE + payload, OBJ_ALIGN)
        .expect("managed allocation size overflow")
}

/// Allocate a managed instance of `class` with `extra_bytes` of tail
/// storage (array payloads).
///
/// The newborn starts with one root reference, one host retain, a zeroed
/// payload, and its strong generation field already matching the current
/// cycle so a mid-cycle sweep can never claim it.
///
/// # Panics
///
/// Panics on address-space or slot-table exhaustion; the collector cannot
/// continue in an inconsistent state.
#[must_use]
pub fn alloc(class: ClassId, extra_bytes: usize) -> ObjRef {
    let layout = class::layout(class);
    let payload = layout.instance_size + extra_bytes;
    let payload32 = u32::try_from(payload).expect("payload size exceeds u32");

    let block = block_layout(payload);
    // SAFETY: block has non-zero size (header included).
    let raw = unsafe { alloc_zeroed(block) };
    let Some(ptr) = NonNull::new(raw.cast::<ObjHeader>()) else {
        handle_alloc_error(block);
    };

    // Publish a fully formed header before the slot table can hand the
    // object to a scanning collector; the real index is patched in after.
    // SAFETY: ptr is a fresh, exclusively owned allocation.
    unsafe {
        ptr.as_ptr().write(ObjHeader {
            state: StateWord::new(0, state::current_generation()),
            ref_count: AtomicU32::new(1),
            class,
            payload_size: payload32,
        });
    }

    let idx = heap().slots.claim(ptr);
    let obj = ObjRef(ptr);
    obj.state().set_slot_index(idx);
    TOTAL_ALLOCATED.fetch_add(1, Ordering::Relaxed);
    obj
}

/// Bitwise-duplicate `src` into a fresh allocation with its own header.
///
/// Strong fields in the copy are retained; the copy starts with the same
/// root/retain baseline as a new allocation, not a copy of the original's
/// counts.
#[must_use]
pub fn clone_obj(src: ObjRef) -> ObjRef {
    let layout = class::layout(src.class());
    let payload = src.payload_size();
    let dst = alloc(src.class(), payload - layout.instance_size);

    // SAFETY: both payloads are `payload` bytes and do not overlap.
    unsafe {
        std::ptr::copy_nonoverlapping(src.payload_ptr(), dst.payload_ptr(), payload);
    }
    for &off in &layout.strong {
        // SAFETY: off is a registered reference offset of dst's class.
        if let Some(child) = unsafe { dst.field(off) }.load() {
            retain(child);
        }
    }
    dst
}

// ============================================================================
// Host retain/release substrate
// ============================================================================

/// Increment the host retain count.
pub fn retain(obj: ObjRef) {
    let prev = obj.header().ref_count.fetch_add(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "retain on a dead object");
}

/// Decrement the host retain count.
///
/// The host count is authoritative for immediate reclamation: when it
/// drops to zero and the collector has not already claimed the object via
/// `pending_release`, this call tears the object down. Memory is returned
/// through the phantom drain, opportunistically after the teardown or
/// under the next collection cycle.
pub fn release(obj: ObjRef) {
    let prev = obj.header().ref_count.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(prev > 0, "release underflow");
    if prev == 1 && obj.state().mark_pending_release() {
        reclaim_dead(obj);
    }
}

/// Register a stack/static holder of `obj`.
pub fn bind(obj: ObjRef) {
    obj.state().bind();
}

/// Drop a stack/static holder of `obj`, returning the remaining root count.
pub fn unbind(obj: ObjRef) -> u64 {
    obj.state().unbind()
}

/// Scope-based root + retain guard for hand-written runtime glue.
///
/// Translated code emits explicit bind/unbind pairs; Rust-side glue and
/// tests use this guard instead.
pub struct StackRoot {
    obj: ObjRef,
}

impl StackRoot {
    /// Root an already-held object: adds one bind and one retain.
    #[must_use]
    pub fn new(obj: ObjRef) -> Self {
        bind(obj);
        retain(obj);
        Self { obj }
    }

    /// Take over the initial root and retain that [`alloc`] hands out.
    #[must_use]
    pub const fn adopt(obj: ObjRef) -> Self {
        Self { obj }
    }

    /// The guarded handle.
    #[must_use]
    pub const fn get(&self) -> ObjRef {
        self.obj
    }
}

impl Drop for StackRoot {
    fn drop(&mut self) {
        unbind(self.obj);
        release(self.obj);
    }
}

// ============================================================================
// Field assignment
// ============================================================================

/// Atomically replace the value of a strong-owned field.
///
/// Retains the new value and releases the old one, then returns the old
/// value. The returned handle is unretained: if the internal release was
/// the last one, it is already dead and only useful for identity checks.
pub fn assign_strong_field(slot: &FieldSlot, value: Option<ObjRef>) -> Option<ObjRef> {
    if let Some(v) = value {
        retain(v);
    }
    let old = slot.swap(value);
    if let Some(o) = old {
        release(o);
    }
    old
}

/// Atomically replace the value of a generic (unretained) field.
///
/// No ownership transfer happens; the previous value is returned so
/// callers with consume semantics can release it themselves.
pub fn assign_generic_field(slot: &FieldSlot, value: Option<ObjRef>) -> Option<ObjRef> {
    slot.swap(value)
}

// ============================================================================
// Reclamation
// ============================================================================

thread_local! {
    /// Objects claimed for reclamation on this thread, drained iteratively
    /// so a long release cascade cannot overflow the stack.
    static RECLAIM_QUEUE: RefCell<Vec<ObjRef>> = const { RefCell::new(Vec::new()) };
    static IN_RECLAIM: Cell<bool> = const { Cell::new(false) };
}

/// Tear down an object this thread has claimed via `pending_release`.
///
/// Clears its reference fields (releasing strong children, which may
/// cascade), retires its slot, and hands it to the phantom queue for
/// finalizer delivery and deallocation.
pub(crate) fn reclaim_dead(obj: ObjRef) {
    RECLAIM_QUEUE.with(|q| q.borrow_mut().push(obj));
    if IN_RECLAIM.with(Cell::get) {
        // Already draining further up this thread's stack.
        return;
    }
    IN_RECLAIM.with(|f| f.set(true));
    loop {
        let Some(next) = RECLAIM_QUEUE.with(|q| q.borrow_mut().pop()) else {
            break;
        };
        clear_reference_fields(next);
        detach_and_enqueue(next);
    }
    IN_RECLAIM.with(|f| f.set(false));
    // Without this a release-only workload would accumulate carcasses
    // until the next collection; a no-op whenever a cycle is in flight.
    phantom::drain_opportunistic();
}

/// Null every reference field, releasing strong children.
///
/// A release into the claimed set only decrements (its target's
/// `pending_release` is already taken), so cyclic garbage collapses
/// without double-frees; a release into the live graph cascades normally.
fn clear_reference_fields(obj: ObjRef) {
    let layout = class::layout(obj.class());
    for &off in &layout.strong {
        // SAFETY: off is a registered reference offset of obj's class.
        if let Some(child) = unsafe { obj.field(off) }.swap(None) {
            release(child);
        }
    }
    for &off in &layout.weak {
        // SAFETY: as above. Weak fields are unretained; just sever them.
        let _ = unsafe { obj.field(off) }.swap(None);
    }
}

/// Retire the slot and demote the carcass to a phantom placeholder.
fn detach_and_enqueue(obj: ObjRef) {
    heap().slots.retire(obj.state().slot_index());
    if obj.state().mark_phantom() {
        phantom::enqueue(obj);
    }
}

/// Return an object's memory to the allocator. Called from the phantom
/// drain only, after finalizer delivery.
pub(crate) fn dealloc_object(obj: ObjRef) {
    let block = block_layout(obj.payload_size());
    // SAFETY: obj was produced by `alloc` with this exact layout, its slot
    // is retired and its finalizer (if any) has run; nothing can reach it.
    unsafe {
        dealloc(obj.0.as_ptr().cast::<u8>(), block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_one_cache_friendly_block() {
        assert_eq!(HEADER_SIZE % OBJ_ALIGN, 0);
        assert_eq!(std::mem::align_of::<ObjHeader>(), OBJ_ALIGN);
        // The state word sits at offset zero: the ABI contract every
        // managed object begins with.
        assert_eq!(std::mem::offset_of!(ObjHeader, state), 0);
    }

    #[test]
    fn field_slot_is_pointer_sized() {
        assert_eq!(
            std::mem::size_of::<FieldSlot>(),
            std::mem::size_of::<*mut u8>()
        );
    }
}
