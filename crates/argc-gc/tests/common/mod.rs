//! Shared fixture: a translator-style node class with one strong field,
//! one weak field and a scalar tag, plus a finalizer that records every
//! delivery so tests can observe reclamation without touching freed
//! memory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use argc_gc::{alloc, register_class, ClassDesc, ClassId, ObjRef};

/// Strong "next" field offset.
pub const NEXT: usize = 0;
/// Weak back-reference field offset.
pub const BACK: usize = 8;
/// Scalar tag offset (survives field clearing, read by the finalizer).
pub const TAG: usize = 16;

pub const NODE_SIZE: usize = 24;

fn finalized() -> &'static Mutex<HashMap<u64, u32>> {
    static FINALIZED: OnceLock<Mutex<HashMap<u64, u32>>> = OnceLock::new();
    FINALIZED.get_or_init(|| Mutex::new(HashMap::new()))
}

fn record_finalize(obj: ObjRef) {
    // SAFETY: the tag scalar sits past the reference fields and is intact
    // when the finalizer runs.
    let tag = unsafe { obj.payload_ptr().add(TAG).cast::<u64>().read() };
    *finalized().lock().unwrap().entry(tag).or_insert(0) += 1;
}

/// The shared test class, registered once per process.
pub fn node_class() -> ClassId {
    static NODE: OnceLock<ClassId> = OnceLock::new();
    *NODE.get_or_init(|| {
        register_class(ClassDesc {
            name: "TestNode",
            super_class: None,
            instance_size: NODE_SIZE,
            strong_offsets: vec![NEXT],
            weak_offsets: vec![BACK],
            finalizer: Some(record_finalize),
        })
    })
}

/// Allocate a node carrying `tag`.
pub fn new_node(tag: u64) -> ObjRef {
    let obj = alloc(node_class(), 0);
    // SAFETY: TAG lies within the zeroed payload.
    unsafe { obj.payload_ptr().add(TAG).cast::<u64>().write(tag) };
    obj
}

/// Process-unique tag so parallel tests never observe each other.
pub fn unique_tag() -> u64 {
    static NEXT_TAG: AtomicU64 = AtomicU64::new(1);
    NEXT_TAG.fetch_add(1, Ordering::Relaxed)
}

/// How many times `tag`'s finalizer has run.
pub fn finalize_count(tag: u64) -> u32 {
    finalized().lock().unwrap().get(&tag).copied().unwrap_or(0)
}

pub fn was_finalized(tag: u64) -> bool {
    finalize_count(tag) > 0
}

/// Store `child` into `parent`'s strong field.
pub fn link_strong(parent: ObjRef, child: Option<ObjRef>) {
    // SAFETY: NEXT is a registered strong offset of the node class.
    let slot = unsafe { parent.field(NEXT) };
    let _ = argc_gc::assign_strong_field(slot, child);
}

/// Store `child` into `parent`'s weak field (unretained).
pub fn link_weak(parent: ObjRef, child: Option<ObjRef>) {
    // SAFETY: BACK is a registered weak offset of the node class.
    let slot = unsafe { parent.field(BACK) };
    let _ = argc_gc::assign_generic_field(slot, child);
}

/// Relinquish a raw local handle: the allocation's root and retain.
pub fn drop_local(obj: ObjRef) {
    argc_gc::unbind(obj);
    argc_gc::release(obj);
}
