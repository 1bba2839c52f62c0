//! Visitor-based object-graph traversal.
//!
//! Given an object and its class layout, [`for_each_reference`] invokes a
//! callback for every non-null outgoing reference, telling the caller
//! whether the edge is strong-owned or a weak back-reference so it can
//! apply the matching reachability mark. The walker never mutates the
//! graph; it is pure traversal.

use crate::class;
use crate::heap::ObjRef;

/// Recursion bound for graph traversal. Past this depth callers switch to
/// an explicit worklist instead of the call stack, so a pathologically
/// deep chain cannot overflow it.
pub const MAX_MARK_DEPTH: u32 = 128;

/// Ownership kind of an outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Strong-owned field: keeps the target alive.
    Strong,
    /// Weak/back-reference field: recorded, but does not keep the target
    /// alive on its own.
    Weak,
}

/// Callback invoked for every outgoing reference of a walked object.
pub trait RefVisitor {
    /// Called with each non-null child, its edge kind, and the child's
    /// depth in the current traversal.
    fn visit(&mut self, child: ObjRef, kind: EdgeKind, depth: u32);
}

impl<F: FnMut(ObjRef, EdgeKind, u32)> RefVisitor for F {
    fn visit(&mut self, child: ObjRef, kind: EdgeKind, depth: u32) {
        self(child, kind, depth);
    }
}

/// Invoke `visitor` for every outgoing reference of `obj`.
///
/// Phantom placeholders are unlinked from traversal and yield nothing.
pub fn for_each_reference<V: RefVisitor>(obj: ObjRef, visitor: &mut V, depth: u32) {
    if obj.state().is_phantom() {
        return;
    }
    let layout = class::layout(obj.class());
    for &off in &layout.strong {
        // SAFETY: off comes from the object's own registered layout.
        if let Some(child) = unsafe { obj.field(off) }.load() {
            visitor.visit(child, EdgeKind::Strong, depth + 1);
        }
    }
    for &off in &layout.weak {
        // SAFETY: as above.
        if let Some(child) = unsafe { obj.field(off) }.load() {
            visitor.visit(child, EdgeKind::Weak, depth + 1);
        }
    }
}
