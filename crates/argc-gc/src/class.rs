//! Class descriptors and the layout cache.
//!
//! Translator-generated code registers one [`ClassDesc`] per emitted type,
//! describing where that type's outgoing strong and weak references live
//! inside the payload. The collector's graph walker consumes the flattened
//! form, a [`ClassLayout`], which merges the whole superclass chain into one
//! immutable traversal table.
//!
//! Layouts are built lazily, once per class, under a short-lived mutex and
//! then published through an atomically-swapped pointer table. Readers are
//! lock-free; published tables and layouts are immutable and live for the
//! rest of the process, so no reader can ever observe a teardown.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::heap::ObjRef;

/// A finalizer delivered at most once, outside the collection path.
pub type Finalizer = fn(ObjRef);

/// Identity of a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// The raw registry index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Field layout of one type, as registered by generated code.
///
/// Offsets are byte offsets into the object payload (the bytes following
/// the header) and must be pointer-aligned. `instance_size` covers the
/// inherited region: a subclass reports its total payload size and only
/// its own field offsets; the superclass chain contributes the rest.
#[derive(Debug, Clone)]
pub struct ClassDesc {
    /// Diagnostic name, kept for the lifetime of the process.
    pub name: &'static str,
    /// Superclass whose fields precede this class's own.
    pub super_class: Option<ClassId>,
    /// Payload bytes occupied by an instance, inherited region included.
    pub instance_size: usize,
    /// Offsets of strong-owned reference fields declared by this class.
    pub strong_offsets: Vec<usize>,
    /// Offsets of weak/back-reference fields declared by this class.
    pub weak_offsets: Vec<usize>,
    /// Finalizer to deliver when the object is reclaimed.
    pub finalizer: Option<Finalizer>,
}

/// The flattened, immutable traversal table for one class.
///
/// Shared by reference across threads for the remaining lifetime of the
/// process; never mutated after construction.
#[derive(Debug)]
pub struct ClassLayout {
    /// Diagnostic name.
    pub name: &'static str,
    /// Total payload bytes of an instance.
    pub instance_size: usize,
    /// Every strong field offset, superclass chain included.
    pub strong: Box<[usize]>,
    /// Every weak field offset, superclass chain included.
    pub weak: Box<[usize]>,
    /// Finalizer, if any class in the chain registered one.
    pub finalizer: Option<Finalizer>,
}

struct LayoutTable {
    slots: Box<[AtomicPtr<ClassLayout>]>,
}

struct Registry {
    descs: Mutex<Vec<ClassDesc>>,
    /// Currently published layout table. Replaced wholesale on growth;
    /// old tables are leaked so lock-free readers never race a free.
    layouts: AtomicPtr<LayoutTable>,
    build_lock: Mutex<()>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        descs: Mutex::new(Vec::new()),
        layouts: AtomicPtr::new(ptr::null_mut()),
        build_lock: Mutex::new(()),
    })
}

const PTR_SIZE: usize = std::mem::size_of::<*mut u8>();

/// Register a class with the runtime.
///
/// Called once per type by generated code before the first allocation of
/// that type. Malformed metadata is a configuration bug in the producer
/// and is fatal.
///
/// # Panics
///
/// Panics if an offset is unaligned or out of bounds, or if the
/// superclass is unknown or larger than the subclass.
pub fn register_class(desc: ClassDesc) -> ClassId {
    let reg = registry();
    let mut descs = reg.descs.lock();

    if let Some(ClassId(sup)) = desc.super_class {
        let sup = sup as usize;
        assert!(
            sup < descs.len(),
            "class `{}` names an unregistered superclass",
            desc.name
        );
        assert!(
            descs[sup].instance_size <= desc.instance_size,
            "class `{}` is smaller than its superclass `{}`",
            desc.name,
            descs[sup].name
        );
    }
    for &off in desc.strong_offsets.iter().chain(&desc.weak_offsets) {
        assert!(
            off % PTR_SIZE == 0,
            "class `{}`: field offset {off} is not pointer-aligned",
            desc.name
        );
        assert!(
            off + PTR_SIZE <= desc.instance_size,
            "class `{}`: field offset {off} exceeds instance size {}",
            desc.name,
            desc.instance_size
        );
    }

    let id = u32::try_from(descs.len()).expect("class registry exhausted");
    descs.push(desc);
    ClassId(id)
}

/// Look up the flattened layout for `class`.
///
/// The first caller for a given class flattens the superclass chain under
/// a short mutex; every later caller takes the lock-free path and shares
/// the same immutable instance.
///
/// # Panics
///
/// Panics if `class` was never registered.
pub fn layout(class: ClassId) -> &'static ClassLayout {
    let reg = registry();
    let idx = class.0 as usize;

    let table = reg.layouts.load(Ordering::Acquire);
    if !table.is_null() {
        // SAFETY: published tables are immutable and leaked.
        let table = unsafe { &*table };
        if let Some(slot) = table.slots.get(idx) {
            let found = slot.load(Ordering::Acquire);
            if !found.is_null() {
                // SAFETY: layouts are immutable and leaked once published.
                return unsafe { &*found };
            }
        }
    }

    build_layout(reg, class)
}

#[cold]
fn build_layout(reg: &'static Registry, class: ClassId) -> &'static ClassLayout {
    let _guard = reg.build_lock.lock();
    let idx = class.0 as usize;

    // A racing builder may have published while we waited for the lock.
    let mut table_ptr = reg.layouts.load(Ordering::Acquire);
    if !table_ptr.is_null() {
        // SAFETY: published tables are immutable and leaked.
        let table = unsafe { &*table_ptr };
        if let Some(slot) = table.slots.get(idx) {
            let found = slot.load(Ordering::Acquire);
            if !found.is_null() {
                // SAFETY: layouts are immutable and leaked once published.
                return unsafe { &*found };
            }
        }
    }

    let built = {
        let descs = reg.descs.lock();
        assert!(idx < descs.len(), "layout lookup for an unregistered class");
        flatten(&descs, class)
    };
    let built: &'static ClassLayout = Box::leak(Box::new(built));

    // Grow the published table if the class id does not fit yet.
    // SAFETY: published tables are immutable and leaked.
    let cur_len = unsafe { table_ptr.as_ref() }.map_or(0, |t| t.slots.len());
    if idx >= cur_len {
        let new_len = (idx + 1).next_power_of_two().max(16);
        let slots: Box<[AtomicPtr<ClassLayout>]> =
            (0..new_len).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        if cur_len > 0 {
            // SAFETY: old table is live (leaked) and immutable in structure.
            let old = unsafe { &*table_ptr };
            for (i, slot) in old.slots.iter().enumerate() {
                slots[i].store(slot.load(Ordering::Acquire), Ordering::Release);
            }
        }
        let new_table = Box::leak(Box::new(LayoutTable { slots }));
        reg.layouts
            .store(std::ptr::from_mut(new_table), Ordering::Release);
        table_ptr = std::ptr::from_mut(new_table);
    }

    // SAFETY: table_ptr is non-null and points at a leaked table.
    let table = unsafe { &*table_ptr };
    table.slots[idx].store(
        std::ptr::from_ref(built).cast_mut(),
        Ordering::Release,
    );
    built
}

fn flatten(descs: &[ClassDesc], class: ClassId) -> ClassLayout {
    let mut strong = Vec::new();
    let mut weak = Vec::new();
    let mut finalizer = None;

    // Walk root-first so inherited fields come before the class's own.
    let mut chain = Vec::new();
    let mut cur = Some(class);
    while let Some(ClassId(id)) = cur {
        let desc = &descs[id as usize];
        chain.push(id as usize);
        // The most-derived finalizer in the chain wins.
        if finalizer.is_none() {
            finalizer = desc.finalizer;
        }
        cur = desc.super_class;
    }
    for &id in chain.iter().rev() {
        let desc = &descs[id];
        strong.extend_from_slice(&desc.strong_offsets);
        weak.extend_from_slice(&desc.weak_offsets);
    }

    let leaf = &descs[class.0 as usize];
    ClassLayout {
        name: leaf.name,
        instance_size: leaf.instance_size,
        strong: strong.into_boxed_slice(),
        weak: weak.into_boxed_slice(),
        finalizer,
    }
}

/// Diagnostic name of a registered class.
#[must_use]
pub fn class_name(class: ClassId) -> &'static str {
    layout(class).name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &'static str, size: usize, strong: &[usize]) -> ClassDesc {
        ClassDesc {
            name,
            super_class: None,
            instance_size: size,
            strong_offsets: strong.to_vec(),
            weak_offsets: Vec::new(),
            finalizer: None,
        }
    }

    #[test]
    fn superclass_chain_is_flattened_root_first() {
        let base = register_class(desc("FlattenBase", 16, &[0]));
        let sub = register_class(ClassDesc {
            super_class: Some(base),
            ..desc("FlattenSub", 32, &[16, 24])
        });

        let l = layout(sub);
        assert_eq!(l.strong.as_ref(), &[0, 16, 24]);
        assert_eq!(l.instance_size, 32);
        assert_eq!(l.name, "FlattenSub");
    }

    #[test]
    fn lookup_is_idempotent_and_shared() {
        let id = register_class(desc("SharedLayout", 8, &[0]));
        let a: *const ClassLayout = layout(id);
        let b: *const ClassLayout = layout(id);
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_first_lookup_observes_one_instance() {
        let id = register_class(desc("RacedLayout", 8, &[0]));
        let ptrs: Vec<usize> = std::thread::scope(|s| {
            (0..8)
                .map(|_| s.spawn(move || std::ptr::from_ref(layout(id)) as usize))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect()
        });
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    #[should_panic(expected = "not pointer-aligned")]
    fn unaligned_offset_is_fatal() {
        register_class(desc("Unaligned", 16, &[3]));
    }

    #[test]
    #[should_panic(expected = "exceeds instance size")]
    fn out_of_bounds_offset_is_fatal() {
        register_class(desc("OutOfBounds", 8, &[8]));
    }
}
