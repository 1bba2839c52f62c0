//! Benchmark: collection cycle cost over chains and cyclic garbage.
//!
//! Measures the mark/sweep pause for rooted survivors and the reclaim
//! throughput for detached reference cycles.

use std::hint::black_box;
use std::sync::OnceLock;

use criterion::{criterion_group, criterion_main, Criterion};

use argc_gc::{
    alloc, assign_strong_field, collect_now, register_class, release, unbind, ClassDesc, ClassId,
    ObjRef, StackRoot,
};

const NEXT: usize = 0;
const NODE_SIZE: usize = 8;

fn node_class() -> ClassId {
    static NODE: OnceLock<ClassId> = OnceLock::new();
    *NODE.get_or_init(|| {
        register_class(ClassDesc {
            name: "BenchNode",
            super_class: None,
            instance_size: NODE_SIZE,
            strong_offsets: vec![NEXT],
            weak_offsets: vec![],
            finalizer: None,
        })
    })
}

fn drop_local(obj: ObjRef) {
    unbind(obj);
    release(obj);
}

fn link(parent: ObjRef, child: ObjRef) {
    // SAFETY: NEXT is the registered strong offset of BenchNode.
    let _ = assign_strong_field(unsafe { parent.field(NEXT) }, Some(child));
}

/// Build a detached cycle of `len` nodes.
fn detached_cycle(len: usize) {
    let head = alloc(node_class(), 0);
    let mut tail = head;
    for _ in 1..len {
        let next = alloc(node_class(), 0);
        link(tail, next);
        drop_local(next);
        tail = next;
    }
    link(tail, head);
    drop_local(head);
}

fn bench_mark_rooted_survivors(c: &mut Criterion) {
    let class = node_class();
    for count in [100usize, 1_000, 10_000] {
        let roots: Vec<StackRoot> = (0..count)
            .map(|_| StackRoot::adopt(alloc(class, 0)))
            .collect();
        c.bench_function(&format!("mark_{count}_rooted"), |b| {
            b.iter(|| {
                collect_now();
                black_box(&roots);
            });
        });
        drop(roots);
        collect_now();
    }
}

fn bench_reclaim_cyclic_garbage(c: &mut Criterion) {
    for count in [100usize, 1_000, 10_000] {
        c.bench_function(&format!("reclaim_{count}_node_cycle"), |b| {
            b.iter(|| {
                detached_cycle(count);
                collect_now();
            });
        });
    }
}

fn bench_release_chain(c: &mut Criterion) {
    c.bench_function("release_10000_node_chain", |b| {
        b.iter(|| {
            let head = alloc(node_class(), 0);
            let mut tail = head;
            for _ in 1..10_000 {
                let next = alloc(node_class(), 0);
                link(tail, next);
                drop_local(next);
                tail = next;
            }
            // No cycle: the cascade alone reclaims the whole chain.
            drop_local(head);
            argc_gc::drain_phantoms();
        });
    });
}

criterion_group!(
    benches,
    bench_mark_rooted_survivors,
    bench_reclaim_cyclic_garbage,
    bench_release_chain
);
criterion_main!(benches);
