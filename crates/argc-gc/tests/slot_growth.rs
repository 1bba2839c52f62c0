//! Slot table growth under allocation pressure, including concurrent
//! allocators racing a growth event.

mod common;

use argc_gc::{collect_now, StackRoot};
use common::{new_node, unique_tag, was_finalized};

#[test]
fn growth_never_loses_live_objects() {
    // Well past the initial table capacity to force at least one growth.
    let roots: Vec<(u64, StackRoot)> = (0..3000)
        .map(|_| {
            let t = unique_tag();
            (t, StackRoot::adopt(new_node(t)))
        })
        .collect();

    collect_now();

    for (t, root) in &roots {
        assert!(!was_finalized(*t), "object {t} lost across table growth");
        assert!(root.get().state().is_root_reachable());
    }

    let tags: Vec<u64> = roots.iter().map(|(t, _)| *t).collect();
    drop(roots);
    collect_now();
    for t in tags {
        assert!(was_finalized(t), "object {t} leaked after release");
    }
}

#[test]
fn concurrent_allocation_during_growth_is_safe() {
    let all_tags: Vec<Vec<u64>> = std::thread::scope(|s| {
        (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut kept = Vec::new();
                    for _ in 0..1000 {
                        let t = unique_tag();
                        kept.push((t, StackRoot::adopt(new_node(t))));
                    }
                    collect_now();
                    for (t, _) in &kept {
                        assert!(!was_finalized(*t), "live object {t} swept mid-growth");
                    }
                    kept.iter().map(|(t, _)| *t).collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect()
    });

    collect_now();
    for t in all_tags.into_iter().flatten() {
        assert!(was_finalized(t), "object {t} leaked after its thread exited");
    }
}
