//! Host releases alone must return memory: finalizers are delivered and
//! carcasses freed without any collection cycle ever running in this
//! process.

mod common;

use argc_gc::{live_objects, pending_phantoms};
use common::{drop_local, finalize_count, link_strong, new_node, unique_tag};

#[test]
fn release_alone_delivers_finalizers_and_frees() {
    // Single test in this binary: nothing else contends for the cycle
    // lock, so every teardown drains its own carcass immediately.
    let base = live_objects();

    for _ in 0..100 {
        let t = unique_tag();
        drop_local(new_node(t));
        assert_eq!(finalize_count(t), 1, "carcass {t} stuck on the phantom queue");
    }

    // A chain cascade goes through the same drain.
    let tags: Vec<u64> = (0..50).map(|_| unique_tag()).collect();
    let head = new_node(tags[0]);
    let mut tail = head;
    for &t in &tags[1..] {
        let next = new_node(t);
        link_strong(tail, Some(next));
        drop_local(next);
        tail = next;
    }
    drop_local(head);
    for &t in &tags {
        assert_eq!(finalize_count(t), 1, "chain node {t} never reclaimed");
    }

    assert_eq!(pending_phantoms(), 0);
    assert_eq!(live_objects(), base);
}
