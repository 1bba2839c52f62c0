//! The canonical mutator/collector round trip: link, collect, unlink,
//! collect again.

mod common;

use argc_gc::{collect_now, StackRoot};
use common::{drop_local, link_strong, new_node, unique_tag, was_finalized};

#[test]
fn linked_child_survives_then_dies_when_unlinked() {
    let (rt, ct) = (unique_tag(), unique_tag());
    let root = StackRoot::adopt(new_node(rt));

    // Child is held only through root's strong field.
    let child = new_node(ct);
    link_strong(root.get(), Some(child));
    drop_local(child);

    collect_now();
    assert!(!was_finalized(ct), "strongly held child was reclaimed");

    // Sever the edge: the child's last reference is gone.
    link_strong(root.get(), None);
    collect_now();
    assert!(was_finalized(ct), "unlinked child leaked");
    assert!(!was_finalized(rt), "rooted object reclaimed");
}

#[test]
fn chain_survives_through_its_head() {
    let tags = [unique_tag(), unique_tag(), unique_tag(), unique_tag()];
    let nodes = tags.map(new_node);
    for pair in nodes.windows(2) {
        link_strong(pair[0], Some(pair[1]));
    }
    // Keep only the head rooted.
    let head = StackRoot::adopt(nodes[0]);
    for &n in &nodes[1..] {
        drop_local(n);
    }

    collect_now();
    for &t in &tags {
        assert!(!was_finalized(t), "chain node {t} reclaimed while head rooted");
    }

    drop(head);
    collect_now();
    for &t in &tags {
        assert!(was_finalized(t), "chain node {t} leaked after head release");
    }
}
