//! Weak/back-reference semantics: a weak edge records reachability but
//! never keeps its target alive.

mod common;

use argc_gc::{collect_now, StackRoot};
use common::{drop_local, link_strong, link_weak, new_node, unique_tag, was_finalized};

#[test]
fn weakly_referenced_cycle_is_still_reclaimed() {
    let (t1, t2) = (unique_tag(), unique_tag());
    let holder = StackRoot::adopt(new_node(unique_tag()));

    let a = new_node(t1);
    let b = new_node(t2);
    link_strong(a, Some(b));
    link_strong(b, Some(a));
    // The live holder sees the cycle only through a weak edge.
    link_weak(holder.get(), Some(a));
    drop_local(a);
    drop_local(b);

    collect_now();

    assert!(
        was_finalized(t1) && was_finalized(t2),
        "weak edge kept a detached cycle alive"
    );
    // The holder must not dangle into the carcass: sever before use.
    link_weak(holder.get(), None);
}

#[test]
fn weak_back_reference_does_not_extend_parent_lifetime() {
    let (pt, ct) = (unique_tag(), unique_tag());
    let parent = new_node(pt);
    let child = new_node(ct);

    // parent -> child strongly, child -> parent weakly: the classic
    // parent/child shape that must not leak.
    link_strong(parent, Some(child));
    link_weak(child, Some(parent));
    drop_local(child);
    drop_local(parent);

    collect_now();

    assert!(was_finalized(pt), "parent leaked through a weak back-reference");
    assert!(was_finalized(ct), "child leaked");
}

#[test]
fn strongly_held_target_of_a_weak_edge_survives() {
    let t = unique_tag();
    let strong_holder = StackRoot::adopt(new_node(unique_tag()));
    let weak_holder = StackRoot::adopt(new_node(unique_tag()));

    let target = new_node(t);
    link_strong(strong_holder.get(), Some(target));
    link_weak(weak_holder.get(), Some(target));
    drop_local(target);

    collect_now();
    assert!(!was_finalized(t), "strongly held object reclaimed");

    link_weak(weak_holder.get(), None);
    link_strong(strong_holder.get(), None);
    collect_now();
    assert!(was_finalized(t));
}
