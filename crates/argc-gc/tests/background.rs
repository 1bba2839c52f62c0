//! Background collection triggers: the interval timer and `request_gc`.

mod common;

use std::time::{Duration, Instant};

use argc_gc::{request_gc, set_collection_interval};
use common::{drop_local, link_strong, new_node, unique_tag, was_finalized};

fn wait_for(tag: u64, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if was_finalized(tag) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    was_finalized(tag)
}

#[test]
fn interval_timer_reclaims_detached_cycles() {
    set_collection_interval(Duration::from_millis(50));

    let (t1, t2) = (unique_tag(), unique_tag());
    let a = new_node(t1);
    let b = new_node(t2);
    link_strong(a, Some(b));
    link_strong(b, Some(a));
    drop_local(a);
    drop_local(b);

    assert!(
        wait_for(t1, Duration::from_secs(5)) && wait_for(t2, Duration::from_secs(5)),
        "background timer never reclaimed the cycle"
    );
}

#[test]
fn request_gc_wakes_the_collector() {
    let t = unique_tag();
    let a = new_node(t);
    link_strong(a, Some(a));
    drop_local(a);

    request_gc();

    assert!(
        wait_for(t, Duration::from_secs(5)),
        "request_gc never triggered a cycle"
    );
}
