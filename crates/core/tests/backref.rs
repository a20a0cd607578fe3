//! Integration tests for the back-reference primitive.
//!
//! These exercise the ownership contract end to end: references stay valid
//! while the owner lives (wherever its handle has been moved to), and every
//! reference derived from the owner expires the moment it is destroyed.

use std::sync::Arc;

use lumen_core::{BackRef, Expired};

#[derive(Debug)]
struct FakeDevice {
    name: &'static str,
}

fn stash(device: Arc<FakeDevice>) -> Vec<Arc<FakeDevice>> {
    // Moves the handle through a call boundary and into a container.
    vec![device]
}

#[test]
fn references_survive_owner_moves() {
    let device = Arc::new(FakeDevice { name: "gpu0" });
    let before_move = BackRef::new(&device);

    let container = stash(device);
    assert!(before_move.is_valid());
    assert_eq!(before_move.upgrade().unwrap().name, "gpu0");

    // A reference taken after the move sees the same owner.
    let after_move = BackRef::new(&container[0]);
    assert_eq!(after_move.upgrade().unwrap().name, "gpu0");
}

#[test]
fn all_references_expire_on_destruction() {
    let device = Arc::new(FakeDevice { name: "gpu0" });

    let early = BackRef::new(&device);
    let container = stash(device);
    let late = BackRef::new(&container[0]);

    drop(container);

    for backref in [&early, &late] {
        assert!(!backref.is_valid());
        assert_eq!(backref.upgrade().unwrap_err(), Expired);
    }
}

#[test]
fn upgrade_holds_owner_only_transiently() {
    let device = Arc::new(FakeDevice { name: "gpu0" });
    let backref = BackRef::new(&device);

    {
        let strong = backref.upgrade().unwrap();
        assert_eq!(Arc::strong_count(&strong), 2);
    }

    assert_eq!(Arc::strong_count(&device), 1);
    drop(device);
    assert!(backref.upgrade().is_err());
}
