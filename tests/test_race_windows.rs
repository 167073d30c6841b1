//! Race-window tests driven by the artificial registry delay.
//! Run with `--features test-support`.
#![cfg(feature = "test-support")]

mod common;

use index_builds::test_support::{set_sleep_enabled, verify_no_index_builds};
use index_builds::{CollectionId, IndexBuildRegistry, OperationContext};
use serial_test::serial;
use std::sync::Arc;

struct SleepGuard;

impl Drop for SleepGuard {
    fn drop(&mut self) {
        set_sleep_enabled(false);
    }
}

#[test]
#[serial]
fn waiter_stays_blocked_while_unregister_is_stalled() {
    common::init_tracing();
    let _guard = SleepGuard;
    let registry = IndexBuildRegistry::default();
    let r = common::build(CollectionId::generate(), "db.coll", "a_1");
    registry.register(Arc::clone(&r)).unwrap();

    let waiter = {
        let registry = registry.clone();
        let id = r.build_id();
        common::spawn_wait(move || registry.await_build_finished(&id, &OperationContext::new()))
    };

    set_sleep_enabled(true);
    let unregistering = {
        let registry = registry.clone();
        let r = Arc::clone(&r);
        common::spawn_wait(move || registry.unregister(&r))
    };

    // Unregister is parked before taking the lock; the build is still visible.
    common::assert_still_blocked(&waiter, "await_build_finished");
    common::assert_still_blocked(&unregistering, "stalled unregister");
    assert!(registry.get(&r.build_id()).is_ok());
    assert!(verify_no_index_builds(&registry).is_err());

    set_sleep_enabled(false);
    unregistering.recv_timeout(common::WAKE).unwrap();
    waiter.recv_timeout(common::WAKE).unwrap().unwrap();
    assert!(verify_no_index_builds(&registry).is_ok());
}

#[test]
#[serial]
fn stalled_register_is_invisible_to_filters() {
    common::init_tracing();
    let _guard = SleepGuard;
    let registry = IndexBuildRegistry::default();
    let x = CollectionId::generate();

    set_sleep_enabled(true);
    let registering = {
        let registry = registry.clone();
        common::spawn_wait(move || registry.register(common::build(x, "db.x", "a_1")))
    };

    common::assert_still_blocked(&registering, "stalled register");
    assert!(registry.filter(|r| r.collection_id() == x).is_empty());
    registry
        .await_no_build_for_collection(&x, None, &OperationContext::new())
        .unwrap();

    set_sleep_enabled(false);
    registering.recv_timeout(common::WAKE).unwrap().unwrap();
    assert_eq!(registry.filter(|r| r.collection_id() == x).len(), 1);
}
