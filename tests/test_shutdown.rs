//! Drop and shutdown sequencing tests
//!
//! Covers:
//! - dropping a database: stop new builds, abort running ones, wait for drain
//! - teardown hook invoked once per unregister, failures tolerated
//! - shutdown cancellation propagating to every blocked waiter
//! - driving blocking waits from async code via spawn_blocking
//! - an async shutdown signal and a blocking waiter sharing one context

mod common;

use index_builds::{
    BuildPhase, BuildRecord, BuildTeardown, CollectionId, IndexBuildError, IndexBuildRegistry,
    InterruptReason, OperationContext, StopRequests, Uninterruptible,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingTeardown {
    torn_down: Mutex<Vec<String>>,
}

impl BuildTeardown for RecordingTeardown {
    fn teardown(&self, record: &BuildRecord) -> index_builds::Result<()> {
        self.torn_down
            .lock()
            .unwrap()
            .extend(record.index_names().iter().cloned());
        if record.builds_index("flaky_1") {
            return Err(IndexBuildError::Teardown("catalog write conflict".into()));
        }
        Ok(())
    }
}

/// Simulated executor: polls its record until aborted, then unregisters.
fn spawn_executor(registry: IndexBuildRegistry, record: Arc<BuildRecord>) {
    std::thread::spawn(move || {
        record.advance(BuildPhase::InProgress);
        while !record.status().phase.is_terminal() {
            record.record_keys_inserted(1);
            std::thread::sleep(Duration::from_millis(5));
        }
        registry.unregister(&record);
    });
}

#[test]
fn drop_database_stops_aborts_and_drains() {
    common::init_tracing();
    let stops = StopRequests::new();
    let teardown = Arc::new(RecordingTeardown::default());
    let registry = IndexBuildRegistry::default()
        .with_stop_requests(Arc::new(stops.clone()))
        .with_teardown(teardown.clone());
    let ctx = OperationContext::new();

    let a = common::build(CollectionId::generate(), "shop.orders", "sku_1");
    let b = common::build(CollectionId::generate(), "shop.users", "flaky_1");
    let other = common::build(CollectionId::generate(), "logs.events", "ts_1");
    for r in [&a, &b, &other] {
        registry
            .admit_and_register(Arc::clone(r), 3, &ctx)
            .unwrap();
        spawn_executor(registry.clone(), Arc::clone(r));
    }

    stops.stop_database("shop");
    let late = common::build(CollectionId::generate(), "shop.carts", "id_1");
    // A spare slot is taken, the stop request rejects the build, the slot goes back.
    assert!(matches!(
        registry.admit_and_register(late, 4, &ctx),
        Err(IndexBuildError::OperationForbidden(_))
    ));
    assert_eq!(registry.admitted_count(), 3);

    for r in registry.filter(|r| r.database() == "shop") {
        r.abort("database is being dropped");
    }
    registry.await_no_build_for_database("shop", &ctx).unwrap();

    assert!(registry.get(&other.build_id()).is_ok());
    assert_eq!(registry.admitted_count(), 1);
    let mut torn_down = teardown.torn_down.lock().unwrap().clone();
    torn_down.sort();
    assert_eq!(torn_down, vec!["flaky_1".to_string(), "sku_1".to_string()]);

    other.abort("shutdown");
    registry
        .wait_for_all_to_stop_for_shutdown(&Uninterruptible)
        .unwrap();
    registry.assert_no_builds_in_progress();
    assert!(registry.is_empty_unsynchronized());
    assert_eq!(registry.admitted_count(), 0);
}

#[test]
fn shutdown_interrupts_every_waiter() {
    common::init_tracing();
    let registry = IndexBuildRegistry::default();
    let r = common::build(CollectionId::generate(), "db.coll", "a_1");
    registry.register(Arc::clone(&r)).unwrap();

    let root = OperationContext::new();
    let receivers: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            let ctx = root.child();
            let id = r.build_id();
            let collection = r.collection_id();
            common::spawn_wait(move || match i {
                0 => registry.await_build_finished(&id, &ctx),
                1 => registry.await_no_build_for_collection(&collection, None, &ctx),
                2 => registry.await_any_build_finishes(&ctx),
                _ => registry.await_all_stop(&ctx),
            })
        })
        .collect();
    for rx in &receivers {
        common::assert_still_blocked(rx, "waiter before shutdown");
    }

    root.cancel(InterruptReason::Shutdown);
    registry.notify_all_waiters();

    for rx in receivers {
        assert_eq!(
            rx.recv_timeout(common::WAKE).unwrap(),
            Err(IndexBuildError::Cancelled(InterruptReason::Shutdown))
        );
    }
    // Interrupted waiters leave the registry untouched.
    assert!(registry.get(&r.build_id()).is_ok());
    registry.unregister(&r);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_caller_waits_via_spawn_blocking() {
    common::init_tracing();
    let registry = IndexBuildRegistry::default();
    let r = common::build(CollectionId::generate(), "db.coll", "a_1");
    registry.register(Arc::clone(&r)).unwrap();

    let waiter = {
        let registry = registry.clone();
        let id = r.build_id();
        tokio::task::spawn_blocking(move || {
            registry.await_build_finished(&id, &OperationContext::new())
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    registry.unregister(&r);
    tokio::time::timeout(common::WAKE, waiter)
        .await
        .expect("blocking waiter should finish")
        .expect("blocking task should not panic")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_shutdown_signal_reaches_blocking_waiter() {
    common::init_tracing();
    let registry = IndexBuildRegistry::default();
    let r = common::build(CollectionId::generate(), "db.coll", "a_1");
    registry.register(Arc::clone(&r)).unwrap();

    let ctx = OperationContext::new();
    let waiter = {
        let registry = registry.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || registry.await_all_stop(&ctx))
    };
    let shutdown = ctx.token();
    let listener = tokio::spawn(async move { shutdown.cancelled().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());
    assert!(!listener.is_finished());

    ctx.cancel(InterruptReason::Shutdown);
    registry.notify_all_waiters();

    tokio::time::timeout(common::WAKE, listener)
        .await
        .expect("async listener should observe the shutdown")
        .unwrap();
    let result = tokio::time::timeout(common::WAKE, waiter)
        .await
        .expect("blocking waiter should finish")
        .expect("blocking task should not panic");
    assert_eq!(
        result,
        Err(IndexBuildError::Cancelled(InterruptReason::Shutdown))
    );
    registry.unregister(&r);
}
