use index_builds::{BuildId, BuildRecord, CollectionId, IndexBuildProtocol, Namespace};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// How long a wait must stay blocked before we call it blocked.
#[allow(dead_code)]
pub const BLOCKED: Duration = Duration::from_millis(150);
/// Upper bound on how long a wakeup may take before we call it lost.
#[allow(dead_code)]
pub const WAKE: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn build(collection: CollectionId, ns: &str, index: &str) -> Arc<BuildRecord> {
    build_with(collection, ns, IndexBuildProtocol::TwoPhase, index)
}

#[allow(dead_code)]
pub fn build_with(
    collection: CollectionId,
    ns: &str,
    protocol: IndexBuildProtocol,
    index: &str,
) -> Arc<BuildRecord> {
    BuildRecord::new(
        BuildId::generate(),
        collection,
        Namespace::parse(ns).expect("test namespace must be db.coll"),
        protocol,
        vec![index.to_string()],
    )
}

/// Runs `f` on its own thread; the receiver yields the result once it returns.
#[allow(dead_code)]
pub fn spawn_wait<T, F>(f: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx
}

#[allow(dead_code)]
pub fn assert_still_blocked<T>(rx: &mpsc::Receiver<T>, what: &str) {
    assert!(
        rx.recv_timeout(BLOCKED).is_err(),
        "{} should still be blocked",
        what
    );
}
