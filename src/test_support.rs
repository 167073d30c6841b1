//! Test-only hooks. Compiled for unit tests and with the `test-support` feature.
//!
//! [`set_sleep_enabled`] makes every registry mutation stall before it takes the
//! registry lock, widening the window in which another thread can observe
//! the state just before the mutation.

use crate::registry::record::IndexBuildSummary;
use crate::registry::IndexBuildRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SLEEP_INTERVAL: Duration = Duration::from_millis(100);

static SLEEP_FOR_TEST: AtomicBool = AtomicBool::new(false);

/// Process-wide: affects every registry.
pub fn set_sleep_enabled(enabled: bool) {
    tracing::info!("[IXB] test sleep {}", if enabled { "enabled" } else { "disabled" });
    SLEEP_FOR_TEST.store(enabled, Ordering::SeqCst);
}

pub fn sleep_enabled() -> bool {
    SLEEP_FOR_TEST.load(Ordering::SeqCst)
}

/// Sleep in fixed intervals for as long as the flag stays set. Must be called
/// without the registry lock held.
pub fn sleep_if_necessary() {
    while sleep_enabled() {
        tracing::trace!("[IXB] test sleep: holding registry mutation");
        std::thread::sleep(SLEEP_INTERVAL);
    }
}

/// Like [`IndexBuildRegistry::assert_no_builds_in_progress`], but reports the
/// leftover builds instead of panicking.
pub fn verify_no_index_builds(
    registry: &IndexBuildRegistry,
) -> Result<(), Vec<IndexBuildSummary>> {
    let leftover = registry.summaries();
    if leftover.is_empty() {
        Ok(())
    } else {
        Err(leftover)
    }
}
