//! Registry of in-flight index builds.
//!
//! One mutex guards the build map, the completion generation and the admission
//! count. Two condition variables hang off that mutex: `builds_changed` is
//! broadcast whenever a build is removed (every waiter re-evaluates its own
//! predicate), `slot_freed` is broadcast whenever an admission slot is released
//! (acquirers pass their own ceilings, so any of them may be the one that can
//! proceed).

pub mod admission;
pub mod record;
pub mod wait;

use crate::config::RegistryConfig;
use crate::error::{IndexBuildError, Result};
use crate::interrupt::Interrupt;
use crate::stop_requests::{check_not_stopped, AllowAll, StopRequestOracle};
use crate::types::BuildId;
use record::{BuildRecord, IndexBuildSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[cfg(any(test, feature = "test-support"))]
use crate::test_support::sleep_if_necessary;

#[cfg(not(any(test, feature = "test-support")))]
#[inline(always)]
fn sleep_if_necessary() {}

/// Releases storage/catalog resources tied to a build. Called by
/// [`IndexBuildRegistry::unregister`] before the record is removed, without
/// the registry lock held.
pub trait BuildTeardown: Send + Sync {
    fn teardown(&self, record: &BuildRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTeardown;

impl BuildTeardown for NoopTeardown {
    fn teardown(&self, _record: &BuildRecord) -> Result<()> {
        Ok(())
    }
}

struct Entry {
    record: Arc<BuildRecord>,
    // Whether unregistering this build gives an admission slot back.
    holds_slot: bool,
}

pub(crate) struct RegistryState {
    builds: HashMap<BuildId, Entry>,
    completed_generation: u64,
    admitted: usize,
}

impl RegistryState {
    fn records(&self) -> impl Iterator<Item = &Arc<BuildRecord>> {
        self.builds.values().map(|e| &e.record)
    }

    fn any_build(&self, predicate: impl Fn(&BuildRecord) -> bool) -> bool {
        self.records().any(|r| predicate(r))
    }
}

pub(crate) struct Shared {
    state: Mutex<RegistryState>,
    builds_changed: Condvar,
    slot_freed: Condvar,
    // Mirrors `state.builds.len()`, written under the lock. Only read by
    // `is_empty_unsynchronized`.
    len_hint: AtomicUsize,
    config: RegistryConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .expect("index build registry mutex poisoned")
    }

    /// Give one admission slot back. Caller holds the lock.
    fn release_slot_locked(&self, state: &mut RegistryState) {
        if state.admitted == 0 {
            tracing::error!("[IXB] admission slot released with no slots held");
            panic!("index build admission count would drop below zero");
        }
        state.admitted -= 1;
        self.slot_freed.notify_all();
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        self.release_slot_locked(&mut state);
    }

    /// How long one condvar wait may last before the interrupt is re-checked.
    fn wait_slice(&self, ctx: &dyn Interrupt) -> Duration {
        let poll = self.config.interrupt_poll_interval();
        match ctx.deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(poll),
            None => poll,
        }
    }

    /// Block on `cv` until `done` holds for the registry state or `ctx` is
    /// interrupted. `done` is evaluated under the lock after every wakeup.
    fn wait_until<'a>(
        &'a self,
        mut state: MutexGuard<'a, RegistryState>,
        cv: &Condvar,
        ctx: &dyn Interrupt,
        mut done: impl FnMut(&RegistryState) -> bool,
    ) -> Result<MutexGuard<'a, RegistryState>> {
        loop {
            if done(&state) {
                return Ok(state);
            }
            ctx.check_for_interrupt()?;
            let slice = self.wait_slice(ctx);
            state = cv
                .wait_timeout(state, slice)
                .expect("index build registry mutex poisoned")
                .0;
        }
    }
}

/// Shared registry of active index builds. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IndexBuildRegistry {
    shared: Arc<Shared>,
    stop_requests: Arc<dyn StopRequestOracle>,
    teardown: Arc<dyn BuildTeardown>,
}

impl Default for IndexBuildRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl IndexBuildRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        IndexBuildRegistry {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState {
                    builds: HashMap::new(),
                    completed_generation: 0,
                    admitted: 0,
                }),
                builds_changed: Condvar::new(),
                slot_freed: Condvar::new(),
                len_hint: AtomicUsize::new(0),
                config,
            }),
            stop_requests: Arc::new(AllowAll),
            teardown: Arc::new(NoopTeardown),
        }
    }

    pub fn with_stop_requests(mut self, oracle: Arc<dyn StopRequestOracle>) -> Self {
        self.stop_requests = oracle;
        self
    }

    pub fn with_teardown(mut self, teardown: Arc<dyn BuildTeardown>) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Make `record` discoverable by the rest of the system.
    ///
    /// The build holds no admission slot; use
    /// [`IndexBuildRegistry::admit_and_register`] for builds that count against
    /// the admission ceiling.
    ///
    /// # Errors
    ///
    /// - [`IndexBuildError::BuildAlreadyExists`] if the id is already registered.
    /// - [`IndexBuildError::OperationForbidden`] if builds are stopped on the
    ///   record's collection or database.
    /// - [`IndexBuildError::IndexBuildAlreadyInProgress`] if another build on the
    ///   same collection is building one of the same indexes.
    pub fn register(&self, record: Arc<BuildRecord>) -> Result<()> {
        sleep_if_necessary();
        let mut state = self.shared.lock();
        self.insert_locked(&mut state, record, false)
    }

    /// Checks and inserts under an already held lock.
    fn insert_locked(
        &self,
        state: &mut RegistryState,
        record: Arc<BuildRecord>,
        holds_slot: bool,
    ) -> Result<()> {
        let build_id = record.build_id();

        if state.builds.contains_key(&build_id) {
            tracing::error!("[IXB {}] duplicate registration of index build", build_id);
            return Err(IndexBuildError::BuildAlreadyExists(build_id));
        }

        check_not_stopped(
            self.stop_requests.as_ref(),
            &record.collection_id(),
            record.namespace(),
        )?;

        if let Some((existing, index)) = state.records().find_map(|existing| {
            if existing.collection_id() != record.collection_id() {
                return None;
            }
            record
                .index_names()
                .iter()
                .find(|name| existing.builds_index(name))
                .map(|name| (existing.build_id(), name.clone()))
        }) {
            tracing::debug!(
                "[IXB {}] index '{}' on {} already being built by {}",
                build_id,
                index,
                record.namespace(),
                existing
            );
            return Err(IndexBuildError::IndexBuildAlreadyInProgress {
                collection: record.collection_id(),
                index,
            });
        }

        tracing::debug!(
            "[IXB {}] registered on {} ({}) indexes={:?} protocol={:?}",
            build_id,
            record.namespace(),
            record.collection_id(),
            record.index_names(),
            record.protocol()
        );
        state.builds.insert(build_id, Entry { record, holds_slot });
        self.shared
            .len_hint
            .store(state.builds.len(), Ordering::Release);
        Ok(())
    }

    /// Remove a finished (committed, failed or aborted) build.
    ///
    /// Checks that `record` is registered, runs the teardown hook, then removes
    /// the record, bumps the completion generation, gives back the build's
    /// admission slot if it holds one and wakes every waiter. The last four
    /// happen under one lock acquisition.
    ///
    /// # Panics
    ///
    /// If `record` is not the registered instance for its build id. The
    /// teardown hook is not run in that case.
    pub fn unregister(&self, record: &Arc<BuildRecord>) {
        sleep_if_necessary();
        let build_id = record.build_id();

        let registered = Self::registered_as(&self.shared.lock(), record);
        if registered != Some(true) {
            Self::not_registered(build_id, registered);
        }

        if let Err(e) = self.teardown.teardown(record) {
            tracing::warn!(
                "[IXB {}] teardown failed, unregistering anyway: {}",
                build_id,
                e
            );
        }

        let mut state = self.shared.lock();
        let registered = Self::registered_as(&state, record);
        if registered != Some(true) {
            drop(state);
            Self::not_registered(build_id, registered);
        }
        let holds_slot = state
            .builds
            .remove(&build_id)
            .is_some_and(|e| e.holds_slot);

        self.shared
            .len_hint
            .store(state.builds.len(), Ordering::Release);
        state.completed_generation += 1;
        if holds_slot {
            self.shared.release_slot_locked(&mut state);
        }
        self.shared.builds_changed.notify_all();

        tracing::debug!(
            "[IXB {}] unregistered from {}, generation={}",
            build_id,
            record.namespace(),
            state.completed_generation
        );
    }

    /// `None` if nothing is registered under the record's id, otherwise whether
    /// the registered instance is `record` itself.
    fn registered_as(state: &RegistryState, record: &Arc<BuildRecord>) -> Option<bool> {
        state
            .builds
            .get(&record.build_id())
            .map(|e| Arc::ptr_eq(&e.record, record))
    }

    fn not_registered(build_id: BuildId, registered: Option<bool>) -> ! {
        match registered {
            None => {
                tracing::error!("[IXB {}] unregistering unknown index build", build_id);
                panic!("index build {} is not registered", build_id);
            }
            Some(_) => {
                tracing::error!(
                    "[IXB {}] unregistering a record that is not the registered one",
                    build_id
                );
                panic!("index build {} registered under a different record", build_id);
            }
        }
    }

    pub fn get(&self, build_id: &BuildId) -> Result<Arc<BuildRecord>> {
        self.shared
            .lock()
            .builds
            .get(build_id)
            .map(|e| Arc::clone(&e.record))
            .ok_or(IndexBuildError::NotFound(*build_id))
    }

    /// Snapshot of every registered build matching `predicate`, taken under the
    /// lock. Stale as soon as it is returned; do not use it to decide whether a
    /// build is still running.
    pub fn filter(&self, predicate: impl Fn(&BuildRecord) -> bool) -> Vec<Arc<BuildRecord>> {
        self.shared
            .lock()
            .records()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.shared.lock().builds.len()
    }

    pub fn completed_generation(&self) -> u64 {
        self.shared.lock().completed_generation
    }

    /// Diagnostics snapshot of every registered build, ordered by build id.
    pub fn summaries(&self) -> Vec<IndexBuildSummary> {
        let mut summaries: Vec<_> = self.filter(|_| true).iter().map(|r| r.summary()).collect();
        summaries.sort_by_key(|s| s.build_id);
        summaries
    }

    /// Emptiness check that does not take the lock.
    ///
    /// Only meaningful when the caller has already made sure nothing can
    /// register or unregister concurrently, e.g. after every build-spawning
    /// path has shut down.
    pub fn is_empty_unsynchronized(&self) -> bool {
        self.shared.len_hint.load(Ordering::Acquire) == 0
    }

    /// # Panics
    ///
    /// If any build is registered.
    pub fn assert_no_builds_in_progress(&self) {
        let state = self.shared.lock();
        if state.builds.is_empty() {
            return;
        }
        for record in state.records() {
            tracing::error!(
                "[IXB {}] index build still in progress on {} ({})",
                record.build_id(),
                record.namespace(),
                record.collection_id()
            );
        }
        panic!(
            "expected no index builds in progress, found {}",
            state.builds.len()
        );
    }

    /// Wake every blocked waiter so it re-checks its predicate and interrupt.
    /// Call after cancelling a context to cut the wait short of the next poll.
    pub fn notify_all_waiters(&self) {
        let _state = self.shared.lock();
        self.shared.builds_changed.notify_all();
        self.shared.slot_freed.notify_all();
    }
}
