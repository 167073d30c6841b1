//! Blocking waits on registry state.
//!
//! Each wait evaluates its predicate under the registry lock, returns at once
//! if it already holds, and otherwise sleeps on `builds_changed` and
//! re-evaluates after every wakeup (broadcasts wake waiters whose predicate is
//! still false, and condvars wake spuriously).

use super::record::BuildRecord;
use super::IndexBuildRegistry;
use crate::error::Result;
use crate::interrupt::Interrupt;
use crate::types::{BuildId, CollectionId, IndexBuildProtocol};

fn on_collection(
    record: &BuildRecord,
    collection: &CollectionId,
    protocol: Option<IndexBuildProtocol>,
) -> bool {
    record.collection_id() == *collection && protocol.map_or(true, |p| record.protocol() == p)
}

impl IndexBuildRegistry {
    /// Wait until `build_id` is no longer registered.
    pub fn await_build_finished(&self, build_id: &BuildId, ctx: &dyn Interrupt) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        shared.wait_until(state, &shared.builds_changed, ctx, |s| {
            !s.builds.contains_key(build_id)
        })?;
        Ok(())
    }

    /// Wait until at least one build is unregistered after this call starts,
    /// whichever build it is.
    pub fn await_any_build_finishes(&self, ctx: &dyn Interrupt) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        let entry_generation = state.completed_generation;
        shared.wait_until(state, &shared.builds_changed, ctx, |s| {
            s.completed_generation > entry_generation
        })?;
        Ok(())
    }

    /// Wait until no build on `collection` is registered, optionally counting
    /// only builds that use `protocol`.
    pub fn await_no_build_for_collection(
        &self,
        collection: &CollectionId,
        protocol: Option<IndexBuildProtocol>,
        ctx: &dyn Interrupt,
    ) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        shared.wait_until(state, &shared.builds_changed, ctx, |s| {
            !s.any_build(|r| on_collection(r, collection, protocol))
        })?;
        Ok(())
    }

    /// Wait until no build in database `db` is registered.
    pub fn await_no_build_for_database(&self, db: &str, ctx: &dyn Interrupt) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        shared.wait_until(state, &shared.builds_changed, ctx, |s| {
            !s.any_build(|r| r.database() == db)
        })?;
        Ok(())
    }

    /// Wait until the registry is empty.
    pub fn await_all_stop(&self, ctx: &dyn Interrupt) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        shared.wait_until(state, &shared.builds_changed, ctx, |s| s.builds.is_empty())?;
        Ok(())
    }

    /// [`IndexBuildRegistry::await_all_stop`] for shutdown, logging the builds
    /// still being waited on. Callers must already have stopped every path
    /// that starts new builds.
    pub fn wait_for_all_to_stop_for_shutdown(&self, ctx: &dyn Interrupt) -> Result<()> {
        let shared = &self.shared;
        let state = shared.lock();
        if !state.builds.is_empty() {
            tracing::info!(
                "[IXB] waiting until the following {} index build(s) are finished",
                state.builds.len()
            );
            for record in state.records() {
                tracing::info!(
                    "[IXB {}] waiting on build of {:?} on {}",
                    record.build_id(),
                    record.index_names(),
                    record.namespace()
                );
            }
        }
        shared.wait_until(state, &shared.builds_changed, ctx, |s| s.builds.is_empty())?;
        tracing::info!("[IXB] all index builds stopped");
        Ok(())
    }
}
