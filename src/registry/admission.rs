//! Admission control: bounds how many builds run at once.

use super::record::BuildRecord;
use super::{sleep_if_necessary, IndexBuildRegistry, RegistryState, Shared};
use crate::error::{IndexBuildError, Result};
use crate::interrupt::Interrupt;
use std::sync::{Arc, MutexGuard};

/// One unit of permission to run a build.
///
/// Dropping the slot gives it back. Handing it to
/// [`IndexBuildRegistry::register_admitted`] transfers it to the registry,
/// which gives it back when the build is unregistered.
#[must_use = "dropping an admission slot releases it immediately"]
pub struct AdmissionSlot {
    shared: Option<Arc<Shared>>,
}

impl AdmissionSlot {
    /// Give the slot back now and wake every waiting [`IndexBuildRegistry::acquire`].
    pub fn release(self) {
        drop(self);
    }

    fn disarm(mut self) {
        self.shared = None;
    }

    fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        self.shared.as_ref().is_some_and(|s| Arc::ptr_eq(s, shared))
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_slot();
        }
    }
}

impl std::fmt::Debug for AdmissionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionSlot")
            .field("armed", &self.shared.is_some())
            .finish()
    }
}

impl IndexBuildRegistry {
    /// Number of admission slots currently held.
    pub fn admitted_count(&self) -> usize {
        self.shared.lock().admitted
    }

    /// Block until fewer than `max_active` slots are held, then take one.
    ///
    /// # Errors
    ///
    /// [`crate::IndexBuildError::Cancelled`] if `ctx` is interrupted first.
    pub fn acquire(&self, max_active: usize, ctx: &dyn Interrupt) -> Result<AdmissionSlot> {
        let state = self.shared.lock();
        let mut state = self.wait_for_slot(state, max_active, ctx, None)?;
        state.admitted += 1;
        Ok(AdmissionSlot {
            shared: Some(Arc::clone(&self.shared)),
        })
    }

    /// [`IndexBuildRegistry::acquire`] against the configured ceiling.
    pub fn acquire_default(&self, ctx: &dyn Interrupt) -> Result<AdmissionSlot> {
        self.acquire(self.shared.config.max_active_builds, ctx)
    }

    /// Register a build that already holds `slot`. The slot stays held until
    /// the build is unregistered; if registration fails it is released.
    ///
    /// # Errors
    ///
    /// Same as [`IndexBuildRegistry::register`], plus
    /// [`IndexBuildError::ForeignAdmissionSlot`] if `slot` was acquired from
    /// another registry. The slot is then released back to that registry.
    pub fn register_admitted(&self, record: Arc<BuildRecord>, slot: AdmissionSlot) -> Result<()> {
        if !slot.belongs_to(&self.shared) {
            tracing::error!(
                "[IXB {}] admission slot belongs to a different registry",
                record.build_id()
            );
            slot.release();
            return Err(IndexBuildError::ForeignAdmissionSlot);
        }
        sleep_if_necessary();
        let mut state = self.shared.lock();
        match self.insert_locked(&mut state, record, true) {
            Ok(()) => {
                slot.disarm();
                Ok(())
            }
            Err(e) => {
                drop(state);
                slot.release();
                Err(e)
            }
        }
    }

    /// Take a slot and register `record` in one critical section, so no other
    /// thread can observe the slot held without the build being registered.
    ///
    /// On registration failure the slot is given back before the error is
    /// returned.
    pub fn admit_and_register(
        &self,
        record: Arc<BuildRecord>,
        max_active: usize,
        ctx: &dyn Interrupt,
    ) -> Result<()> {
        sleep_if_necessary();
        let state = self.shared.lock();
        let mut state = self.wait_for_slot(state, max_active, ctx, Some(record.as_ref()))?;
        state.admitted += 1;
        if let Err(e) = self.insert_locked(&mut state, record, true) {
            self.shared.release_slot_locked(&mut state);
            return Err(e);
        }
        Ok(())
    }

    fn wait_for_slot<'a>(
        &'a self,
        state: MutexGuard<'a, RegistryState>,
        max_active: usize,
        ctx: &dyn Interrupt,
        record: Option<&BuildRecord>,
    ) -> Result<MutexGuard<'a, RegistryState>> {
        if state.admitted >= max_active {
            match record {
                Some(r) => tracing::info!(
                    "[IXB {}] too many index builds running simultaneously, waiting for one to finish: active={}, max={}, ns={}, indexes={:?}",
                    r.build_id(),
                    state.admitted,
                    max_active,
                    r.namespace(),
                    r.index_names()
                ),
                None => tracing::info!(
                    "[IXB] too many index builds running simultaneously, waiting for one to finish: active={}, max={}",
                    state.admitted,
                    max_active
                ),
            }
        }

        let shared: &Shared = &self.shared;
        shared.wait_until(state, &shared.slot_freed, ctx, |s| s.admitted < max_active)
    }
}
