use crate::error::{IndexBuildError, Result};
use crate::types::{CollectionId, Namespace};
use dashmap::DashSet;
use std::sync::Arc;

/// Decides whether new index builds may start on a collection or database.
///
/// Consulted by the registry on every registration while the registry lock is
/// held, so implementations must not block or call back into the registry.
pub trait StopRequestOracle: Send + Sync {
    /// `Some(reason)` when new builds are currently forbidden for the target.
    fn forbidden_reason(&self, collection: &CollectionId, ns: &Namespace) -> Option<String>;
}

/// Oracle that never forbids a build.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl StopRequestOracle for AllowAll {
    fn forbidden_reason(&self, _collection: &CollectionId, _ns: &Namespace) -> Option<String> {
        None
    }
}

/// Tracks collections and databases on which new index builds are stopped
/// (typically because a drop is underway). Thread-safe and lock-free via DashSet.
#[derive(Clone, Default)]
pub struct StopRequests {
    collections: Arc<DashSet<CollectionId>>,
    databases: Arc<DashSet<String>>,
}

impl StopRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn stop_collection(&self, collection: CollectionId) {
        self.collections.insert(collection);
    }

    /// Idempotent.
    pub fn resume_collection(&self, collection: &CollectionId) {
        self.collections.remove(collection);
    }

    /// Idempotent.
    pub fn stop_database(&self, db: &str) {
        self.databases.insert(db.to_string());
    }

    /// Idempotent.
    pub fn resume_database(&self, db: &str) {
        self.databases.remove(db);
    }

    pub fn is_collection_stopped(&self, collection: &CollectionId) -> bool {
        self.collections.contains(collection)
    }

    pub fn is_database_stopped(&self, db: &str) -> bool {
        self.databases.contains(db)
    }
}

impl StopRequestOracle for StopRequests {
    fn forbidden_reason(&self, collection: &CollectionId, ns: &Namespace) -> Option<String> {
        if self.is_database_stopped(ns.db()) {
            return Some(format!(
                "Database ( {} ) is in the process of being dropped. New index builds are not currently allowed.",
                ns.db()
            ));
        }
        if self.is_collection_stopped(collection) {
            return Some(format!(
                "Collection ( {} ) is in the process of being dropped. New index builds are not currently allowed.",
                ns
            ));
        }
        None
    }
}

/// Guard: `Err(OperationForbidden)` when `oracle` forbids builds on the target.
pub fn check_not_stopped(
    oracle: &dyn StopRequestOracle,
    collection: &CollectionId,
    ns: &Namespace,
) -> Result<()> {
    match oracle.forbidden_reason(collection, ns) {
        Some(reason) => Err(IndexBuildError::OperationForbidden(reason)),
        None => Ok(()),
    }
}
