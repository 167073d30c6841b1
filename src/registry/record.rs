use crate::types::{BuildId, CollectionId, IndexBuildProtocol, Namespace};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Progress of one build, as reported by the task executing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum BuildPhase {
    Setup,
    InProgress,
    Committing,
    Committed,
    Aborted { reason: String },
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Committed | BuildPhase::Aborted { .. })
    }

    fn rank(&self) -> u8 {
        match self {
            BuildPhase::Setup => 0,
            BuildPhase::InProgress => 1,
            BuildPhase::Committing => 2,
            BuildPhase::Committed | BuildPhase::Aborted { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(flatten)]
    pub phase: BuildPhase,
    pub keys_inserted: u64,
}

/// One active index build: immutable identity plus executor-owned status.
///
/// Shared as `Arc<BuildRecord>` between the registry and the task running the
/// build. The registry only reads the identity fields; status updates go
/// through the record's own lock and never touch the registry.
#[derive(Debug)]
pub struct BuildRecord {
    build_id: BuildId,
    collection_id: CollectionId,
    ns: Namespace,
    protocol: IndexBuildProtocol,
    index_names: Vec<String>,
    status: Mutex<BuildStatus>,
}

impl BuildRecord {
    pub fn new(
        build_id: BuildId,
        collection_id: CollectionId,
        ns: Namespace,
        protocol: IndexBuildProtocol,
        index_names: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(BuildRecord {
            build_id,
            collection_id,
            ns,
            protocol,
            index_names,
            status: Mutex::new(BuildStatus {
                phase: BuildPhase::Setup,
                keys_inserted: 0,
            }),
        })
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    pub fn database(&self) -> &str {
        self.ns.db()
    }

    pub fn protocol(&self) -> IndexBuildProtocol {
        self.protocol
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    pub fn builds_index(&self, name: &str) -> bool {
        self.index_names.iter().any(|n| n == name)
    }

    pub fn status(&self) -> BuildStatus {
        self.status_lock().clone()
    }

    /// Moves the build forward to `phase`. Returns `false` (and changes
    /// nothing) for backward moves or once the build reached a terminal phase.
    pub fn advance(&self, phase: BuildPhase) -> bool {
        let mut status = self.status_lock();
        if status.phase.is_terminal() || phase.rank() < status.phase.rank() {
            return false;
        }
        status.phase = phase;
        true
    }

    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.advance(BuildPhase::Aborted {
            reason: reason.into(),
        })
    }

    pub fn record_keys_inserted(&self, count: u64) {
        let mut status = self.status_lock();
        status.keys_inserted = status.keys_inserted.saturating_add(count);
    }

    pub fn summary(&self) -> IndexBuildSummary {
        IndexBuildSummary {
            build_id: self.build_id,
            collection_id: self.collection_id,
            ns: self.ns.to_string(),
            protocol: self.protocol,
            index_names: self.index_names.clone(),
            status: self.status(),
        }
    }

    fn status_lock(&self) -> MutexGuard<'_, BuildStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of one build for diagnostics output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBuildSummary {
    pub build_id: BuildId,
    pub collection_id: CollectionId,
    pub ns: String,
    pub protocol: IndexBuildProtocol,
    pub index_names: Vec<String>,
    pub status: BuildStatus,
}
