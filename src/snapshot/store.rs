use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

// ============================================================================
// Snapshot Store
// ============================================================================
//
// A snapshot is a cached materialization of aggregate state at a known
// stream version. It is a best-effort optimization: saving one must never
// block or fail the event write it follows, and later snapshots supersede
// (without necessarily deleting) earlier ones.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Snapshot {
    pub aggregate_id: Uuid,
    /// Stream position at capture time. Must name an event that actually
    /// exists in the store; rehydration fails hard otherwise.
    pub aggregate_version: i64,
    pub created_at: DateTime<Utc>,
    /// Serialized aggregate state.
    pub state: Value,
}

impl Snapshot {
    pub fn new(aggregate_id: Uuid, aggregate_version: i64, state: Value) -> Self {
        Self {
            aggregate_id,
            aggregate_version,
            created_at: Utc::now(),
            state,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("snapshot store failure: {0}")]
pub struct SnapshotStoreError(pub String);

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: Snapshot) -> Result<(), SnapshotStoreError>;

    /// The snapshot with the highest `aggregate_version`, if any.
    async fn get_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, SnapshotStoreError>;

    async fn delete_all(&self, aggregate_id: Uuid) -> Result<(), SnapshotStoreError>;
}

/// In-memory snapshot store; keeps superseded snapshots around so
/// `get_latest` picks by version, matching durable implementations.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<Uuid, Vec<Snapshot>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store lock poisoned");
        snapshots
            .entry(snapshot.aggregate_id)
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn get_latest(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, SnapshotStoreError> {
        let snapshots = self.snapshots.lock().expect("snapshot store lock poisoned");
        Ok(snapshots
            .get(&aggregate_id)
            .and_then(|list| list.iter().max_by_key(|s| s.aggregate_version))
            .cloned())
    }

    async fn delete_all(&self, aggregate_id: Uuid) -> Result<(), SnapshotStoreError> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store lock poisoned");
        snapshots.remove(&aggregate_id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
