use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::snapshot::{Snapshot, SnapshotStore, SnapshotStoreError, SnapshotStrategy};
use crate::utils::retry::IsTransient;

use super::core::hash::IntegrityError;
use super::core::{Aggregate, EventDraft};
use super::store::{EventStore, StoreError};

// ============================================================================
// Repository - Snapshot-Accelerated Rehydration
// ============================================================================
//
// Orchestrates: commands' events -> event store append -> snapshot policy,
// and the reverse path: snapshot -> verified replay of newer events ->
// current aggregate state.
//
// Rehydration anchors the hash chain at the snapshot: the event at the
// snapshot's version must still exist in the store, and its hash seeds the
// verification of everything after it. A snapshot pointing at a purged
// version is a hard failure, never a silent full replay.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("snapshot store failure")]
    Snapshot(#[from] SnapshotStoreError),

    #[error("aggregate {0} not found")]
    NotFound(Uuid),

    #[error("state serialization failed")]
    Codec(#[from] serde_json::Error),

    #[error("failed to rehydrate aggregate {aggregate_id}: {reason}")]
    Rehydration { aggregate_id: Uuid, reason: String },
}

impl IsTransient for RepositoryError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::Store(StoreError::ConcurrencyConflict { .. })
        )
    }
}

pub struct Repository<A: Aggregate> {
    store: Arc<EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    strategy: Arc<dyn SnapshotStrategy>,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> Repository<A> {
    pub fn new(
        store: Arc<EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        strategy: Arc<dyn SnapshotStrategy>,
    ) -> Self {
        Self {
            store,
            snapshots,
            strategy,
            _phantom: PhantomData,
        }
    }

    pub async fn exists(&self, aggregate_id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.store.aggregate_exists(aggregate_id).await?)
    }

    /// Rehydrate current aggregate state.
    ///
    /// With a snapshot: restore its state, verify the chain of newer events
    /// against the anchor event's hash, and fold them on top. Without one:
    /// verified full replay from the first event.
    pub async fn load(&self, aggregate_id: Uuid) -> Result<A, RepositoryError> {
        match self.snapshots.get_latest(aggregate_id).await? {
            Some(snapshot) => self.load_from_snapshot(aggregate_id, snapshot).await,
            None => self.load_from_scratch(aggregate_id).await,
        }
    }

    async fn load_from_scratch(&self, aggregate_id: Uuid) -> Result<A, RepositoryError> {
        let events = self.store.load_for_rehydration(aggregate_id, 0, None).await?;
        if events.is_empty() {
            return Err(RepositoryError::NotFound(aggregate_id));
        }

        A::load_from_events(&events).map_err(|e| RepositoryError::Rehydration {
            aggregate_id,
            reason: e.to_string(),
        })
    }

    async fn load_from_snapshot(
        &self,
        aggregate_id: Uuid,
        snapshot: Snapshot,
    ) -> Result<A, RepositoryError> {
        let anchor = self
            .store
            .event_at(aggregate_id, snapshot.aggregate_version)
            .await?
            .ok_or(StoreError::Integrity(IntegrityError::SnapshotAnchorMissing {
                aggregate_id,
                version: snapshot.aggregate_version,
            }))?;

        let events = self
            .store
            .load_for_rehydration(
                aggregate_id,
                snapshot.aggregate_version,
                Some(&anchor.event_hash),
            )
            .await?;

        let mut aggregate: A = serde_json::from_value(snapshot.state)?;
        aggregate.set_version(snapshot.aggregate_version);

        for event in &events {
            let domain: A::Event =
                event
                    .to_domain()
                    .map_err(|e| RepositoryError::Rehydration {
                        aggregate_id,
                        reason: format!("failed to decode event {}: {}", event.event_id, e),
                    })?;
            aggregate
                .apply_event(&domain)
                .map_err(|e| RepositoryError::Rehydration {
                    aggregate_id,
                    reason: format!("failed to apply event {}: {}", event.event_id, e),
                })?;
            aggregate.set_version(event.sequence_number);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            snapshot_version = snapshot.aggregate_version,
            replayed = events.len(),
            "Rehydrated aggregate from snapshot"
        );
        Ok(aggregate)
    }

    /// Append new domain events with optimistic concurrency, then consult
    /// the snapshot strategy. Returns the new stream version.
    ///
    /// Snapshotting is best-effort: a failure there is logged and never
    /// fails the write that triggered it.
    pub async fn commit(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[A::Event],
        metadata: BTreeMap<String, String>,
    ) -> Result<i64, RepositoryError> {
        let mut drafts = Vec::with_capacity(events.len());
        for event in events {
            let mut draft = EventDraft::from_domain(event)?;
            for (key, value) in &metadata {
                draft = draft.with_metadata(key.clone(), value.clone());
            }
            drafts.push(draft);
        }

        let sealed = self.store.append(aggregate_id, expected_version, drafts).await?;
        let new_version = sealed
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or(expected_version);

        if self.strategy.should_snapshot(aggregate_id, new_version) {
            self.snapshot_best_effort(aggregate_id, new_version).await;
        }

        Ok(new_version)
    }

    async fn snapshot_best_effort(&self, aggregate_id: Uuid, version: i64) {
        // Reload through the verified path so the captured state matches an
        // event that exists, keeping the snapshot invariant by construction.
        let aggregate = match self.load(aggregate_id).await {
            Ok(aggregate) => aggregate,
            Err(e) => {
                tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Skipping snapshot: reload failed");
                return;
            }
        };

        let state = match serde_json::to_value(&aggregate) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Skipping snapshot: state serialization failed");
                return;
            }
        };

        let snapshot = Snapshot::new(aggregate_id, aggregate.version(), state);
        if let Err(e) = self.snapshots.save(snapshot).await {
            tracing::warn!(aggregate_id = %aggregate_id, error = %e, "Snapshot save failed");
        } else {
            tracing::debug!(aggregate_id = %aggregate_id, version, "Snapshot captured");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
