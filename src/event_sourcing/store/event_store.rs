use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{verify_stream_integrity, Event, EventDraft, IntegrityError};
use crate::event_sourcing::upcast::{UpcastError, UpcasterRegistry};
use crate::messaging::EventBus;

use super::backend::{AppendOutcome, BackendError, EventBackend, EventFilter, EventRecord};

// ============================================================================
// Event Store - Append-Only Persistence With Concurrency Safety
// ============================================================================
//
// Responsibilities:
// 1. Seal drafts into chained events (sequence number, previous hash, hash)
// 2. Append atomically with optimistic concurrency
// 3. Serve reads, upcasting every event to its current schema version
// 4. Verify hash-chain integrity on the rehydration path
// 5. Publish appended events to the event bus
//
// The store is the single source of truth for aggregate version numbers;
// nothing else may increment or infer one. The store never retries: retry
// policy belongs to the caller (see utils::retry).
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Expected-version mismatch on append. Recoverable: reload and retry.
    #[error("concurrency conflict: expected version {expected}, but current is {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    /// Underlying storage I/O or serialization failure, cause preserved.
    #[error("event store backend failure")]
    Storage(#[from] BackendError),

    #[error(transparent)]
    Upcast(#[from] UpcastError),

    /// Hash-chain violation during a rehydration read. Corruption signal.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl crate::utils::retry::IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

pub struct EventStore {
    backend: Arc<dyn EventBackend>,
    upcasters: Arc<UpcasterRegistry>,
    bus: Option<Arc<dyn EventBus>>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn EventBackend>, upcasters: Arc<UpcasterRegistry>) -> Self {
        Self {
            backend,
            upcasters,
            bus: None,
        }
    }

    /// Attach an event bus; sealed events are published after each
    /// successful append.
    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append drafts to an aggregate's stream iff its current version equals
    /// `expected_version`. Seals each draft in order, chaining from the
    /// current stream head. Returns the sealed events.
    ///
    /// The head hash read below may go stale under a concurrent writer, but
    /// the backend re-checks `expected_version` atomically at append time,
    /// so a stale head always surfaces as a conflict, never a broken chain.
    pub async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<Event>, StoreError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }

        let mut previous_hash = self.head_hash(aggregate_id, expected_version).await?;

        let mut sealed = Vec::with_capacity(drafts.len());
        let mut records = Vec::with_capacity(drafts.len());
        let mut sequence = expected_version;

        for draft in drafts {
            sequence += 1;
            let event = draft.seal(aggregate_id, sequence, previous_hash.take());
            previous_hash = Some(event.event_hash.clone());
            records.push(encode_record(&event)?);
            sealed.push(event);
        }

        match self.backend.append(aggregate_id, expected_version, records).await? {
            AppendOutcome::Appended { new_version } => {
                tracing::info!(
                    aggregate_id = %aggregate_id,
                    new_version,
                    event_count = sealed.len(),
                    "Appended events to event store"
                );
            }
            AppendOutcome::VersionConflict { actual } => {
                return Err(StoreError::ConcurrencyConflict {
                    expected: expected_version,
                    actual,
                });
            }
        }

        if let Some(bus) = &self.bus {
            for event in &sealed {
                if let Err(e) = bus.publish(event).await {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %e,
                        "Failed to publish appended event; bus redelivery must cover it"
                    );
                }
            }
        }

        Ok(sealed)
    }

    /// Filtered, stream-ordered read with every event upcast to its current
    /// schema version. Per-aggregate version order when the filter names an
    /// aggregate, global insertion order otherwise.
    ///
    /// Projection reads come through here and skip hash verification;
    /// rehydration reads use `load_for_rehydration`.
    pub async fn get_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let records = self.backend.read(filter).await?;

        let mut events = Vec::with_capacity(records.len());
        for record in records {
            let event = decode_record(&record)?;
            events.push(self.upcasters.upcast_event(&event)?);
        }

        tracing::debug!(count = events.len(), "Loaded events");
        Ok(events)
    }

    /// Convenience read restricted to one stream, optionally filtered by a
    /// set of event types, in ascending version order.
    pub async fn get_events_by_aggregate_id(
        &self,
        aggregate_id: Uuid,
        event_types: Option<Vec<String>>,
    ) -> Result<Vec<Event>, StoreError> {
        let mut filter = EventFilter::for_aggregate(aggregate_id);
        if let Some(types) = event_types {
            filter = filter.with_event_types(types);
        }
        self.get_events(&filter).await
    }

    /// Rehydration read: raw records are verified against the hash chain
    /// first (hashes cover payloads as originally stored), then upcast.
    ///
    /// `chain_head` is `None` for a full replay, or the hash of the event at
    /// the snapshot's version when resuming after a snapshot;
    /// `since_version` is the matching exclusive lower bound.
    pub async fn load_for_rehydration(
        &self,
        aggregate_id: Uuid,
        since_version: i64,
        chain_head: Option<&str>,
    ) -> Result<Vec<Event>, StoreError> {
        let filter = EventFilter::for_aggregate(aggregate_id).since_version(since_version);
        let records = self.backend.read(&filter).await?;

        let mut raw = Vec::with_capacity(records.len());
        for record in &records {
            raw.push(decode_record(record)?);
        }

        verify_stream_integrity(&raw, chain_head)?;

        let mut events = Vec::with_capacity(raw.len());
        for event in &raw {
            events.push(self.upcasters.upcast_event(event)?);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            since_version,
            count = events.len(),
            "Loaded verified events for rehydration"
        );
        Ok(events)
    }

    /// The raw stored event at an exact stream position, if any. Used for
    /// snapshot anchoring; not upcast.
    pub async fn event_at(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
    ) -> Result<Option<Event>, StoreError> {
        match self.backend.event_at(aggregate_id, sequence_number).await? {
            Some(record) => Ok(Some(decode_record(&record)?)),
            None => Ok(None),
        }
    }

    pub async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.backend.current_version(aggregate_id).await?)
    }

    pub async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.current_version(aggregate_id).await? > 0)
    }

    /// Hash of the event at the current stream head, `None` for a new
    /// stream.
    ///
    /// An `expected_version` ahead of the actual stream is a stale caller
    /// view and reports the same retryable conflict the backend's version
    /// check would; a missing event at or below the current version is
    /// corruption and stays a storage error.
    async fn head_hash(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
    ) -> Result<Option<String>, StoreError> {
        if expected_version == 0 {
            return Ok(None);
        }
        match self.event_at(aggregate_id, expected_version).await? {
            Some(head) => Ok(Some(head.event_hash)),
            None => {
                let actual = self.current_version(aggregate_id).await?;
                if expected_version > actual {
                    return Err(StoreError::ConcurrencyConflict {
                        expected: expected_version,
                        actual,
                    });
                }
                Err(StoreError::Storage(BackendError::Io(format!(
                    "stream head {expected_version} missing for aggregate {aggregate_id}"
                ))))
            }
        }
    }
}

fn encode_record(event: &Event) -> Result<EventRecord, StoreError> {
    let body = serde_json::to_vec(event).map_err(BackendError::from)?;
    Ok(EventRecord {
        aggregate_id: event.aggregate_id,
        sequence_number: event.sequence_number,
        event_type: event.event_type.clone(),
        body,
    })
}

fn decode_record(record: &EventRecord) -> Result<Event, StoreError> {
    Ok(serde_json::from_slice(&record.body).map_err(BackendError::from)?)
}

// ============================================================================
// Tests
// ============================================================================
