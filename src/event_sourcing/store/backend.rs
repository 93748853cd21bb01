use async_trait::async_trait;
use uuid::Uuid;
use std::collections::HashMap;
use std::sync::Mutex;

// ============================================================================
// Event Backend - The Durable Storage Collaborator
// ============================================================================
//
// The journal core consumes, but does not implement, durable storage. This
// trait is that boundary: append is atomic per call (either every record in
// the batch is durable or none is) and performs the expected-version check
// itself, so the conflict decision and the write are a single step.
//
// `MemoryBackend` is the reference implementation used by tests and
// embedded setups.
//
// ============================================================================

/// A serialized event plus the routing attributes backends filter on.
#[derive(Clone, Debug)]
pub struct EventRecord {
    pub aggregate_id: Uuid,
    pub sequence_number: i64,
    pub event_type: String,
    /// Full event serialized as JSON bytes.
    pub body: Vec<u8>,
}

/// Outcome of an append attempt.
#[derive(Debug)]
pub enum AppendOutcome {
    Appended { new_version: i64 },
    VersionConflict { actual: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend i/o failure: {0}")]
    Io(String),

    #[error("backend serialization failure")]
    Serialization(#[from] serde_json::Error),
}

/// Read filter. With `aggregate_id` set, results follow per-aggregate
/// version order; without it, global insertion order.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub aggregate_id: Option<Uuid>,
    pub event_types: Option<Vec<String>>,
    /// Exclusive lower bound on `sequence_number`.
    pub since_version: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_aggregate(aggregate_id: Uuid) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn since_version(mut self, version: i64) -> Self {
        self.since_version = Some(version);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &EventRecord) -> bool {
        if let Some(aggregate_id) = self.aggregate_id {
            if record.aggregate_id != aggregate_id {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == &record.event_type) {
                return false;
            }
        }
        if let Some(since) = self.since_version {
            if record.sequence_number <= since {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait EventBackend: Send + Sync {
    /// Append a batch to an aggregate's stream iff its current version
    /// equals `expected_version`. Atomic: partial writes are not a valid
    /// outcome.
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        records: Vec<EventRecord>,
    ) -> Result<AppendOutcome, BackendError>;

    /// Read records matching the filter, in the order documented on
    /// `EventFilter`.
    async fn read(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, BackendError>;

    /// The record at an exact stream position, if it exists.
    async fn event_at(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
    ) -> Result<Option<EventRecord>, BackendError>;

    /// Current version of an aggregate's stream (0 for a new aggregate).
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, BackendError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    /// Global log in insertion order.
    log: Vec<EventRecord>,
    /// Current version per aggregate.
    versions: HashMap<Uuid, i64>,
}

/// In-memory backend: a single lock makes each append atomic, and the log
/// preserves insertion order for cross-aggregate reads.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        records: Vec<EventRecord>,
    ) -> Result<AppendOutcome, BackendError> {
        let mut inner = self.inner.lock().expect("memory backend lock poisoned");

        let current = inner.versions.get(&aggregate_id).copied().unwrap_or(0);
        if current != expected_version {
            return Ok(AppendOutcome::VersionConflict { actual: current });
        }

        let new_version = expected_version + records.len() as i64;
        inner.log.extend(records);
        inner.versions.insert(aggregate_id, new_version);

        Ok(AppendOutcome::Appended { new_version })
    }

    async fn read(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, BackendError> {
        let inner = self.inner.lock().expect("memory backend lock poisoned");

        let mut records: Vec<EventRecord> = inner
            .log
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn event_at(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
    ) -> Result<Option<EventRecord>, BackendError> {
        let inner = self.inner.lock().expect("memory backend lock poisoned");
        Ok(inner
            .log
            .iter()
            .find(|r| r.aggregate_id == aggregate_id && r.sequence_number == sequence_number)
            .cloned())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, BackendError> {
        let inner = self.inner.lock().expect("memory backend lock poisoned");
        Ok(inner.versions.get(&aggregate_id).copied().unwrap_or(0))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(aggregate_id: Uuid, sequence: i64, event_type: &str) -> EventRecord {
        EventRecord {
            aggregate_id,
            sequence_number: sequence,
            event_type: event_type.to_string(),
            body: format!("{{\"seq\":{sequence}}}").into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_append_detects_version_conflict() {
        let backend = MemoryBackend::new();
        let aggregate_id = Uuid::new_v4();

        let outcome = backend
            .append(aggregate_id, 0, vec![record(aggregate_id, 1, "A")])
            .await
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Appended { new_version: 1 }));

        // Stale expected version loses and reports the actual one.
        let outcome = backend
            .append(aggregate_id, 0, vec![record(aggregate_id, 1, "A")])
            .await
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::VersionConflict { actual: 1 }));
    }

    #[tokio::test]
    async fn test_global_read_is_insertion_ordered() {
        let backend = MemoryBackend::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        backend.append(a, 0, vec![record(a, 1, "A")]).await.unwrap();
        backend.append(b, 0, vec![record(b, 1, "B")]).await.unwrap();
        backend.append(a, 1, vec![record(a, 2, "A")]).await.unwrap();

        let all = backend.read(&EventFilter::default()).await.unwrap();
        let order: Vec<(Uuid, i64)> = all.iter().map(|r| (r.aggregate_id, r.sequence_number)).collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);
    }

    #[tokio::test]
    async fn test_filters_apply() {
        let backend = MemoryBackend::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        backend
            .append(a, 0, vec![record(a, 1, "Added"), record(a, 2, "Consumed")])
            .await
            .unwrap();
        backend.append(b, 0, vec![record(b, 1, "Added")]).await.unwrap();

        let for_a = backend.read(&EventFilter::for_aggregate(a)).await.unwrap();
        assert_eq!(for_a.len(), 2);

        let consumed = backend
            .read(&EventFilter::for_aggregate(a).with_event_types(vec!["Consumed".into()]))
            .await
            .unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].sequence_number, 2);

        let since = backend
            .read(&EventFilter::for_aggregate(a).since_version(1))
            .await
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].sequence_number, 2);

        let limited = backend
            .read(&EventFilter::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_event_at_exact_position() {
        let backend = MemoryBackend::new();
        let a = Uuid::new_v4();

        backend
            .append(a, 0, vec![record(a, 1, "Added"), record(a, 2, "Consumed")])
            .await
            .unwrap();

        assert!(backend.event_at(a, 2).await.unwrap().is_some());
        assert!(backend.event_at(a, 3).await.unwrap().is_none());
    }
}
