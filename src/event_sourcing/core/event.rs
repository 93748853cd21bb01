use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::hash::compute_event_hash;

// ============================================================================
// Event Model - The Immutable Unit of Fact
// ============================================================================
//
// An `Event` is a fact that has happened to exactly one aggregate. It is
// sealed by the event store at append time: the store assigns the stream
// position and the chain linkage, then computes the content hash. Callers
// build an `EventDraft` and never touch chain fields themselves.
//
// ============================================================================

/// Well-known metadata keys.
pub mod meta {
    /// Groups related events across aggregates.
    pub const CORRELATION_ID: &str = "correlation_id";
    /// The command or event that caused this event.
    pub const CAUSATION_ID: &str = "causation_id";
}

/// A sealed, hash-chained event as it exists in a stream.
///
/// Immutable once sealed: `event_hash` is a pure function of every other
/// field, and `previous_hash` links to the prior event in the same
/// aggregate's stream (`None` only for the first event).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Event {
    // Identity
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    // Type information
    pub event_type: String,
    pub schema_version: u32,

    // Chain fields
    pub previous_hash: Option<String>,
    pub event_hash: String,

    // Timing
    pub timestamp: DateTime<Utc>,

    // Ordered metadata (correlation/causation ids live here)
    pub metadata: BTreeMap<String, String>,

    // Event-specific payload fields as a JSON object
    pub payload: Value,
}

impl Event {
    /// Decode the payload into a typed domain event.
    ///
    /// The payload must already be at the type's current schema version
    /// (reads through the event store upcast before handing events out).
    pub fn to_domain<E: DomainEvent>(&self) -> Result<E, serde_json::Error> {
        let tagged = serde_json::json!({
            "type": self.event_type,
            "data": self.payload,
        });
        serde_json::from_value(tagged)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(meta::CORRELATION_ID).map(String::as_str)
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.metadata.get(meta::CAUSATION_ID).map(String::as_str)
    }
}

/// A caller-built event awaiting its stream position.
///
/// Carries everything except the chain fields, which only the event store
/// may assign.
#[derive(Clone, Debug)]
pub struct EventDraft {
    pub event_id: Uuid,
    pub event_type: String,
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, schema_version: u32, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            schema_version,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            payload,
        }
    }

    /// Build a draft from a typed domain event.
    pub fn from_domain<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        let payload = encode_payload(event)?;
        Ok(Self::new(event.event_type(), event.schema_version(), payload))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation(self, correlation_id: Uuid) -> Self {
        self.with_metadata(meta::CORRELATION_ID, correlation_id.to_string())
    }

    pub fn with_causation(self, causation_id: Uuid) -> Self {
        self.with_metadata(meta::CAUSATION_ID, causation_id.to_string())
    }

    /// Seal the draft into a chained event. Called by the event store only;
    /// `sequence_number` and `previous_hash` come from the stream head.
    pub(crate) fn seal(
        self,
        aggregate_id: Uuid,
        sequence_number: i64,
        previous_hash: Option<String>,
    ) -> Event {
        let mut event = Event {
            event_id: self.event_id,
            aggregate_id,
            sequence_number,
            event_type: self.event_type,
            schema_version: self.schema_version,
            previous_hash,
            event_hash: String::new(),
            timestamp: self.timestamp,
            metadata: self.metadata,
            payload: self.payload,
        };
        event.event_hash = compute_event_hash(&event);
        event
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Trait for closed sets of domain events.
///
/// Implementors are adjacently tagged serde enums whose tag strings equal
/// the stable `event_type` returned here, so that payloads round-trip
/// through storage with the type tag kept in its own column.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Stable type tag for this event (not the runtime type name).
    fn event_type(&self) -> &'static str;

    /// Current schema version of this event type's payload.
    fn schema_version(&self) -> u32;
}

/// Split a tagged domain event into its bare payload object.
pub fn encode_payload<E: DomainEvent>(event: &E) -> Result<Value, serde_json::Error> {
    let tagged = serde_json::to_value(event)?;
    match tagged {
        Value::Object(mut obj) => {
            Ok(obj.remove("data").unwrap_or(Value::Object(Default::default())))
        }
        other => Ok(other),
    }
}

// ============================================================================
// Tests
// ============================================================================
