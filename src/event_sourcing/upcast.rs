use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::core::event::Event;

// ============================================================================
// Upcaster Registry - Schema Evolution Without Rewriting History
// ============================================================================
//
// Old stored payloads are advanced to the current schema version one step at
// a time before event reconstruction. The registry is an explicit object,
// built during process initialization and passed by reference to the event
// store and rehydration path; registration is append-only per
// (event_type, from_version) key and read-mostly afterwards.
//
// Upcasting is pure data transformation. It never touches storage, and it
// runs after hash verification on the rehydration path: hashes cover the
// payload as originally stored.
//
// ============================================================================

pub type JsonMap = serde_json::Map<String, Value>;

/// A single schema migration step: advances a payload from one version to
/// the next. Must be pure.
pub type UpcastFn = dyn Fn(JsonMap) -> Result<JsonMap, UpcastError> + Send + Sync;

/// Payload field stamped with the tracked schema version after each step.
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpcastError {
    #[error("no upcaster for {event_type} version {from}->{to}")]
    MissingStep {
        event_type: String,
        from: u32,
        to: u32,
    },

    #[error("upcaster for {event_type} version {from_version} is already registered with a different function")]
    DuplicateRegistration {
        event_type: String,
        from_version: u32,
    },

    #[error("cannot upcast {event_type} from version {from} down to {to}")]
    InvalidRange {
        event_type: String,
        from: u32,
        to: u32,
    },

    #[error("malformed payload for {event_type}: {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Registry of schema migration steps keyed by (event_type, from_version).
pub struct UpcasterRegistry {
    steps: RwLock<HashMap<(String, u32), Arc<UpcastFn>>>,
}

impl Default for UpcasterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UpcasterRegistry {
    pub fn new() -> Self {
        Self {
            steps: RwLock::new(HashMap::new()),
        }
    }

    /// Record a transformation step advancing `event_type` payloads from
    /// `from_version` to `from_version + 1`.
    ///
    /// Registration is append-only: an occupied key is rejected unless the
    /// exact same function (by `Arc` identity) is re-registered, which is an
    /// idempotent no-op.
    pub fn register(
        &self,
        event_type: &str,
        from_version: u32,
        step: Arc<UpcastFn>,
    ) -> Result<(), UpcastError> {
        let key = (event_type.to_string(), from_version);
        let mut steps = self.steps.write().expect("upcaster registry lock poisoned");

        if let Some(existing) = steps.get(&key) {
            if Arc::ptr_eq(existing, &step) {
                return Ok(());
            }
            return Err(UpcastError::DuplicateRegistration {
                event_type: event_type.to_string(),
                from_version,
            });
        }

        steps.insert(key, step);
        tracing::debug!(event_type, from_version, "Registered upcaster step");
        Ok(())
    }

    /// Advance a raw payload from `from_version` to `to_version`, one step
    /// at a time. Returns the input unchanged when the versions are equal;
    /// fails with the exact missing boundary when a step is absent, without
    /// producing partial output.
    pub fn apply(
        &self,
        event_type: &str,
        payload: JsonMap,
        from_version: u32,
        to_version: u32,
    ) -> Result<JsonMap, UpcastError> {
        if from_version == to_version {
            return Ok(payload);
        }
        if from_version > to_version {
            return Err(UpcastError::InvalidRange {
                event_type: event_type.to_string(),
                from: from_version,
                to: to_version,
            });
        }

        let mut data = payload;
        let mut version = from_version;

        while version < to_version {
            let step = {
                let steps = self.steps.read().expect("upcaster registry lock poisoned");
                steps.get(&(event_type.to_string(), version)).cloned()
            };

            let step = step.ok_or_else(|| UpcastError::MissingStep {
                event_type: event_type.to_string(),
                from: version,
                to: version + 1,
            })?;

            data = step(data)?;
            version += 1;
            data.insert(SCHEMA_VERSION_FIELD.to_string(), Value::from(version));
        }

        Ok(data)
    }

    /// The highest version reachable from `from_version` through registered
    /// steps. This is the "current" version from the registry's view.
    pub fn latest_version(&self, event_type: &str, from_version: u32) -> u32 {
        let steps = self.steps.read().expect("upcaster registry lock poisoned");
        let mut version = from_version;
        while steps.contains_key(&(event_type.to_string(), version)) {
            version += 1;
        }
        version
    }

    /// Materialize a current-schema view of a stored event.
    ///
    /// The returned event carries the upcast payload and schema version;
    /// its hash fields still describe the record as originally stored.
    pub fn upcast_event(&self, event: &Event) -> Result<Event, UpcastError> {
        let target = self.latest_version(&event.event_type, event.schema_version);
        if target == event.schema_version {
            return Ok(event.clone());
        }

        let payload = match &event.payload {
            Value::Object(map) => map.clone(),
            other => {
                return Err(UpcastError::MalformedPayload {
                    event_type: event.event_type.clone(),
                    reason: format!("expected object payload, found {other}"),
                })
            }
        };

        let upcast = self.apply(&event.event_type, payload, event.schema_version, target)?;

        let mut materialized = event.clone();
        materialized.schema_version = target;
        materialized.payload = Value::Object(upcast);
        Ok(materialized)
    }
}

// ============================================================================
// Tests
// ============================================================================
