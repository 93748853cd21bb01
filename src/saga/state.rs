use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// ============================================================================
// Saga State Machine
// ============================================================================
//
// Status transitions are monotonic along a fixed graph:
//
//     pending -> waiting -> waiting (more events)
//     waiting -> completed
//     waiting -> compensating -> completed | failed
//
// `completed` and `failed` are terminal: once reached, no further event
// application is permitted for that saga id.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Waiting,
    Completed,
    Failed,
    Compensating,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        use SagaStatus::*;
        matches!(
            (self, next),
            (Pending, Waiting)
                | (Waiting, Waiting)
                | (Waiting, Completed)
                | (Waiting, Compensating)
                | (Compensating, Completed)
                | (Compensating, Failed)
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal saga status transition {from:?} -> {to:?} for saga {saga_id}")]
pub struct IllegalTransition {
    pub saga_id: Uuid,
    pub from: SagaStatus,
    pub to: SagaStatus,
}

/// Durable progress record for one saga instance.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SagaState {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub status: SagaStatus,
    /// Opaque key-value state owned by the saga implementation.
    pub data: BTreeMap<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// Initial state for a first-seen saga id.
    pub fn new(saga_id: Uuid, saga_type: impl Into<String>) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            status: SagaStatus::Pending,
            data: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn transition(&mut self, to: SagaStatus) -> Result<(), IllegalTransition> {
        if !self.status.can_transition_to(to) {
            return Err(IllegalTransition {
                saga_id: self.saga_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
