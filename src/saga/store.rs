use async_trait::async_trait;
use uuid::Uuid;
use std::collections::HashMap;
use std::sync::Mutex;

use super::state::SagaState;

// ============================================================================
// Saga State Store
// ============================================================================
//
// Durable persistence for saga progress. State is saved before an event is
// acknowledged, so an unpersisted event is always safe to redeliver, and
// deleted once the saga reaches a terminal status.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error("saga store failure: {0}")]
pub struct SagaStoreError(pub String);

#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError>;
    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaState>, SagaStoreError>;
    async fn delete(&self, saga_id: Uuid) -> Result<(), SagaStoreError>;
}

#[derive(Default)]
pub struct MemorySagaStore {
    states: Mutex<HashMap<Uuid, SagaState>>,
}

impl MemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for MemorySagaStore {
    async fn save(&self, state: &SagaState) -> Result<(), SagaStoreError> {
        let mut states = self.states.lock().expect("saga store lock poisoned");
        states.insert(state.saga_id, state.clone());
        Ok(())
    }

    async fn get(&self, saga_id: Uuid) -> Result<Option<SagaState>, SagaStoreError> {
        let states = self.states.lock().expect("saga store lock poisoned");
        Ok(states.get(&saga_id).cloned())
    }

    async fn delete(&self, saga_id: Uuid) -> Result<(), SagaStoreError> {
        let mut states = self.states.lock().expect("saga store lock poisoned");
        states.remove(&saga_id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
