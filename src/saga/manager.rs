use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::event_sourcing::core::Event;
use crate::messaging::{Command, CommandDispatcher};

use super::state::{IllegalTransition, SagaState, SagaStatus};
use super::store::{SagaStore, SagaStoreError};

// ============================================================================
// Saga Manager - Multi-Aggregate Process Orchestration
// ============================================================================
//
// Routes published events to saga implementations, persists their progress,
// and forwards compensating commands to the dispatcher on business failure.
// The manager owns orchestration only; business logic (including what
// compensation means) lives in the saga implementations.
//
// Concurrency contract: event handling for one saga id is strictly
// serialized behind a per-id async lock; distinct saga ids run fully in
// parallel. The upstream bus delivers at least once, so saga
// implementations must tolerate duplicate delivery of the same event.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// Event routed to a saga already in a terminal status. Reported, not
    /// applied.
    #[error("saga {saga_id} is already terminal ({status:?}); event {event_id} not applied")]
    TerminalViolation {
        saga_id: Uuid,
        status: SagaStatus,
        event_id: Uuid,
    },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("no saga implementation registered for type {0}")]
    UnknownSagaType(String),

    #[error("saga {saga_id} state hydration failed: {reason}")]
    Hydration { saga_id: Uuid, reason: String },

    /// A compensation step itself failed. Surfaced as-is; there is no
    /// further fallback layer.
    #[error("saga {saga_id} compensation failed while dispatching {command_type}: {reason}")]
    CompensationFailed {
        saga_id: Uuid,
        command_type: String,
        reason: String,
    },

    #[error("saga state store failure")]
    Store(#[from] SagaStoreError),
}

/// A saga implementation: a stateful, event-driven coordinator for one
/// multi-step business process.
///
/// State round-trips through `snapshot_state`/`hydrate` (a required part of
/// the interface, not an optional capability). `handle_event` must be
/// idempotent with respect to duplicate delivery of the same event; the
/// manager does not deduplicate beyond what terminal statuses prevent.
#[async_trait]
pub trait Saga: Send + Sync {
    fn saga_type(&self) -> &'static str;

    /// Restore internal state persisted by a previous `snapshot_state`.
    fn hydrate(&mut self, data: &BTreeMap<String, Value>) -> anyhow::Result<()>;

    /// Serialize internal state for persistence.
    fn snapshot_state(&self) -> BTreeMap<String, Value>;

    /// React to an event. An `Err` is a business failure and triggers
    /// compensation.
    async fn handle_event(&mut self, event: &Event) -> anyhow::Result<()>;

    /// Whether the process has run to completion.
    fn is_completed(&self) -> bool;

    /// Compensating commands undoing prior effects. The manager only routes
    /// these onward; it never executes them.
    fn compensate(&self, error: &anyhow::Error) -> Vec<Command>;
}

pub type SagaFactory = dyn Fn() -> Box<dyn Saga> + Send + Sync;

pub struct SagaManager {
    factories: RwLock<HashMap<String, Arc<SagaFactory>>>,
    store: Arc<dyn SagaStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    /// Per-saga-id serialization tokens.
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    /// Saga ids completed (and deleted) within this process: completed
    /// state records are not kept around, so rejection of late events needs
    /// this tombstone set.
    completed: Mutex<HashSet<Uuid>>,
}

impl SagaManager {
    pub fn new(store: Arc<dyn SagaStore>, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            store,
            dispatcher,
            locks: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashSet::new()),
        }
    }

    /// Register a saga implementation for a type. Expected during process
    /// initialization, before events flow.
    pub fn register(&self, saga_type: &str, factory: Arc<SagaFactory>) {
        let mut factories = self.factories.write().expect("saga registry lock poisoned");
        factories.insert(saga_type.to_string(), factory);
    }

    /// Route an event to the saga identified by `saga_id`, creating it on
    /// first sight. Returns the resulting status.
    pub async fn handle_event(
        &self,
        saga_id: Uuid,
        saga_type: &str,
        event: &Event,
    ) -> Result<SagaStatus, SagaError> {
        let token = self.serialization_token(saga_id);
        let guard = token.lock().await;

        if let Some(status) = self.terminal_status(saga_id).await? {
            // Terminal ids never mutate state again; drop the token entry
            // this lookup re-created.
            drop(guard);
            self.release_token(saga_id);
            return Err(SagaError::TerminalViolation {
                saga_id,
                status,
                event_id: event.event_id,
            });
        }

        let mut state = match self.store.get(saga_id).await? {
            Some(state) => state,
            None => SagaState::new(saga_id, saga_type),
        };

        let factory = {
            let factories = self.factories.read().expect("saga registry lock poisoned");
            factories
                .get(saga_type)
                .cloned()
                .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))?
        };

        let mut saga = factory();
        saga.hydrate(&state.data).map_err(|e| SagaError::Hydration {
            saga_id,
            reason: e.to_string(),
        })?;

        if state.status == SagaStatus::Pending {
            state.transition(SagaStatus::Waiting)?;
        }

        match saga.handle_event(event).await {
            Ok(()) => {
                state.data = saga.snapshot_state();
                if saga.is_completed() {
                    self.finish(&mut state, SagaStatus::Completed).await?;
                    tracing::info!(saga_id = %saga_id, saga_type, "Saga completed");
                    Ok(SagaStatus::Completed)
                } else {
                    state.transition(SagaStatus::Waiting)?;
                    self.store.save(&state).await?;
                    Ok(SagaStatus::Waiting)
                }
            }
            Err(business_error) => {
                tracing::warn!(
                    saga_id = %saga_id,
                    saga_type,
                    error = %business_error,
                    "Saga step failed; compensating"
                );
                self.compensate(&mut state, saga.as_ref(), &business_error)
                    .await
            }
        }
    }

    /// Route the saga's compensating commands onward and settle its final
    /// status: all dispatched cleanly resolves the process as completed,
    /// any dispatch failure marks it failed.
    async fn compensate(
        &self,
        state: &mut SagaState,
        saga: &dyn Saga,
        business_error: &anyhow::Error,
    ) -> Result<SagaStatus, SagaError> {
        state.transition(SagaStatus::Compensating)?;
        state.data = saga.snapshot_state();
        self.store.save(state).await?;

        for command in saga.compensate(business_error) {
            let command_type = command.command_type.clone();
            if let Err(dispatch_error) = self.dispatcher.dispatch(command).await {
                state.transition(SagaStatus::Failed)?;
                self.store.save(state).await?;
                self.release_token(state.saga_id);
                tracing::error!(
                    saga_id = %state.saga_id,
                    command_type = %command_type,
                    error = %dispatch_error,
                    "Compensation dispatch failed; saga failed"
                );
                return Err(SagaError::CompensationFailed {
                    saga_id: state.saga_id,
                    command_type,
                    reason: dispatch_error.to_string(),
                });
            }
        }

        self.finish(state, SagaStatus::Completed).await?;
        tracing::info!(saga_id = %state.saga_id, "Saga compensated and resolved");
        Ok(SagaStatus::Completed)
    }

    /// Complete a saga: the persisted record is deleted rather than
    /// accumulated, and the id is tombstoned so late events are rejected.
    async fn finish(&self, state: &mut SagaState, to: SagaStatus) -> Result<(), SagaError> {
        state.transition(to)?;
        self.store.delete(state.saga_id).await?;
        self.completed
            .lock()
            .expect("tombstone lock poisoned")
            .insert(state.saga_id);
        self.release_token(state.saga_id);
        Ok(())
    }

    /// Drop a terminal saga's serialization token so the lock map stays
    /// bounded by the number of in-flight sagas. Safe while the caller still
    /// holds the token: waiters keep their `Arc` clone alive, and anything
    /// arriving later is rejected by the terminal check before touching
    /// state.
    fn release_token(&self, saga_id: Uuid) {
        let mut locks = self.locks.lock().expect("saga lock map poisoned");
        locks.remove(&saga_id);
    }

    async fn terminal_status(&self, saga_id: Uuid) -> Result<Option<SagaStatus>, SagaError> {
        if self
            .completed
            .lock()
            .expect("tombstone lock poisoned")
            .contains(&saga_id)
        {
            return Ok(Some(SagaStatus::Completed));
        }
        match self.store.get(saga_id).await? {
            Some(state) if state.status.is_terminal() => Ok(Some(state.status)),
            _ => Ok(None),
        }
    }

    fn serialization_token(&self, saga_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("saga lock map poisoned");
        locks
            .entry(saga_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn token_count(&self) -> usize {
        self.locks.lock().expect("saga lock map poisoned").len()
    }
}

// ============================================================================
// Tests
// ============================================================================
