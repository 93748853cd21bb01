use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::event_sourcing::core::Event;

// ============================================================================
// Messaging Boundary - Event Bus & Command Dispatch
// ============================================================================
//
// The core consumes, but does not implement, transport. The bus contract is
// at-least-once delivery: handlers (and sagas behind them) must tolerate
// duplicate delivery of the same event. Command dispatch is the outbound
// path used by saga compensation and process-manager steps.
//
// `InMemoryBus` and the recording dispatcher cover tests and embedded use.
//
// ============================================================================

/// An instruction routed onward to a command handler. The core only carries
/// these; it never executes them.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Command {
    pub command_type: String,
    pub aggregate_id: Uuid,
    pub payload: Value,
    pub metadata: BTreeMap<String, String>,
}

impl Command {
    pub fn new(command_type: impl Into<String>, aggregate_id: Uuid, payload: Value) -> Self {
        Self {
            command_type: command_type.into(),
            aggregate_id,
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

#[derive(Debug, thiserror::Error)]
#[error("command dispatch failed: {0}")]
pub struct DispatchError(pub String);

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), PublishError>;

    /// Subscribe a handler to an event type, or to every event with `"*"`.
    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);
}

#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError>;
}

// ============================================================================
// In-Memory Bus
// ============================================================================

/// In-process bus delivering synchronously to subscribed handlers.
///
/// Handler failures are logged, not propagated: at-least-once redelivery is
/// the producing side's job, and the published log lets tests assert on it.
#[derive(Default)]
pub struct InMemoryBus {
    handlers: Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    published: Mutex<Vec<Event>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, in publish order.
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().expect("bus lock poisoned").clone()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: &Event) -> Result<(), PublishError> {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.handlers.lock().expect("bus lock poisoned");
            let mut matched = Vec::new();
            if let Some(typed) = map.get(&event.event_type) {
                matched.extend(typed.iter().cloned());
            }
            if let Some(wildcard) = map.get("*") {
                matched.extend(wildcard.iter().cloned());
            }
            matched
        };

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Event handler failed; event remains eligible for redelivery"
                );
            }
        }

        self.published
            .lock()
            .expect("bus lock poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut map = self.handlers.lock().expect("bus lock poisoned");
        map.entry(event_type.to_string()).or_default().push(handler);
    }
}

/// Dispatcher that records commands for assertions; optionally fails every
/// dispatch to exercise compensation failure paths.
#[derive(Default)]
pub struct RecordingDispatcher {
    commands: Mutex<Vec<Command>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("dispatcher lock poisoned").clone()
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError(format!(
                "dispatcher configured to fail (command {})",
                command.command_type
            )));
        }
        self.commands
            .lock()
            .expect("dispatcher lock poisoned")
            .push(command);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::EventDraft;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting(AtomicU32);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(event_type: &str) -> Event {
        EventDraft::new(event_type, 1, serde_json::json!({})).seal(Uuid::new_v4(), 1, None)
    }

    #[tokio::test]
    async fn test_typed_and_wildcard_subscriptions() {
        let bus = InMemoryBus::new();
        let typed = Arc::new(Counting(AtomicU32::new(0)));
        let wildcard = Arc::new(Counting(AtomicU32::new(0)));

        bus.subscribe("InventoryAdded", typed.clone()).await;
        bus.subscribe("*", wildcard.clone()).await;

        bus.publish(&event("InventoryAdded")).await.unwrap();
        bus.publish(&event("InventoryConsumed")).await.unwrap();

        assert_eq!(typed.0.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.0.load(Ordering::SeqCst), 2);
        assert_eq!(bus.published().len(), 2);
    }

    #[tokio::test]
    async fn test_recording_dispatcher_modes() {
        let ok = RecordingDispatcher::new();
        ok.dispatch(Command::new("Do", Uuid::new_v4(), serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(ok.commands().len(), 1);

        let failing = RecordingDispatcher::failing();
        assert!(failing
            .dispatch(Command::new("Do", Uuid::new_v4(), serde_json::json!({})))
            .await
            .is_err());
    }
}
