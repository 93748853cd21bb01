use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::event_sourcing::core::Event;
use crate::messaging::{Command, CommandDispatcher};
use crate::saga::Saga;

// ============================================================================
// Replenishment Saga
// ============================================================================
//
// Watches one inventory item's events and drives restocking:
//
//   InventoryConsumed below threshold -> place a supplier order
//   InventoryAdded while an order is outstanding -> restock arrived, done
//   InventoryRemoved while an order is outstanding -> business failure;
//       compensation cancels the supplier order
//
// Saga id convention: the inventory item's aggregate id.
//
// ============================================================================

pub const REPLENISHMENT_SAGA: &str = "Replenishment";

pub struct ReplenishmentSaga {
    dispatcher: Arc<dyn CommandDispatcher>,
    /// On-hand level below which a supplier order is placed.
    threshold: f64,

    // Durable state
    order_id: Option<Uuid>,
    resolved: bool,
    handled: Vec<Uuid>,
}

impl ReplenishmentSaga {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, threshold: f64) -> Self {
        Self {
            dispatcher,
            threshold,
            order_id: None,
            resolved: false,
            handled: Vec::new(),
        }
    }

    async fn on_consumed(&mut self, event: &Event) -> anyhow::Result<()> {
        let remaining = event.payload["remaining"]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("InventoryConsumed payload missing remaining"))?;

        if remaining >= self.threshold || self.order_id.is_some() {
            return Ok(());
        }

        let order_id = Uuid::new_v4();
        self.dispatcher
            .dispatch(
                Command::new(
                    "PlaceSupplierOrder",
                    event.aggregate_id,
                    serde_json::json!({
                        "order_id": order_id,
                        "remaining": remaining,
                    }),
                )
                .with_metadata("saga_type", REPLENISHMENT_SAGA),
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to place supplier order: {e}"))?;

        self.order_id = Some(order_id);
        tracing::info!(
            aggregate_id = %event.aggregate_id,
            order_id = %order_id,
            remaining,
            "Placed supplier order"
        );
        Ok(())
    }
}

#[async_trait]
impl Saga for ReplenishmentSaga {
    fn saga_type(&self) -> &'static str {
        REPLENISHMENT_SAGA
    }

    fn hydrate(&mut self, data: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        if let Some(Value::String(order_id)) = data.get("order_id") {
            self.order_id = Some(Uuid::parse_str(order_id)?);
        }
        if let Some(Value::Bool(resolved)) = data.get("resolved") {
            self.resolved = *resolved;
        }
        if let Some(Value::Array(handled)) = data.get("handled") {
            self.handled = handled
                .iter()
                .filter_map(|v| v.as_str())
                .map(Uuid::parse_str)
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    fn snapshot_state(&self) -> BTreeMap<String, Value> {
        let mut data = BTreeMap::new();
        if let Some(order_id) = self.order_id {
            data.insert("order_id".to_string(), Value::String(order_id.to_string()));
        }
        data.insert("resolved".to_string(), Value::Bool(self.resolved));
        data.insert(
            "handled".to_string(),
            Value::Array(
                self.handled
                    .iter()
                    .map(|id| Value::String(id.to_string()))
                    .collect(),
            ),
        );
        data
    }

    async fn handle_event(&mut self, event: &Event) -> anyhow::Result<()> {
        // At-least-once delivery: a redelivered event is a no-op.
        if self.handled.contains(&event.event_id) {
            return Ok(());
        }

        match event.event_type.as_str() {
            "InventoryConsumed" => self.on_consumed(event).await?,
            "InventoryAdded" => {
                if self.order_id.is_some() {
                    self.resolved = true;
                }
            }
            "InventoryRemoved" => {
                if self.order_id.is_some() {
                    anyhow::bail!("item removed while a replenishment order is outstanding");
                }
                self.resolved = true;
            }
            _ => {}
        }

        self.handled.push(event.event_id);
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.resolved
    }

    fn compensate(&self, _error: &anyhow::Error) -> Vec<Command> {
        match self.order_id {
            Some(order_id) => vec![Command::new(
                "CancelSupplierOrder",
                order_id,
                serde_json::json!({"order_id": order_id}),
            )],
            None => Vec::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::*;
    use crate::event_sourcing::core::{DomainEvent, EventDraft};
    use crate::event_sourcing::store::{EventStore, MemoryBackend};
    use crate::event_sourcing::upcast::UpcasterRegistry;
    use crate::messaging::{EventBus, EventHandler, InMemoryBus, RecordingDispatcher};
    use crate::saga::{MemorySagaStore, SagaManager, SagaStatus};

    fn manager(dispatcher: Arc<RecordingDispatcher>) -> SagaManager {
        let manager = SagaManager::new(Arc::new(MemorySagaStore::new()), dispatcher.clone());
        manager.register(
            REPLENISHMENT_SAGA,
            Arc::new(move || {
                Box::new(ReplenishmentSaga::new(dispatcher.clone(), 100.0)) as Box<dyn Saga>
            }),
        );
        manager
    }

    fn sealed(aggregate_id: Uuid, sequence: i64, event: &InventoryEvent) -> Event {
        EventDraft::from_domain(event)
            .unwrap()
            .seal(aggregate_id, sequence, None)
    }

    fn consumed(aggregate_id: Uuid, sequence: i64, remaining: f64) -> Event {
        sealed(
            aggregate_id,
            sequence,
            &InventoryEvent::Consumed(InventoryConsumed {
                measurement: 10.0,
                remaining,
                reason: None,
            }),
        )
    }

    fn added(aggregate_id: Uuid, sequence: i64) -> Event {
        sealed(
            aggregate_id,
            sequence,
            &InventoryEvent::Added(InventoryAdded {
                item_name: "corn".into(),
                measurement: 500.0,
                unit: "kg".into(),
                supplier: "Acme Farms".into(),
            }),
        )
    }

    #[tokio::test]
    async fn test_low_stock_places_order_and_restock_completes() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let manager = manager(dispatcher.clone());
        let item_id = Uuid::new_v4();

        // Above threshold: nothing ordered.
        let status = manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &consumed(item_id, 2, 400.0))
            .await
            .unwrap();
        assert_eq!(status, SagaStatus::Waiting);
        assert!(dispatcher.commands().is_empty());

        // Below threshold: supplier order goes out.
        let status = manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &consumed(item_id, 3, 50.0))
            .await
            .unwrap();
        assert_eq!(status, SagaStatus::Waiting);
        let commands = dispatcher.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, "PlaceSupplierOrder");
        assert_eq!(commands[0].aggregate_id, item_id);

        // Only one order even if stock keeps dropping.
        manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &consumed(item_id, 4, 20.0))
            .await
            .unwrap();
        assert_eq!(dispatcher.commands().len(), 1);

        // Restock arrival completes the saga.
        let status = manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &added(item_id, 5))
            .await
            .unwrap();
        assert_eq!(status, SagaStatus::Completed);
    }

    #[tokio::test]
    async fn test_removal_mid_order_compensates_with_cancel() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let manager = manager(dispatcher.clone());
        let item_id = Uuid::new_v4();

        manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &consumed(item_id, 2, 50.0))
            .await
            .unwrap();

        let removed = sealed(
            item_id,
            3,
            &InventoryEvent::Removed(InventoryRemoved {
                reason: Some("discontinued".into()),
            }),
        );
        let status = manager
            .handle_event(item_id, REPLENISHMENT_SAGA, &removed)
            .await
            .unwrap();

        assert_eq!(status, SagaStatus::Completed);
        let commands = dispatcher.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_type, "PlaceSupplierOrder");
        assert_eq!(commands[1].command_type, "CancelSupplierOrder");
    }

    /// Forwards published inventory events into the saga manager, keyed by
    /// the aggregate id.
    struct SagaRouter {
        manager: Arc<SagaManager>,
    }

    #[async_trait]
    impl EventHandler for SagaRouter {
        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            self.manager
                .handle_event(event.aggregate_id, REPLENISHMENT_SAGA, event)
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_from_append_to_supplier_order() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dispatcher = Arc::new(RecordingDispatcher::new());
        let saga_manager = Arc::new(manager(dispatcher.clone()));

        let bus = Arc::new(InMemoryBus::new());
        bus.subscribe("*", Arc::new(SagaRouter { manager: saga_manager }))
            .await;

        let registry = Arc::new(UpcasterRegistry::new());
        register_upcasters(&registry).unwrap();
        let store = EventStore::new(Arc::new(MemoryBackend::new()), registry).with_bus(bus.clone());

        let item_id = Uuid::new_v4();
        let add = InventoryEvent::Added(InventoryAdded {
            item_name: "corn".into(),
            measurement: 120.0,
            unit: "kg".into(),
            supplier: "Acme Farms".into(),
        });
        let consume = InventoryEvent::Consumed(InventoryConsumed {
            measurement: 80.0,
            remaining: 40.0,
            reason: None,
        });

        store
            .append(item_id, 0, vec![EventDraft::from_domain(&add).unwrap()])
            .await
            .unwrap();
        store
            .append(item_id, 1, vec![EventDraft::from_domain(&consume).unwrap()])
            .await
            .unwrap();

        assert_eq!(bus.published().len(), 2);
        let commands = dispatcher.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, "PlaceSupplierOrder");
        assert_eq!(commands[0].aggregate_id, item_id);
        assert_eq!(consume.event_type(), "InventoryConsumed");
    }
}
