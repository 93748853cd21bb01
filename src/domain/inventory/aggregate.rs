use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::event_sourcing::core::Aggregate;

use super::commands::InventoryCommand;
use super::errors::InventoryError;
use super::events::*;

// ============================================================================
// Inventory Item Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItemAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Current state (derived from events)
    pub item_name: String,
    pub on_hand: f64,
    pub unit: String,
    pub supplier: String,
    pub removed: bool,

    // Audit trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItemAggregate {
    fn require_active(&self) -> Result<(), InventoryError> {
        if self.removed {
            return Err(InventoryError::AlreadyRemoved);
        }
        Ok(())
    }

    fn validate_measurement(measurement: f64) -> Result<(), InventoryError> {
        if !measurement.is_finite() || measurement <= 0.0 {
            return Err(InventoryError::InvalidMeasurement(measurement));
        }
        Ok(())
    }
}

impl Aggregate for InventoryItemAggregate {
    type Event = InventoryEvent;
    type Command = InventoryCommand;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        "InventoryItem"
    }

    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error> {
        match event {
            InventoryEvent::Added(e) => {
                let now = Utc::now();
                Ok(Self {
                    id: aggregate_id,
                    version: 0,
                    item_name: e.item_name.clone(),
                    on_hand: e.measurement,
                    unit: e.unit.clone(),
                    supplier: e.supplier.clone(),
                    removed: false,
                    created_at: now,
                    updated_at: now,
                })
            }
            _ => Err(InventoryError::NotInitialized),
        }
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        self.updated_at = Utc::now();

        match event {
            InventoryEvent::Added(e) => {
                self.on_hand += e.measurement;
                self.supplier = e.supplier.clone();
                Ok(())
            }
            InventoryEvent::Consumed(e) => {
                self.on_hand = e.remaining;
                Ok(())
            }
            InventoryEvent::Removed(_) => {
                self.removed = true;
                Ok(())
            }
        }
    }

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::AddInventory {
                item_name,
                measurement,
                unit,
                supplier,
            } => {
                self.require_active()?;
                Self::validate_measurement(*measurement)?;
                if unit != &self.unit {
                    return Err(InventoryError::UnitMismatch {
                        expected: self.unit.clone(),
                        got: unit.clone(),
                    });
                }
                Ok(vec![InventoryEvent::Added(InventoryAdded {
                    item_name: item_name.clone(),
                    measurement: *measurement,
                    unit: unit.clone(),
                    supplier: supplier.clone(),
                })])
            }
            InventoryCommand::ConsumeInventory { measurement, reason } => {
                self.require_active()?;
                Self::validate_measurement(*measurement)?;
                if *measurement > self.on_hand {
                    return Err(InventoryError::InsufficientStock {
                        requested: *measurement,
                        available: self.on_hand,
                    });
                }
                Ok(vec![InventoryEvent::Consumed(InventoryConsumed {
                    measurement: *measurement,
                    remaining: self.on_hand - measurement,
                    reason: reason.clone(),
                })])
            }
            InventoryCommand::RemoveItem { reason } => {
                self.require_active()?;
                Ok(vec![InventoryEvent::Removed(InventoryRemoved {
                    reason: reason.clone(),
                })])
            }
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate() -> InventoryItemAggregate {
        InventoryItemAggregate::apply_first_event(
            Uuid::new_v4(),
            &InventoryEvent::Added(InventoryAdded {
                item_name: "corn".into(),
                measurement: 1000.0,
                unit: "kg".into(),
                supplier: "Acme Farms".into(),
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_first_event_must_be_added() {
        let err = InventoryItemAggregate::apply_first_event(
            Uuid::new_v4(),
            &InventoryEvent::Removed(InventoryRemoved { reason: None }),
        )
        .unwrap_err();
        assert!(matches!(err, InventoryError::NotInitialized));
    }

    #[test]
    fn test_consume_tracks_remaining_stock() {
        let mut aggregate = aggregate();

        let events = aggregate
            .handle_command(&InventoryCommand::ConsumeInventory {
                measurement: 300.0,
                reason: Some("weekly batch".into()),
            })
            .unwrap();

        match &events[0] {
            InventoryEvent::Consumed(e) => {
                assert_eq!(e.measurement, 300.0);
                assert_eq!(e.remaining, 700.0);
            }
            other => panic!("expected Consumed, got {other:?}"),
        }

        aggregate.apply_event(&events[0]).unwrap();
        assert_eq!(aggregate.on_hand, 700.0);
    }

    #[test]
    fn test_consume_rejects_overdraw() {
        let aggregate = aggregate();

        let err = aggregate
            .handle_command(&InventoryCommand::ConsumeInventory {
                measurement: 2000.0,
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                available,
                ..
            } if available == 1000.0
        ));
    }

    #[test]
    fn test_add_rejects_unit_mismatch_and_bad_measurement() {
        let aggregate = aggregate();

        let err = aggregate
            .handle_command(&InventoryCommand::AddInventory {
                item_name: "corn".into(),
                measurement: 10.0,
                unit: "lb".into(),
                supplier: "Acme Farms".into(),
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::UnitMismatch { .. }));

        let err = aggregate
            .handle_command(&InventoryCommand::ConsumeInventory {
                measurement: -5.0,
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidMeasurement(_)));
    }

    #[test]
    fn test_removed_item_accepts_no_commands() {
        let mut aggregate = aggregate();
        aggregate
            .apply_event(&InventoryEvent::Removed(InventoryRemoved { reason: None }))
            .unwrap();

        let err = aggregate
            .handle_command(&InventoryCommand::ConsumeInventory {
                measurement: 1.0,
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, InventoryError::AlreadyRemoved));
    }
}
