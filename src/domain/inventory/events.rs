use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::event_sourcing::core::DomainEvent;
use crate::event_sourcing::upcast::{UpcastError, UpcasterRegistry};

// ============================================================================
// Inventory Events - Domain Events for the Inventory Item Aggregate
// ============================================================================
//
// `InventoryAdded` has evolved across three schema versions:
//   v1: { item_name, measurement }
//   v2: + unit      (default "kg")
//   v3: + supplier  (default "Unknown")
//
// Old payloads are never rewritten; `register_upcasters` installs the steps
// that bring stored v1/v2 payloads up to v3 at read time.
//
// ============================================================================

/// Inventory Event - union type for all inventory item events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    #[serde(rename = "InventoryAdded")]
    Added(InventoryAdded),
    #[serde(rename = "InventoryConsumed")]
    Consumed(InventoryConsumed),
    #[serde(rename = "InventoryRemoved")]
    Removed(InventoryRemoved),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::Added(_) => "InventoryAdded",
            InventoryEvent::Consumed(_) => "InventoryConsumed",
            InventoryEvent::Removed(_) => "InventoryRemoved",
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            InventoryEvent::Added(_) => 3,
            InventoryEvent::Consumed(_) => 1,
            InventoryEvent::Removed(_) => 1,
        }
    }
}

/// Stock was added for an item. Current schema: v3.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InventoryAdded {
    pub item_name: String,
    pub measurement: f64,
    pub unit: String,
    pub supplier: String,
}

/// Stock was consumed. `remaining` is the on-hand level after consumption.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InventoryConsumed {
    pub measurement: f64,
    pub remaining: f64,
    pub reason: Option<String>,
}

/// The item was removed from the inventory entirely.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InventoryRemoved {
    pub reason: Option<String>,
}

/// Install the `InventoryAdded` schema migration chain. Called once during
/// process initialization.
pub fn register_upcasters(registry: &UpcasterRegistry) -> Result<(), UpcastError> {
    registry.register(
        "InventoryAdded",
        1,
        Arc::new(|mut data| {
            data.insert("unit".to_string(), Value::from("kg"));
            Ok(data)
        }),
    )?;
    registry.register(
        "InventoryAdded",
        2,
        Arc::new(|mut data| {
            data.insert("supplier".to_string(), Value::from("Unknown"));
            Ok(data)
        }),
    )?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_payload_upcasts_to_current_schema() {
        let registry = UpcasterRegistry::new();
        register_upcasters(&registry).unwrap();

        let v1 = serde_json::json!({"item_name": "corn", "measurement": 1000.0});
        let map = match v1 {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let v3 = registry.apply("InventoryAdded", map, 1, 3).unwrap();
        assert_eq!(v3.get("item_name"), Some(&Value::from("corn")));
        assert_eq!(v3.get("measurement"), Some(&Value::from(1000.0)));
        assert_eq!(v3.get("unit"), Some(&Value::from("kg")));
        assert_eq!(v3.get("supplier"), Some(&Value::from("Unknown")));

        // The upcast payload decodes as the current struct.
        let added: InventoryAdded = serde_json::from_value(Value::Object(v3)).unwrap();
        assert_eq!(added.unit, "kg");
        assert_eq!(added.supplier, "Unknown");
    }

    #[test]
    fn test_registration_is_idempotent_per_process() {
        let registry = UpcasterRegistry::new();
        register_upcasters(&registry).unwrap();

        // A second call registers different closures on occupied keys.
        assert!(register_upcasters(&registry).is_err());
    }

    #[test]
    fn test_event_type_tags_match_serde_tags() {
        let event = InventoryEvent::Added(InventoryAdded {
            item_name: "corn".into(),
            measurement: 1.0,
            unit: "kg".into(),
            supplier: "Unknown".into(),
        });

        let tagged = serde_json::to_value(&event).unwrap();
        assert_eq!(tagged["type"], Value::from(event.event_type()));
    }
}
