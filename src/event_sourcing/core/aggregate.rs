use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;
use anyhow::Result;

use super::event::{DomainEvent, Event};

// ============================================================================
// Aggregate Root - Event Sourcing Core
// ============================================================================
//
// State is derived from events, never stored directly. The event set is a
// closed enum matched exhaustively in `apply_event`, so an unhandled event
// type is a compile error rather than a silent no-op at runtime.
//
// Serde bounds exist so snapshots can capture and restore aggregate state
// without a per-aggregate serialization shim.
//
// ============================================================================

/// Trait for event-sourced aggregates.
pub trait Aggregate: Sized + Send + Sync + Serialize + DeserializeOwned {
    type Event: DomainEvent;
    type Command;
    type Error: std::fmt::Display;

    /// Stable name of this aggregate kind, e.g. "InventoryItem".
    fn aggregate_type() -> &'static str;

    /// Create the aggregate from the first event in its stream.
    fn apply_first_event(aggregate_id: Uuid, event: &Self::Event) -> Result<Self, Self::Error>;

    /// Apply a subsequent event to update state.
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Validate a command against current state and emit the resulting
    /// events (business logic; no side effects).
    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    fn aggregate_id(&self) -> Uuid;

    /// Current stream version (sequence number of the last applied event).
    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Reconstruct the aggregate by folding a verified, upcast event stream.
    fn load_from_events(events: &[Event]) -> Result<Self> {
        let first = events
            .first()
            .ok_or_else(|| anyhow::anyhow!("cannot load aggregate from empty event list"))?;

        let first_domain: Self::Event = first
            .to_domain()
            .map_err(|e| anyhow::anyhow!("failed to decode first event {}: {}", first.event_id, e))?;

        let mut aggregate = Self::apply_first_event(first.aggregate_id, &first_domain)
            .map_err(|e| anyhow::anyhow!("failed to apply first event: {}", e))?;
        aggregate.set_version(first.sequence_number);

        for event in &events[1..] {
            let domain: Self::Event = event
                .to_domain()
                .map_err(|e| anyhow::anyhow!("failed to decode event {}: {}", event.event_id, e))?;
            aggregate
                .apply_event(&domain)
                .map_err(|e| anyhow::anyhow!("failed to apply event {}: {}", event.event_id, e))?;
            aggregate.set_version(event.sequence_number);
        }

        Ok(aggregate)
    }
}
