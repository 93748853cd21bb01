// ============================================================================
// event_journal - Event Sourcing Core
// ============================================================================
//
// Append-only, versioned event journal for domain aggregates:
// - Hash-chained event streams (tamper evidence)
// - Schema evolution via upcasting (old payloads, current types)
// - Snapshot-accelerated rehydration
// - Saga / process manager orchestration
//
// Generic infrastructure lives in `event_sourcing`, `snapshot`, `saga`, and
// `messaging`; `domain` holds the inventory reference domain.
//
// ============================================================================

pub mod event_sourcing;
pub mod snapshot;
pub mod saga;
pub mod messaging;
pub mod utils;
pub mod domain;
