// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Generic, reusable event sourcing infrastructure that works with any
// domain aggregate. No domain-specific code lives here.
//
// ============================================================================

pub mod aggregate;
pub mod event;
pub mod hash;

pub use aggregate::Aggregate;
pub use event::{encode_payload, meta, DomainEvent, Event, EventDraft};
pub use hash::{compute_event_hash, verify_stream_integrity, IntegrityError};
