// ============================================================================
// Event Store - Persistence Layer
// ============================================================================

pub mod backend;
pub mod event_store;

pub use backend::{
    AppendOutcome, BackendError, EventBackend, EventFilter, EventRecord, MemoryBackend,
};
pub use event_store::{EventStore, StoreError};
