// ============================================================================
// Snapshot Subsystem - Bounded Replay Cost
// ============================================================================

pub mod store;
pub mod strategy;

pub use store::{MemorySnapshotStore, Snapshot, SnapshotStore, SnapshotStoreError};
pub use strategy::{EventCountStrategy, SnapshotStrategy, TimeBasedStrategy};
