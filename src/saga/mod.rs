// ============================================================================
// Saga / Process Manager
// ============================================================================

pub mod manager;
pub mod state;
pub mod store;

pub use manager::{Saga, SagaError, SagaFactory, SagaManager};
pub use state::{IllegalTransition, SagaState, SagaStatus};
pub use store::{MemorySagaStore, SagaStore, SagaStoreError};
