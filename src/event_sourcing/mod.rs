// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure. Domain-specific code is
// in src/domain/.
//
// ============================================================================

pub mod core;
pub mod repository;
pub mod store;
pub mod upcast;

pub use core::*;
pub use repository::{Repository, RepositoryError};
pub use store::*;
pub use upcast::{JsonMap, UpcastError, UpcastFn, UpcasterRegistry};
