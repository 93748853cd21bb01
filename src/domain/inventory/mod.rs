// ============================================================================
// Inventory Domain - Business Logic for the Inventory Item Aggregate
// ============================================================================
//
// All inventory-specific code: events (with their schema history and
// upcasters), commands, errors, the aggregate, and the command handler.
// Completely separate from the generic event sourcing infrastructure.
//
// ============================================================================

pub mod aggregate;
pub mod command_handler;
pub mod commands;
pub mod errors;
pub mod events;

pub use aggregate::*;
pub use command_handler::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
