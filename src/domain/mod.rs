// ============================================================================
// Domain Layer
// ============================================================================
//
// Business-specific code built on top of the generic event sourcing
// infrastructure: the inventory aggregate and the replenishment saga
// that reacts to its events.
//
// ============================================================================

pub mod inventory;
pub mod replenishment;
