// ============================================================================
// Messaging - Event Bus & Command Dispatch Boundary
// ============================================================================

pub mod bus;

pub use bus::{
    Command, CommandDispatcher, DispatchError, EventBus, EventHandler, InMemoryBus, PublishError,
    RecordingDispatcher,
};
