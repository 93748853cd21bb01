// ============================================================================
// Inventory Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("aggregate not initialized")]
    NotInitialized,

    #[error("item has already been removed")]
    AlreadyRemoved,

    #[error("invalid measurement: {0}")]
    InvalidMeasurement(f64),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: f64, available: f64 },

    #[error("unit mismatch: item is tracked in {expected}, got {got}")]
    UnitMismatch { expected: String, got: String },
}
