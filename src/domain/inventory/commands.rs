// ============================================================================
// Inventory Commands - Represent User Intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum InventoryCommand {
    AddInventory {
        item_name: String,
        measurement: f64,
        unit: String,
        supplier: String,
    },
    ConsumeInventory {
        measurement: f64,
        reason: Option<String>,
    },
    RemoveItem {
        reason: Option<String>,
    },
}
