use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{meta, Aggregate};
use crate::event_sourcing::repository::{Repository, RepositoryError};
use crate::utils::retry::{retry_transient, IsTransient, RetryConfig};

use super::aggregate::InventoryItemAggregate;
use super::commands::InventoryCommand;
use super::errors::InventoryError;
use super::events::*;

// ============================================================================
// Inventory Command Handler
// ============================================================================
//
// Orchestrates: Command -> Aggregate -> Events -> Repository.
//
// Optimistic-concurrency conflicts are retried here, at the caller layer:
// each attempt reloads current state and replays the business operation, so
// the repository and store below stay free of retry policy.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InventoryHandlerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Domain(#[from] InventoryError),

    #[error("inventory item {0} does not exist")]
    NotFound(Uuid),
}

impl IsTransient for InventoryHandlerError {
    fn is_transient(&self) -> bool {
        match self {
            InventoryHandlerError::Repository(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub struct InventoryCommandHandler {
    repository: Arc<Repository<InventoryItemAggregate>>,
    retry: RetryConfig,
}

impl InventoryCommandHandler {
    pub fn new(repository: Arc<Repository<InventoryItemAggregate>>) -> Self {
        Self {
            repository,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Handle a command and persist resulting events. Returns the new
    /// stream version.
    pub async fn handle(
        &self,
        aggregate_id: Uuid,
        command: InventoryCommand,
        correlation_id: Uuid,
    ) -> Result<i64, InventoryHandlerError> {
        retry_transient(self.retry.clone(), |_attempt| {
            let command = command.clone();
            async move { self.handle_once(aggregate_id, &command, correlation_id).await }
        })
        .await
    }

    async fn handle_once(
        &self,
        aggregate_id: Uuid,
        command: &InventoryCommand,
        correlation_id: Uuid,
    ) -> Result<i64, InventoryHandlerError> {
        let mut metadata = BTreeMap::new();
        metadata.insert(meta::CORRELATION_ID.to_string(), correlation_id.to_string());

        if self.repository.exists(aggregate_id).await? {
            let aggregate = self.repository.load(aggregate_id).await?;
            let events = aggregate.handle_command(command)?;
            let version = self
                .repository
                .commit(aggregate_id, aggregate.version(), &events, metadata)
                .await?;
            return Ok(version);
        }

        // First command for a new item must be AddInventory.
        match command {
            InventoryCommand::AddInventory {
                item_name,
                measurement,
                unit,
                supplier,
            } => {
                if !measurement.is_finite() || *measurement <= 0.0 {
                    return Err(InventoryError::InvalidMeasurement(*measurement).into());
                }
                let event = InventoryEvent::Added(InventoryAdded {
                    item_name: item_name.clone(),
                    measurement: *measurement,
                    unit: unit.clone(),
                    supplier: supplier.clone(),
                });
                let version = self
                    .repository
                    .commit(aggregate_id, 0, &[event], metadata)
                    .await?;
                Ok(version)
            }
            _ => Err(InventoryHandlerError::NotFound(aggregate_id)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
