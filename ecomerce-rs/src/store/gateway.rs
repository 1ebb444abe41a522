//! Store gateway: a bounded pool of connections to the product collection.
//!
//! A [`StoreConnection`] owns a pool permit for as long as it lives. Returning it
//! through [`StoreGateway::disconnect`] or simply dropping it gives the permit back,
//! so a request releases its connection on every exit path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, warn};

use super::collection::{Collection, DeleteOutcome, SnapshotError, UpdateOutcome};
use super::product::{NewProduct, Product, ProductChanges, ProductFilter};

/// The single logical operation a handler runs against the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FindMany,
    FindOne,
    InsertOne,
    UpdateOne,
    DeleteOne,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::FindMany => "find",
            Operation::FindOne => "findOne",
            Operation::InsertOne => "insertOne",
            Operation::UpdateOne => "updateOne",
            Operation::DeleteOne => "deleteOne",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not connect to the product store: {0}")]
    Connection(String),
    #[error("{operation} failed on collection {collection}: {source}")]
    Operation {
        operation: Operation,
        collection: String,
        source: SnapshotError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: usize,
    pub in_use: usize,
    pub checkouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    checkouts: AtomicU64,
    next_connection_id: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct StoreGateway {
    collection: Arc<RwLock<Collection>>,
    permits: Arc<Semaphore>,
    pool_size: usize,
    acquire_timeout: Duration,
    counters: Arc<Counters>,
}

impl StoreGateway {
    pub fn new(collection: Collection, pool_size: usize, acquire_timeout: Duration) -> Self {
        Self {
            collection: Arc::new(RwLock::new(collection)),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            acquire_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Check a connection out of the pool.
    pub async fn connect(&self) -> Result<StoreConnection, StoreError> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match tokio::time::timeout(self.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                warn!("store connection refused; gateway is closed");
                return Err(StoreError::Connection(String::from("store is closed")));
            }
            Err(_elapsed) => {
                warn!(
                    timeout_ms = self.acquire_timeout.as_millis(),
                    pool_size = self.pool_size,
                    "timed out waiting for a store connection"
                );
                return Err(StoreError::Connection(format!(
                    "no connection available within {}",
                    humantime::format_duration(self.acquire_timeout)
                )));
            }
        };

        self.counters.checkouts.fetch_add(1, Ordering::Relaxed);
        let id = self.counters.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(connection = id, "store connection checked out");

        Ok(StoreConnection {
            id,
            collection: Arc::clone(&self.collection),
            _permit: permit,
        })
    }

    /// Give a connection back to the pool.
    pub fn disconnect(&self, connection: StoreConnection) {
        let id = connection.id;
        drop(connection);
        debug!(connection = id, "store connection released");
    }

    /// Refuse new connections. Outstanding ones stay valid until released.
    pub fn close(&self) {
        self.permits.close();
        debug!("store gateway closed");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.pool_size,
            in_use: self.pool_size.saturating_sub(self.permits.available_permits()),
            checkouts: self.counters.checkouts.load(Ordering::Relaxed),
        }
    }

    /// Insert seed documents when the collection is empty. Runs outside the pool.
    pub async fn seed(&self, products: Vec<NewProduct>) -> Result<usize, StoreError> {
        let mut collection = self.collection.write().await;
        let name = collection.name().to_string();
        collection
            .insert_many_if_empty(products)
            .map_err(|source| StoreError::Operation {
                operation: Operation::InsertOne,
                collection: name,
                source,
            })
    }
}

/// A checked-out connection. Dropping it returns the permit to the pool.
pub struct StoreConnection {
    id: u64,
    collection: Arc<RwLock<Collection>>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl StoreConnection {
    pub async fn find_all(&self) -> Result<Vec<Product>, StoreError> {
        let collection = self.collection.read().await;
        let products = collection.find_all();
        debug!(
            connection = self.id,
            database = %collection.database(),
            collection = %collection.name(),
            count = products.len(),
            "find"
        );
        Ok(products)
    }

    pub async fn find_one(&self, filter: &ProductFilter) -> Result<Option<Product>, StoreError> {
        let collection = self.collection.read().await;
        let found = collection.find_one(filter);
        debug!(
            connection = self.id,
            filter = %filter,
            found = found.is_some(),
            "findOne"
        );
        Ok(found)
    }

    pub async fn insert_one(&self, product: NewProduct) -> Result<Product, StoreError> {
        let mut collection = self.collection.write().await;
        match collection.insert_one(product) {
            Ok(inserted) => {
                debug!(connection = self.id, id = inserted.id, "insertOne");
                Ok(inserted)
            }
            Err(source) => Err(operation_failed(Operation::InsertOne, &collection, source)),
        }
    }

    pub async fn update_one(
        &self,
        id: u64,
        changes: &ProductChanges,
    ) -> Result<(UpdateOutcome, Option<Product>), StoreError> {
        let mut collection = self.collection.write().await;
        match collection.update_one(id, changes) {
            Ok((outcome, updated)) => {
                debug!(
                    connection = self.id,
                    id,
                    matched = outcome.matched,
                    modified = outcome.modified,
                    "updateOne"
                );
                Ok((outcome, updated))
            }
            Err(source) => Err(operation_failed(Operation::UpdateOne, &collection, source)),
        }
    }

    pub async fn delete_one(&self, id: u64) -> Result<DeleteOutcome, StoreError> {
        let mut collection = self.collection.write().await;
        match collection.delete_one(id) {
            Ok(outcome) => {
                debug!(connection = self.id, id, deleted = outcome.deleted, "deleteOne");
                Ok(outcome)
            }
            Err(source) => Err(operation_failed(Operation::DeleteOne, &collection, source)),
        }
    }
}

fn operation_failed(operation: Operation, collection: &Collection, source: SnapshotError) -> StoreError {
    error!(
        operation = %operation,
        collection = %collection.name(),
        error = %source,
        "store operation failed"
    );
    StoreError::Operation {
        operation,
        collection: collection.name().to_string(),
        source,
    }
}
