//! In-process `productos` collection with optional JSON snapshot persistence.
//!
//! Ids come from a monotonic counter that is persisted with the documents, so
//! a deleted id is never handed out again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::product::{NewProduct, Product, ProductChanges, ProductFilter};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid snapshot {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("product id space exhausted")]
    IdsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    database: String,
    collection: String,
    next_id: u64,
    documents: Vec<Product>,
}

#[derive(Debug)]
pub struct Collection {
    database: String,
    name: String,
    documents: BTreeMap<u64, Product>,
    next_id: u64,
    snapshot_path: Option<PathBuf>,
}

impl Collection {
    pub fn in_memory(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            documents: BTreeMap::new(),
            next_id: 1,
            snapshot_path: None,
        }
    }

    /// Open a snapshot-backed collection. A missing file yields an empty collection
    /// that will be created on the first write.
    pub fn open_snapshot(
        database: impl Into<String>,
        name: impl Into<String>,
        path: &Path,
    ) -> Result<Self, SnapshotError> {
        let mut collection = Self::in_memory(database, name);
        collection.snapshot_path = Some(path.to_path_buf());

        if !path.exists() {
            info!(path = %path.display(), "no snapshot found; starting with an empty collection");
            return Ok(collection);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|source| SnapshotError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let max_id = snapshot.documents.iter().map(|p| p.id).max().unwrap_or(0);
        collection.next_id = snapshot.next_id.max(max_id.saturating_add(1)).max(1);
        collection.documents = snapshot
            .documents
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        info!(
            path = %path.display(),
            documents = collection.len(),
            next_id = collection.next_id,
            "snapshot loaded"
        );
        Ok(collection)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn find_all(&self) -> Vec<Product> {
        self.documents.values().cloned().collect()
    }

    pub fn find_one(&self, filter: &ProductFilter) -> Option<Product> {
        match filter {
            ProductFilter::Id(id) => self.documents.get(id).cloned(),
            ProductFilter::Name(_) => self.documents.values().find(|p| filter.matches(p)).cloned(),
        }
    }

    pub fn insert_one(&mut self, product: NewProduct) -> Result<Product, SnapshotError> {
        let id = self.next_id;
        let next_id = id.checked_add(1).ok_or(SnapshotError::IdsExhausted)?;
        let product = product.with_id(id);

        self.documents.insert(id, product.clone());
        self.next_id = next_id;
        if let Err(err) = self.persist() {
            self.documents.remove(&id);
            self.next_id = id;
            return Err(err);
        }

        debug!(collection = %self.name, id, "document inserted");
        Ok(product)
    }

    /// Seed an empty collection. Non-empty collections are left untouched.
    pub fn insert_many_if_empty(&mut self, products: Vec<NewProduct>) -> Result<usize, SnapshotError> {
        if !self.is_empty() {
            return Ok(0);
        }
        let count = products.len();
        let first_id = self.next_id;
        for product in products {
            let id = self.next_id;
            self.next_id = id.checked_add(1).ok_or(SnapshotError::IdsExhausted)?;
            self.documents.insert(id, product.with_id(id));
        }
        if let Err(err) = self.persist() {
            self.documents.clear();
            self.next_id = first_id;
            return Err(err);
        }
        Ok(count)
    }

    /// Returns the document as it reads after the update, when one matched.
    pub fn update_one(
        &mut self,
        id: u64,
        changes: &ProductChanges,
    ) -> Result<(UpdateOutcome, Option<Product>), SnapshotError> {
        let Some(current) = self.documents.get_mut(&id) else {
            return Ok((
                UpdateOutcome {
                    matched: 0,
                    modified: 0,
                },
                None,
            ));
        };

        let previous = current.clone();
        let modified = changes.apply_to(current);
        let updated = current.clone();

        if modified {
            if let Err(err) = self.persist() {
                self.documents.insert(id, previous);
                return Err(err);
            }
        }

        Ok((
            UpdateOutcome {
                matched: 1,
                modified: u64::from(modified),
            },
            Some(updated),
        ))
    }

    pub fn delete_one(&mut self, id: u64) -> Result<DeleteOutcome, SnapshotError> {
        let Some(removed) = self.documents.remove(&id) else {
            return Ok(DeleteOutcome { deleted: 0 });
        };

        if let Err(err) = self.persist() {
            self.documents.insert(id, removed);
            return Err(err);
        }
        Ok(DeleteOutcome { deleted: 1 })
    }

    fn persist(&self) -> Result<(), SnapshotError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            database: self.database.clone(),
            collection: self.name.clone(),
            next_id: self.next_id,
            documents: self.documents.values().cloned().collect(),
        };
        let encoded = serde_json::to_string_pretty(&snapshot)?;

        let write_err = |source| SnapshotError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        // Write-then-rename keeps the previous snapshot intact on failure.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, encoded).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }
}
