//! Product store: the `productos` collection of the `Ecomerce` database,
//! reached through a pooled gateway.

mod collection;
mod gateway;
mod product;

use std::path::{Path, PathBuf};

pub use collection::{Collection, SnapshotError};
pub use gateway::{Operation, StoreConnection, StoreError, StoreGateway};
pub use product::{NewProduct, Product, ProductChanges, ProductFilter};

use thiserror::Error;

/// Where the collection lives, parsed from the store URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Snapshot(PathBuf),
}

#[derive(Debug, Error)]
pub enum StoreUriError {
    #[error("unsupported store uri {0}; expected memory:// or file://<path>")]
    UnsupportedScheme(String),
    #[error("store uri {0} is missing a file path")]
    MissingPath(String),
}

impl StoreLocation {
    pub fn parse(uri: &str) -> Result<Self, StoreUriError> {
        let trimmed = uri.trim();
        if trimmed == "memory://" || trimmed == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(path) = trimmed.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StoreUriError::MissingPath(String::from(trimmed)));
            }
            return Ok(Self::Snapshot(PathBuf::from(path)));
        }
        Err(StoreUriError::UnsupportedScheme(String::from(trimmed)))
    }

    pub fn open(&self, database: &str, collection: &str) -> Result<Collection, SnapshotError> {
        match self {
            StoreLocation::Memory => Ok(Collection::in_memory(database, collection)),
            StoreLocation::Snapshot(path) => Collection::open_snapshot(database, collection, path),
        }
    }
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid seed file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Read a JSON array of products. Any `id` fields are ignored; the store assigns ids.
pub fn load_seed_file(path: &Path) -> Result<Vec<NewProduct>, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| SeedError::Parse {
        path: path.display().to_string(),
        source,
    })
}
