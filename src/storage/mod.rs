//! Storage backends for the monitoring pipeline
//!
//! This module provides a trait-based abstraction over the stores the
//! pipeline reads and writes: the event log, alerts, runtime settings,
//! listings, milk records, milk anomalies and monitor sessions.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Shared**: One `Arc<dyn StorageBackend>` is used by the API and the worker
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with WAL and migrations
//! - **In-Memory** (fallback): No persistence, for testing or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use dairy_monitoring::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./monitoring.db").await?;
//!     let health = backend.health_check().await?;
//!     assert!(health.healthy);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;

use crate::config::StorageConfig;

/// Shared handle to the configured backend
pub type SharedStorage = Arc<dyn StorageBackend>;

/// Build the backend selected by the hub configuration
pub async fn open(config: &StorageConfig) -> StorageResult<SharedStorage> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, records are lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "sqlite backend requested but the storage-sqlite feature is disabled".to_string(),
        )),
    }
}
