//! Persistence for snapshots, incidents, agent statistics and traces
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Batched stats**: agent statistics are accumulated in a [`StatBatch`]
//!   and written as one transaction
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with WAL and migrations
//! - **In-Memory**: No persistence, for tests and storage-less deployments
//!
//! ## Usage
//!
//! ```no_run
//! use watchpost::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./watchpost.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod error;
pub mod memory;
pub mod query;
pub mod schema;
pub mod service;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;
pub mod tree;

pub use backend::{HealthStatus, StorageBackend};
pub use batch::StatBatch;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use service::{ServiceError, StorageService};
