//! Persistence for the job queue system.
//!
//! [`JobStore`] and [`MetricStore`] describe what the queue needs from storage.
//! They are implemented twice: on SurrealDB through an explicit [`Database`]
//! handle, and in memory for tests.
//!
//! # Features
//!
//! - `memory` (default): embedded in-memory SurrealDB engine
//! - `rocksdb`: RocksDB for persistent file-based storage
//! - `remote`: WebSocket connection to a SurrealDB server

mod connection;
mod memory;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError};
pub use memory::{InMemoryJobStore, InMemoryMetricStore};
pub use repositories::{SurrealJobStore, SurrealMetricStore};
pub use schema::init_schema;
pub use store::{ClaimCandidate, JobStore, MetricStore};

/// Connect to the database and make sure the schema exists.
///
/// Called once at startup. A failure here should abort the process.
pub async fn init(config: &DbConfig) -> Result<Database, DbError> {
    let db = Database::connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
