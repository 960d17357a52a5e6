//! SurrealDB implementations of the store contracts.

mod job_repo;
mod metric_repo;

pub use job_repo::SurrealJobStore;
pub use metric_repo::SurrealMetricStore;
