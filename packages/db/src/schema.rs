//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Every statement is
/// `IF NOT EXISTS`, so calling it again is a no-op.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.client().query(JOB_SCHEMA).await?.check()?;
    db.client().query(METRIC_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Schemaless so payload and result objects keep their nested fields, with
/// typed columns for everything the queue filters or orders on.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS queue_name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS tenant_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS operation ON job TYPE string;
DEFINE FIELD IF NOT EXISTS priority ON job TYPE string;
DEFINE FIELD IF NOT EXISTS priority_score ON job TYPE int;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string
    ASSERT $value IN ["waiting", "active", "completed", "failed", "cancelled"];
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS started_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS completed_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS available_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS expire_at ON job TYPE datetime;
DEFINE FIELD IF NOT EXISTS retry_count ON job TYPE int;
DEFINE FIELD IF NOT EXISTS max_retries ON job TYPE int;
DEFINE FIELD IF NOT EXISTS reserved_cost ON job TYPE int;
DEFINE FIELD IF NOT EXISTS multiplier ON job TYPE number;
DEFINE FIELD IF NOT EXISTS charged_cost ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS worker_id ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS error_code ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS error_message ON job TYPE option<string>;

-- Stats by queue and state
DEFINE INDEX IF NOT EXISTS job_queue_state ON job FIELDS queue_name, state;
-- Claim order: best score first, oldest first within a score
DEFINE INDEX IF NOT EXISTS job_claim ON job FIELDS queue_name, state, priority_score, created_at;
-- Expiry sweep and retention cleanup
DEFINE INDEX IF NOT EXISTS job_state_expiry ON job FIELDS state, expire_at;
DEFINE INDEX IF NOT EXISTS job_state_finished ON job FIELDS state, completed_at;
DEFINE INDEX IF NOT EXISTS job_tenant ON job FIELDS tenant_id;
"#;

/// Metric sample table schema.
const METRIC_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS metric SCHEMALESS;

DEFINE FIELD IF NOT EXISTS metric_type ON metric TYPE string;
DEFINE FIELD IF NOT EXISTS value ON metric TYPE number;
DEFINE FIELD IF NOT EXISTS timestamp ON metric TYPE datetime;
DEFINE FIELD IF NOT EXISTS expires_at ON metric TYPE datetime;

DEFINE INDEX IF NOT EXISTS metric_type_time ON metric FIELDS metric_type, timestamp;
DEFINE INDEX IF NOT EXISTS metric_expiry ON metric FIELDS expires_at;
"#;
