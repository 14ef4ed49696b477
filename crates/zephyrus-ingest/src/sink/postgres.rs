//! PostgreSQL sink
//!
//! Each batch becomes one `INSERT ... SELECT FROM jsonb_populate_recordset`
//! statement, so the whole batch commits or fails together. Column names in
//! the target tables match the record field names.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info};

use super::{Sink, SinkError};
use crate::models::RecordBatch;

/// Table definitions for every record kind
pub const SCHEMA_SQL: &str = include_str!("../../sql/tables.sql");

#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create the record tables if they do not exist
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        debug!("Record tables ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Sink for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn flush(&self, batch: RecordBatch<'_>) -> Result<(), SinkError> {
        let table = batch.kind().table_name();
        let rows = batch
            .to_json()
            .map_err(|source| SinkError::Serialization { table, source })?;

        let statement = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_recordset(NULL::{table}, $1)"
        );
        let result = sqlx::query(&statement)
            .bind(Json(rows))
            .execute(&self.pool)
            .await
            .map_err(|source| SinkError::Database { table, source })?;

        debug!(table, rows = result.rows_affected(), "Inserted batch");
        Ok(())
    }
}
