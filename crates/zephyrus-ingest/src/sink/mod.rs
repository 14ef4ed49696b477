//! Persistence sinks
//!
//! A [`Sink`] receives one flushed batch at a time. Each call is one bulk
//! unit: either every record in the batch is persisted or the call fails and
//! the accumulator keeps the batch for a later retry.

mod csv;
mod memory;
#[cfg(feature = "database")]
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{RecordBatch, ResourceKind};

pub use self::csv::CsvSink;
pub use self::memory::{FlushedBatch, MemorySink};
#[cfg(feature = "database")]
pub use self::postgres::PostgresSink;

/// A persistence failure. Always fatal to the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error writing {table}: {source}")]
    Io {
        table: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV encoding error for {table}: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: ::csv::Error,
    },

    #[error("serialization error for {table}: {source}")]
    Serialization {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "database")]
    #[error("database error for {table}: {source}")]
    Database {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("sink rejected {kind} batch: {message}")]
    Rejected { kind: ResourceKind, message: String },
}

impl SinkError {
    pub fn rejected(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            message: message.into(),
        }
    }
}

/// Bulk persistence target for flushed batches.
///
/// Called concurrently by accumulators of different kinds; never concurrently
/// for the same kind.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Persist one batch as a single unit
    async fn flush(&self, batch: RecordBatch<'_>) -> Result<(), SinkError>;
}
