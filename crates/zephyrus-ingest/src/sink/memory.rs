//! In-memory sink for dry runs and tests

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{Sink, SinkError};
use crate::models::{RecordBatch, ResourceKind};

/// One batch as the sink received it
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedBatch {
    pub kind: ResourceKind,
    pub resource_ids: Vec<String>,
    /// Records serialized to a JSON array
    pub rows: Value,
}

/// Keeps every flushed batch in call order
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<FlushedBatch>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<FlushedBatch> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn batches_for(&self, kind: ResourceKind) -> Vec<FlushedBatch> {
        self.batches()
            .into_iter()
            .filter(|batch| batch.kind == kind)
            .collect()
    }

    /// Total records received for one kind
    pub fn record_count(&self, kind: ResourceKind) -> usize {
        self.batches_for(kind)
            .iter()
            .map(|batch| batch.resource_ids.len())
            .sum()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn flush(&self, batch: RecordBatch<'_>) -> Result<(), SinkError> {
        let kind = batch.kind();
        let rows = batch.to_json().map_err(|source| SinkError::Serialization {
            table: kind.table_name(),
            source,
        })?;

        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FlushedBatch {
                kind,
                resource_ids: batch.resource_ids(),
                rows,
            });
        Ok(())
    }
}
