//! Flat-file sink: one CSV file per table
//!
//! The first flush of a table in a run truncates its file and writes the
//! header row; later flushes append rows only. A write that fails part way
//! is cut back to the file's previous length.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ::csv::WriterBuilder;
use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Sink, SinkError};
use crate::models::{RecordBatch, ResourceKind};

#[derive(Debug)]
pub struct CsvSink {
    output_dir: PathBuf,
    started: Mutex<HashSet<ResourceKind>>,
}

impl CsvSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            started: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the file a kind is written to
    pub fn table_path(&self, kind: ResourceKind) -> PathBuf {
        self.output_dir.join(format!("{}.csv", kind.table_name()))
    }

    /// Marks the table as started; true if this is its first flush
    fn begin(&self, kind: ResourceKind) -> bool {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind)
    }

    fn reset(&self, kind: ResourceKind) {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }

    async fn write(&self, path: &Path, bytes: &[u8], truncate: bool) -> io::Result<()> {
        fs::create_dir_all(&self.output_dir).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(truncate)
            .append(!truncate)
            .open(path)
            .await?;
        let committed = file.metadata().await?.len();

        let written = write_rows(&mut file, bytes).await;
        restore_on_failure(&file, committed, written).await
    }
}

async fn write_rows(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

/// Cut the file back to its committed length after a failed write
async fn restore_on_failure(file: &File, committed: u64, written: io::Result<()>) -> io::Result<()> {
    let Err(e) = written else {
        return Ok(());
    };
    if let Err(restore) = file.set_len(committed).await {
        warn!(error = %restore, committed, "Failed to remove partial CSV rows");
    }
    Err(e)
}

fn encode<R: Serialize>(records: &[R], header: bool) -> Result<Vec<u8>, ::csv::Error> {
    let mut writer = WriterBuilder::new()
        .has_headers(header)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| ::csv::Error::from(e.into_error()))
}

fn encode_batch(batch: &RecordBatch<'_>, header: bool) -> Result<Vec<u8>, ::csv::Error> {
    match batch {
        RecordBatch::Patients(r) => encode(r, header),
        RecordBatch::Encounters(r) => encode(r, header),
        RecordBatch::Conditions(r) => encode(r, header),
        RecordBatch::Observations(r) => encode(r, header),
        RecordBatch::Medications(r) => encode(r, header),
        RecordBatch::Procedures(r) => encode(r, header),
        RecordBatch::Immunizations(r) => encode(r, header),
        RecordBatch::DiagnosticReports(r) => encode(r, header),
        RecordBatch::Claims(r) => encode(r, header),
        RecordBatch::ExplanationsOfBenefit(r) => encode(r, header),
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn flush(&self, batch: RecordBatch<'_>) -> Result<(), SinkError> {
        let kind = batch.kind();
        let table = kind.table_name();
        let first = self.begin(kind);

        let bytes = match encode_batch(&batch, first) {
            Ok(bytes) => bytes,
            Err(source) => {
                if first {
                    self.reset(kind);
                }
                return Err(SinkError::Csv { table, source });
            }
        };

        let path = self.table_path(kind);
        if let Err(source) = self.write(&path, &bytes, first).await {
            if first {
                self.reset(kind);
            }
            return Err(SinkError::Io { table, source });
        }

        debug!(
            table,
            path = %path.display(),
            records = batch.len(),
            header = first,
            "Wrote CSV batch"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{DiagnosticReport, ExtractedRecord};
    use tempfile::TempDir;

    fn report(id: &str, results: &[&str]) -> DiagnosticReport {
        DiagnosticReport {
            report_id: id.to_string(),
            patient_id: Some("p-1".into()),
            encounter_id: None,
            code: Some("24323-8".into()),
            code_system: None,
            description: None,
            date: Some("2020-01-01T00:00:00".into()),
            status: Some("final".into()),
            result_ids: results.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_header_written_once_then_appends() {
        let dir = TempDir::new().unwrap();
        let sink = CsvSink::new(dir.path());

        sink.flush(DiagnosticReport::batch(&[report("d-1", &["o-1", "o-2"])]))
            .await
            .unwrap();
        sink.flush(DiagnosticReport::batch(&[report("d-2", &[])]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(sink.table_path(ResourceKind::DiagnosticReport)).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("report_id,patient_id,encounter_id"));
        assert!(lines[1].starts_with("d-1,p-1,,24323-8"));
        assert!(lines[1].ends_with("o-1;o-2"));
        assert!(lines[2].starts_with("d-2,"));
    }

    #[tokio::test]
    async fn test_new_run_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diagnostic_reports.csv");
        std::fs::write(&path, "stale\n").unwrap();

        let sink = CsvSink::new(dir.path());
        sink.flush(DiagnosticReport::batch(&[report("d-1", &[])]))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("stale"));
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_failed_append_restores_committed_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claims.csv");
        let committed_rows = "claim_id,total_cost\ncl-1,10.0\n";
        std::fs::write(&path, committed_rows).unwrap();
        let committed = std::fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        write_rows(&mut file, b"cl-2,20.0\ncl-3,").await.unwrap();
        let result = restore_on_failure(
            &file,
            committed,
            Err(io::Error::other("no space left on device")),
        )
        .await;
        drop(file);

        assert_eq!(result.unwrap_err().to_string(), "no space left on device");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), committed_rows);
    }

    #[tokio::test]
    async fn test_successful_write_keeps_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claims.csv");
        std::fs::write(&path, "claim_id\n").unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        let written = write_rows(&mut file, b"cl-1\n").await;
        restore_on_failure(&file, 9, written).await.unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "claim_id\ncl-1\n");
    }

    #[tokio::test]
    async fn test_creates_missing_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out").join("tables");
        let sink = CsvSink::new(&nested);

        sink.flush(DiagnosticReport::batch(&[report("d-1", &[])]))
            .await
            .unwrap();

        assert!(nested.join("diagnostic_reports.csv").exists());
    }
}
