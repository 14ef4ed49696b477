//! Zephyrus Ingest Library
//!
//! Concurrent ingestion of clinical record bundles into flat tables.
//!
//! Bundle files are fanned out across a bounded pool of bundle workers; the
//! entries of each bundle are fanned out across a bounded pool of resource
//! workers. Every entry is extracted into a typed record and appended to the
//! accumulator for its kind, which flushes to a [`sink::Sink`] once its
//! threshold is reached. A final drain persists partial batches.
//!
//! # Supported Resource Kinds
//!
//! Patient, Encounter, Condition, Observation, MedicationRequest, Procedure,
//! Immunization, DiagnosticReport, Claim and ExplanationOfBenefit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zephyrus_ingest::{CsvSink, DirectorySource, IngestConfig, IngestPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::default()
//!         .with_input_dir("./data/bundles")
//!         .with_output_dir("./data/output");
//!     let source = Arc::new(DirectorySource::new(&config.input_dir));
//!     let sink = Arc::new(CsvSink::new(&config.output_dir));
//!
//!     let summary = IngestPipeline::new(config, source, sink).run().await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod run;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod summary;

pub use batch::{Accumulators, AppendOutcome, BatchAccumulator};
pub use config::IngestConfig;
pub use extract::{ExtractionFailure, Extractor, MissingAmountPolicy, NormalizationWarning};
pub use models::{RawResource, RecordBatch, ResourceKind, TypedRecord};
pub use pipeline::IngestPipeline;
pub use run::{FatalError, PipelineRun, ReportScope, RunState};
pub use shutdown::ShutdownCoordinator;
pub use sink::{CsvSink, MemorySink, Sink, SinkError};
pub use source::{BundleSource, DecodeError, DirectorySource};
pub use summary::RunSummary;
