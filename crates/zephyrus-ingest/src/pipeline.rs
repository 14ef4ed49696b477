//! Pipeline wiring
//!
//! Builds the accumulators and both dispatch levels for one run, executes the
//! run and produces its [`RunSummary`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use indicatif::ProgressBar;
use tracing::{error, info, instrument};
use zephyrus_common::Result;

use crate::batch::Accumulators;
use crate::config::IngestConfig;
use crate::dispatch::{BundleDispatcher, ResourceDispatcher};
use crate::extract::Extractor;
use crate::run::PipelineRun;
use crate::sink::Sink;
use crate::source::BundleSource;
use crate::summary::RunSummary;

/// One ingestion run over a bundle source into a sink
pub struct IngestPipeline {
    config: IngestConfig,
    source: Arc<dyn BundleSource>,
    sink: Arc<dyn Sink>,
    run: Arc<PipelineRun>,
    progress: Option<ProgressBar>,
}

impl IngestPipeline {
    pub fn new(config: IngestConfig, source: Arc<dyn BundleSource>, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            source,
            sink,
            run: Arc::new(PipelineRun::new()),
            progress: None,
        }
    }

    /// Use an existing run state, e.g. one already wired to a shutdown coordinator
    pub fn with_run(mut self, run: Arc<PipelineRun>) -> Self {
        self.run = run;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run_state(&self) -> Arc<PipelineRun> {
        Arc::clone(&self.run)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// List the source and process every bundle
    pub async fn run(&self) -> Result<RunSummary> {
        let files = match self.source.list().await {
            Ok(files) => files,
            Err(e) => {
                self.run.mark_stopped();
                return Err(e);
            }
        };

        if let Some(progress) = &self.progress {
            progress.set_length(files.len() as u64);
        }
        Ok(self.run_files(files).await)
    }

    /// Process the given bundle locations
    #[instrument(skip_all, fields(run_id = %self.run.id(), sink = self.sink.name()))]
    pub async fn run_files(&self, files: Vec<PathBuf>) -> RunSummary {
        let started = Instant::now();
        info!(
            files = files.len(),
            threshold = self.config.batch_flush_threshold,
            missing_amount = %self.config.missing_amount,
            "Starting ingestion run"
        );

        let accumulators = Arc::new(Accumulators::new(
            Arc::clone(&self.sink),
            self.config.batch_flush_threshold,
        ));
        let resources = ResourceDispatcher::new(
            Arc::clone(&self.run),
            Arc::clone(&accumulators),
            Extractor::new(self.config.missing_amount),
            self.config.resource_workers,
        );
        let mut bundles = BundleDispatcher::new(
            Arc::clone(&self.run),
            Arc::clone(&self.source),
            accumulators,
            resources,
            self.config.bundle_workers,
        );
        if let Some(progress) = &self.progress {
            bundles = bundles.with_progress(progress.clone());
        }

        let outcome = bundles.dispatch(files).await;
        let summary = RunSummary::collect(&self.run, outcome, started.elapsed());
        self.run.mark_stopped();

        match &summary.fatal_error {
            Some(fatal) => error!(%fatal, "Ingestion run ended with a fatal error"),
            None => info!(
                files = summary.files_succeeded,
                records = summary.total_flushed(),
                cancelled = summary.cancelled,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Ingestion run complete"
            ),
        }
        summary
    }
}
