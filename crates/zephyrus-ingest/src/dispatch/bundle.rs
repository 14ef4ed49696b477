//! Bundle-level dispatch: files across N workers, then a final drain

use std::collections::BTreeMap;
use std::future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tracing::{debug, error, info, instrument, warn};

use super::{EntryTally, ResourceDispatcher};
use crate::batch::Accumulators;
use crate::models::ResourceKind;
use crate::run::{PipelineRun, ReportScope};
use crate::source::BundleSource;

enum FileResult {
    Processed(EntryTally),
    Failed,
}

/// Counters produced by one dispatch over a file list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutcome {
    pub files_total: u64,
    /// Files claimed by a worker
    pub files_attempted: u64,
    /// Files that decoded, whatever happened to their entries
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub entries: EntryTally,
    /// Records delivered to the sink per kind, including the final drain
    pub records_flushed: BTreeMap<ResourceKind, u64>,
    /// Records still buffered because their flush failed
    pub records_unflushed: u64,
}

/// Fans bundle files out to resource dispatchers
#[derive(Clone)]
pub struct BundleDispatcher {
    run: Arc<PipelineRun>,
    source: Arc<dyn BundleSource>,
    accumulators: Arc<Accumulators>,
    resources: ResourceDispatcher,
    workers: usize,
    progress: Option<ProgressBar>,
}

impl BundleDispatcher {
    pub fn new(
        run: Arc<PipelineRun>,
        source: Arc<dyn BundleSource>,
        accumulators: Arc<Accumulators>,
        resources: ResourceDispatcher,
        workers: usize,
    ) -> Self {
        Self {
            run,
            source,
            accumulators,
            resources,
            workers: workers.max(1),
            progress: None,
        }
    }

    /// Advance this bar once per settled file
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Process the given files, then drain every accumulator.
    ///
    /// Before each claim the run must still accept new files: no stop
    /// request and no fatal error. Claimed files always run to completion.
    #[instrument(skip_all, fields(run_id = %self.run.id(), files = files.len()))]
    pub async fn dispatch(&self, files: Vec<PathBuf>) -> BundleOutcome {
        let mut outcome = BundleOutcome {
            files_total: files.len() as u64,
            ..Default::default()
        };

        info!(
            bundle_workers = self.workers,
            resource_workers = self.resources.workers(),
            "Dispatching bundles"
        );

        let mut claimed = stream::iter(files)
            .take_while(|_| future::ready(self.run.accepts_new_files()))
            .map(|path| {
                let this = self.clone();
                tokio::spawn(async move { this.process_file(path).await })
            })
            .buffer_unordered(self.workers);

        while let Some(joined) = claimed.next().await {
            outcome.files_attempted += 1;
            match joined {
                Ok(FileResult::Processed(tally)) => {
                    outcome.files_succeeded += 1;
                    outcome.entries += tally;
                }
                Ok(FileResult::Failed) => outcome.files_failed += 1,
                Err(e) => {
                    outcome.files_failed += 1;
                    error!(error = %e, "Bundle task failed");
                    self.run
                        .report()
                        .record(ReportScope::File, "<unknown>", format!("bundle task failed: {e}"));
                }
            }
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }
        drop(claimed);

        let unclaimed = outcome.files_total - outcome.files_attempted;
        if unclaimed > 0 {
            warn!(unclaimed, state = %self.run.state(), "Stopped claiming bundle files");
        }

        self.drain(&mut outcome).await;
        outcome
    }

    async fn process_file(&self, path: PathBuf) -> FileResult {
        let label = path.display().to_string();

        match self.source.decode(&path).await {
            Ok(entries) => {
                debug!(file = %label, entries = entries.len(), "Decoded bundle");
                FileResult::Processed(self.resources.dispatch(&label, entries).await)
            }
            Err(e) => {
                warn!(file = %label, error = %e, "Skipping undecodable bundle");
                self.run.report().record(ReportScope::File, label, e.to_string());
                FileResult::Failed
            }
        }
    }

    /// Unconditional drain after every claimed file has settled
    async fn drain(&self, outcome: &mut BundleOutcome) {
        for drained in self.accumulators.drain_all().await {
            let table = drained.kind.table_name();
            match drained.result {
                Ok(0) => {}
                Ok(records) => debug!(table, records, "Drained remaining batch"),
                Err(e) => {
                    self.run.report().record(ReportScope::Flush, table, e.to_string());
                    if self.run.set_fatal(table, e.to_string()) {
                        error!(table, error = %e, "Sink failure during final drain");
                    }
                }
            }
        }

        outcome.records_flushed = self.accumulators.flushed_counts();
        outcome.records_unflushed = self.accumulators.pending().await as u64;
        if outcome.records_unflushed > 0 {
            error!(records = outcome.records_unflushed, "Records left unflushed");
        }
    }
}
