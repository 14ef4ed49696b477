//! Resource-level dispatch: entries of one bundle across M workers

use std::future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, warn};

use super::EntryTally;
use crate::batch::Accumulators;
use crate::extract::{Extraction, Extractor};
use crate::models::RawResource;
use crate::run::{PipelineRun, ReportScope};

enum EntryResult {
    Succeeded { warnings: usize },
    Failed,
}

/// Extracts and accumulates the entries of one bundle
#[derive(Clone)]
pub struct ResourceDispatcher {
    run: Arc<PipelineRun>,
    accumulators: Arc<Accumulators>,
    extractor: Extractor,
    workers: usize,
}

impl ResourceDispatcher {
    pub fn new(
        run: Arc<PipelineRun>,
        accumulators: Arc<Accumulators>,
        extractor: Extractor,
        workers: usize,
    ) -> Self {
        Self {
            run,
            accumulators,
            extractor,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every entry of one bundle and return once all claimed entries
    /// have settled.
    ///
    /// The stop flag is checked before each claim. One bad entry never
    /// affects its siblings.
    pub async fn dispatch(&self, bundle: &str, entries: Vec<RawResource>) -> EntryTally {
        let total = entries.len() as u64;
        if total == 0 {
            debug!(bundle, "Bundle has no entries");
            return EntryTally::default();
        }

        let label: Arc<str> = Arc::from(bundle);
        let mut claimed = stream::iter(entries.into_iter().enumerate())
            .take_while(|_| future::ready(self.run.accepts_new_entries()))
            .map(|(index, raw)| {
                let this = self.clone();
                let label = Arc::clone(&label);
                tokio::spawn(async move { this.process_entry(&label, index, raw).await })
            })
            .buffer_unordered(self.workers);

        let mut tally = EntryTally::default();
        while let Some(joined) = claimed.next().await {
            tally.attempted += 1;
            match joined {
                Ok(EntryResult::Succeeded { warnings }) => {
                    tally.succeeded += 1;
                    tally.warnings += warnings as u64;
                }
                Ok(EntryResult::Failed) => tally.failed += 1,
                Err(e) => {
                    tally.failed += 1;
                    error!(bundle, error = %e, "Entry task failed");
                    self.run
                        .report()
                        .record(ReportScope::Entry, bundle, format!("entry task failed: {e}"));
                }
            }
        }

        tally.skipped = total - tally.attempted;
        if tally.skipped > 0 {
            warn!(bundle, skipped = tally.skipped, "Stopped claiming entries");
        }
        tally
    }

    async fn process_entry(&self, bundle: &str, index: usize, raw: RawResource) -> EntryResult {
        let identifier = format!("{bundle}#{index}");

        let Extraction { record, warnings } = match self.extractor.extract(&raw) {
            Ok(extraction) => extraction,
            Err(failure) => {
                warn!(entry = %identifier, %failure, "Extraction failed");
                self.run
                    .report()
                    .record(ReportScope::Entry, identifier, failure.to_string());
                return EntryResult::Failed;
            }
        };

        for warning in &warnings {
            warn!(entry = %identifier, %warning, "Field normalized to absent");
            self.run
                .report()
                .record(ReportScope::Entry, identifier.as_str(), warning.to_string());
        }

        let kind = record.kind();
        if let Err(e) = self.accumulators.route(record).await {
            let table = kind.table_name();
            self.run.report().record(ReportScope::Flush, table, e.to_string());
            if self.run.set_fatal(table, e.to_string()) {
                error!(table, error = %e, "Sink failure, no further files will be claimed");
            }
        }

        EntryResult::Succeeded {
            warnings: warnings.len(),
        }
    }
}
