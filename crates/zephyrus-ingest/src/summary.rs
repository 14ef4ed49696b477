//! End-of-run summary

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::{BundleOutcome, EntryTally};
use crate::models::ResourceKind;
use crate::run::{FatalError, PipelineRun, ReportEntry, ReportScope};

/// Problems listed individually by `Display`; the rest are only counted
const LISTED_PROBLEMS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub files_total: u64,
    pub files_attempted: u64,
    pub files_succeeded: u64,
    pub files_failed: u64,
    pub entries: EntryTally,
    pub records_flushed: BTreeMap<ResourceKind, u64>,
    pub records_unflushed: u64,
    /// A stop was requested before the run finished
    pub cancelled: bool,
    pub fatal_error: Option<FatalError>,
    pub elapsed: Duration,
    /// Everything recorded in the error report during the run
    pub problems: Vec<ReportEntry>,
}

impl RunSummary {
    /// Build the summary from a finished dispatch. Drains the run's report.
    pub fn collect(run: &PipelineRun, outcome: BundleOutcome, elapsed: Duration) -> Self {
        Self {
            run_id: run.id(),
            files_total: outcome.files_total,
            files_attempted: outcome.files_attempted,
            files_succeeded: outcome.files_succeeded,
            files_failed: outcome.files_failed,
            entries: outcome.entries,
            records_flushed: outcome.records_flushed,
            records_unflushed: outcome.records_unflushed,
            cancelled: run.cancel_requested(),
            fatal_error: run.fatal_error().cloned(),
            elapsed,
            problems: run.report().drain(),
        }
    }

    pub fn total_flushed(&self) -> u64 {
        self.records_flushed.values().sum()
    }

    /// No fatal error occurred
    pub fn is_success(&self) -> bool {
        self.fatal_error.is_none()
    }

    /// Problems recorded at one scope
    pub fn problem_count(&self, scope: ReportScope) -> usize {
        self.problems.iter().filter(|p| p.scope == scope).count()
    }

    /// Pretty-printed JSON document of the whole summary
    pub fn to_json(&self) -> zephyrus_common::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(
            f,
            "  Files:   {} total, {} attempted, {} succeeded, {} failed",
            self.files_total, self.files_attempted, self.files_succeeded, self.files_failed
        )?;
        writeln!(
            f,
            "  Entries: {} attempted, {} succeeded, {} failed, {} skipped ({} warnings)",
            self.entries.attempted,
            self.entries.succeeded,
            self.entries.failed,
            self.entries.skipped,
            self.entries.warnings
        )?;
        writeln!(f, "  Records flushed: {}", self.total_flushed())?;
        for (kind, count) in self.records_flushed.iter().filter(|(_, c)| **c > 0) {
            writeln!(f, "    {:<24} {}", kind.table_name(), count)?;
        }
        if self.records_unflushed > 0 {
            writeln!(f, "  Records NOT flushed: {}", self.records_unflushed)?;
        }
        if self.cancelled {
            writeln!(f, "  Cancelled before all files were claimed")?;
        }
        writeln!(f, "  Elapsed: {:.2}s", self.elapsed.as_secs_f64())?;
        if !self.problems.is_empty() {
            writeln!(
                f,
                "  Problems: {} ({} file, {} entry, {} flush)",
                self.problems.len(),
                self.problem_count(ReportScope::File),
                self.problem_count(ReportScope::Entry),
                self.problem_count(ReportScope::Flush)
            )?;
            for problem in self.problems.iter().take(LISTED_PROBLEMS) {
                writeln!(
                    f,
                    "    [{}] {}: {}",
                    problem.scope, problem.identifier, problem.message
                )?;
            }
            if self.problems.len() > LISTED_PROBLEMS {
                writeln!(
                    f,
                    "    ... {} more, see --summary-json",
                    self.problems.len() - LISTED_PROBLEMS
                )?;
            }
        }
        if let Some(fatal) = &self.fatal_error {
            writeln!(f, "  FATAL: {fatal}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_reads_run_state() {
        let run = PipelineRun::new();
        run.report().record(ReportScope::Flush, "claims", "disk full");
        run.set_fatal("claims", "disk full");
        run.request_stop();

        let outcome = BundleOutcome {
            files_total: 3,
            files_attempted: 2,
            files_succeeded: 2,
            records_flushed: BTreeMap::from([(ResourceKind::Claim, 5), (ResourceKind::Patient, 2)]),
            ..Default::default()
        };

        let summary = RunSummary::collect(&run, outcome, Duration::from_millis(1500));
        assert!(summary.cancelled);
        assert!(!summary.is_success());
        assert_eq!(summary.total_flushed(), 7);
        assert_eq!(summary.problems.len(), 1);
        assert!(run.report().is_empty());

        let text = summary.to_string();
        assert!(text.contains("3 total, 2 attempted"));
        assert!(text.contains("FATAL: claims: disk full"));
        assert!(text.contains("1.50s"));
        assert!(text.contains("Problems: 1 (0 file, 0 entry, 1 flush)"));
        assert!(text.contains("[flush] claims: disk full"));
    }

    #[test]
    fn test_display_lists_problems_up_to_limit() {
        let run = PipelineRun::new();
        for index in 0..12 {
            run.report().record(
                ReportScope::Entry,
                format!("bundle.json#{index}"),
                "Coverage c: unsupported resource kind",
            );
        }
        run.report().record(ReportScope::File, "broken.json", "invalid JSON");

        let summary = RunSummary::collect(&run, BundleOutcome::default(), Duration::ZERO);
        assert_eq!(summary.problem_count(ReportScope::Entry), 12);
        assert_eq!(summary.problem_count(ReportScope::File), 1);

        let text = summary.to_string();
        assert!(text.contains("Problems: 13 (1 file, 12 entry, 0 flush)"));
        assert!(text.contains("[entry] bundle.json#0: Coverage c"));
        assert!(text.contains("[entry] bundle.json#9:"));
        assert!(!text.contains("bundle.json#10:"));
        assert!(text.contains("... 3 more, see --summary-json"));
    }

    #[test]
    fn test_to_json_document() {
        let run = PipelineRun::new();
        run.set_fatal("patients", "connection reset");
        let outcome = BundleOutcome {
            files_total: 2,
            records_flushed: BTreeMap::from([(ResourceKind::Patient, 4)]),
            ..Default::default()
        };

        let summary = RunSummary::collect(&run, outcome, Duration::from_secs(1));
        let value: serde_json::Value = serde_json::from_slice(&summary.to_json().unwrap()).unwrap();

        assert_eq!(value["files_total"], 2);
        assert_eq!(value["records_flushed"]["Patient"], 4);
        assert_eq!(value["fatal_error"]["source"], "patients");
        assert_eq!(value["run_id"], run.id().to_string());
    }
}
