//! Two-level bounded fan-out
//!
//! The bundle level claims files, the resource level claims entries within one
//! file. Both levels check the shared [`PipelineRun`](crate::run::PipelineRun)
//! before each claim and never interrupt work already claimed.

mod bundle;
mod resource;

use std::ops::AddAssign;

use serde::Serialize;

pub use bundle::{BundleDispatcher, BundleOutcome};
pub use resource::ResourceDispatcher;

/// Entry counters for one bundle, or summed over many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryTally {
    /// Entries claimed by a worker
    pub attempted: u64,
    /// Entries that produced a record
    pub succeeded: u64,
    /// Entries that failed extraction or whose task died
    pub failed: u64,
    /// Entries never claimed because the run was stopping
    pub skipped: u64,
    /// Normalization warnings across succeeded entries
    pub warnings: u64,
}

impl AddAssign for EntryTally {
    fn add_assign(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.warnings += other.warnings;
    }
}
