//! Shared state for one pipeline run
//!
//! A [`PipelineRun`] is created per directory-wide run and threaded through
//! both dispatch levels behind an `Arc`. It carries the cancellation state,
//! the set-once fatal error slot and the error report.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::Serialize;
use uuid::Uuid;

/// Cancellation state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running = 0,
    Stopping = 1,
    Stopped = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Running,
            1 => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => f.write_str("running"),
            RunState::Stopping => f.write_str("stopping"),
            RunState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Where a reported problem happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportScope {
    File,
    Entry,
    Flush,
}

impl fmt::Display for ReportScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportScope::File => f.write_str("file"),
            ReportScope::Entry => f.write_str("entry"),
            ReportScope::Flush => f.write_str("flush"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub scope: ReportScope,
    /// File path, `file#index` for entries, or table name for flushes
    pub identifier: String,
    pub message: String,
}

/// Append-only problem log, drained by the caller
#[derive(Debug, Default)]
pub struct ErrorReport {
    entries: Mutex<Vec<ReportEntry>>,
}

impl ErrorReport {
    pub fn record(&self, scope: ReportScope, identifier: impl Into<String>, message: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReportEntry {
                scope,
                identifier: identifier.into(),
                message: message.into(),
            });
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every entry recorded so far
    pub fn drain(&self) -> Vec<ReportEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The first pipeline-fatal failure of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    /// What failed, e.g. a table name
    pub source: String,
    pub message: String,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    fatal: OnceLock<FatalError>,
    report: ErrorReport,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(RunState::Running as u8),
            cancel_requested: AtomicBool::new(false),
            fatal: OnceLock::new(),
            report: ErrorReport::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Running -> Stopping`. True only for the call that made the transition.
    pub fn request_stop(&self) -> bool {
        let transitioned = self
            .state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if transitioned {
            self.cancel_requested.store(true, Ordering::Release);
        }
        transitioned
    }

    /// Whether a stop was ever requested, even after the run reached `Stopped`
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Final transition once both dispatch levels have quiesced
    pub fn mark_stopped(&self) {
        self.state.fetch_max(RunState::Stopped as u8, Ordering::AcqRel);
    }

    /// True once a stop was requested
    pub fn should_stop(&self) -> bool {
        self.state() != RunState::Running
    }

    /// Set the fatal slot. Only the first caller wins; returns whether it did.
    pub fn set_fatal(&self, source: impl Into<String>, message: impl Into<String>) -> bool {
        self.fatal
            .set(FatalError {
                source: source.into(),
                message: message.into(),
            })
            .is_ok()
    }

    pub fn fatal_error(&self) -> Option<&FatalError> {
        self.fatal.get()
    }

    /// Checked by the bundle level before claiming a file
    pub fn accepts_new_files(&self) -> bool {
        !self.should_stop() && self.fatal.get().is_none()
    }

    /// Checked by the resource level before claiming an entry
    pub fn accepts_new_entries(&self) -> bool {
        !self.should_stop()
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }
}
