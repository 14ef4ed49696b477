//! Per-kind batch accumulation with flush-on-threshold
//!
//! Each [`BatchAccumulator`] owns its buffer behind an async mutex that stays
//! locked across the sink call. An append that reaches the threshold flushes
//! before the lock is released, so no other append can observe the same full
//! buffer or land in a buffer that is mid-flush.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{
    Claim, Condition, DiagnosticReport, Encounter, ExplanationOfBenefit, ExtractedRecord,
    Immunization, Medication, Observation, Patient, Procedure, ResourceKind, TypedRecord,
};
use crate::sink::{Sink, SinkError};

/// Default number of buffered records that triggers a flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// What an append did with the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Record buffered, threshold not reached
    Buffered,
    /// Threshold reached and this many records were flushed
    Flushed(usize),
}

/// Buffer for one record kind
pub struct BatchAccumulator<R: ExtractedRecord> {
    threshold: usize,
    sink: Arc<dyn Sink>,
    buffer: Mutex<Vec<R>>,
    flushed_records: AtomicU64,
    flushes: AtomicU64,
}

impl<R: ExtractedRecord> BatchAccumulator<R> {
    pub fn new(sink: Arc<dyn Sink>, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            sink,
            buffer: Mutex::new(Vec::with_capacity(threshold.min(DEFAULT_FLUSH_THRESHOLD))),
            flushed_records: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        R::KIND
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Add one record, flushing if the buffer reached the threshold.
    ///
    /// On a sink failure the record stays buffered with everything else and
    /// the next append or [`drain`](Self::drain) retries the whole buffer.
    pub async fn append(&self, record: R) -> Result<AppendOutcome, SinkError> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(record);

        if buffer.len() < self.threshold {
            return Ok(AppendOutcome::Buffered);
        }

        self.flush_locked(&mut buffer).await.map(AppendOutcome::Flushed)
    }

    /// Flush whatever is buffered regardless of threshold.
    ///
    /// Returns the number of records flushed. An empty buffer does not reach
    /// the sink.
    pub async fn drain(&self) -> Result<usize, SinkError> {
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return Ok(0);
        }
        self.flush_locked(&mut buffer).await
    }

    /// Records currently buffered
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Records delivered to the sink so far
    pub fn flushed_records(&self) -> u64 {
        self.flushed_records.load(Ordering::Relaxed)
    }

    /// Successful sink calls so far
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    async fn flush_locked(&self, buffer: &mut Vec<R>) -> Result<usize, SinkError> {
        let count = buffer.len();
        self.sink.flush(R::batch(buffer)).await?;
        buffer.clear();

        self.flushed_records.fetch_add(count as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %R::KIND, records = count, sink = self.sink.name(), "Flushed batch");
        Ok(count)
    }
}

/// Result of draining one accumulator
#[derive(Debug)]
pub struct DrainOutcome {
    pub kind: ResourceKind,
    pub result: Result<usize, SinkError>,
}

async fn drain_one<R: ExtractedRecord>(accumulator: &BatchAccumulator<R>) -> DrainOutcome {
    DrainOutcome {
        kind: R::KIND,
        result: accumulator.drain().await,
    }
}

/// One accumulator per kind, sharing a sink and threshold
pub struct Accumulators {
    patients: BatchAccumulator<Patient>,
    encounters: BatchAccumulator<Encounter>,
    conditions: BatchAccumulator<Condition>,
    observations: BatchAccumulator<Observation>,
    medications: BatchAccumulator<Medication>,
    procedures: BatchAccumulator<Procedure>,
    immunizations: BatchAccumulator<Immunization>,
    diagnostic_reports: BatchAccumulator<DiagnosticReport>,
    claims: BatchAccumulator<Claim>,
    explanations_of_benefit: BatchAccumulator<ExplanationOfBenefit>,
}

impl Accumulators {
    pub fn new(sink: Arc<dyn Sink>, threshold: usize) -> Self {
        Self {
            patients: BatchAccumulator::new(Arc::clone(&sink), threshold),
            encounters: BatchAccumulator::new(Arc::clone(&sink), threshold),
            conditions: BatchAccumulator::new(Arc::clone(&sink), threshold),
            observations: BatchAccumulator::new(Arc::clone(&sink), threshold),
            medications: BatchAccumulator::new(Arc::clone(&sink), threshold),
            procedures: BatchAccumulator::new(Arc::clone(&sink), threshold),
            immunizations: BatchAccumulator::new(Arc::clone(&sink), threshold),
            diagnostic_reports: BatchAccumulator::new(Arc::clone(&sink), threshold),
            claims: BatchAccumulator::new(Arc::clone(&sink), threshold),
            explanations_of_benefit: BatchAccumulator::new(sink, threshold),
        }
    }

    /// Append a record to the accumulator for its kind
    pub async fn route(&self, record: TypedRecord) -> Result<AppendOutcome, SinkError> {
        match record {
            TypedRecord::Patient(r) => self.patients.append(r).await,
            TypedRecord::Encounter(r) => self.encounters.append(r).await,
            TypedRecord::Condition(r) => self.conditions.append(r).await,
            TypedRecord::Observation(r) => self.observations.append(r).await,
            TypedRecord::Medication(r) => self.medications.append(r).await,
            TypedRecord::Procedure(r) => self.procedures.append(r).await,
            TypedRecord::Immunization(r) => self.immunizations.append(r).await,
            TypedRecord::DiagnosticReport(r) => self.diagnostic_reports.append(r).await,
            TypedRecord::Claim(r) => self.claims.append(r).await,
            TypedRecord::ExplanationOfBenefit(r) => self.explanations_of_benefit.append(r).await,
        }
    }

    /// Drain every accumulator concurrently
    pub async fn drain_all(&self) -> Vec<DrainOutcome> {
        let (p, e, c, o, m, pr, i, d, cl, eob) = futures::join!(
            drain_one(&self.patients),
            drain_one(&self.encounters),
            drain_one(&self.conditions),
            drain_one(&self.observations),
            drain_one(&self.medications),
            drain_one(&self.procedures),
            drain_one(&self.immunizations),
            drain_one(&self.diagnostic_reports),
            drain_one(&self.claims),
            drain_one(&self.explanations_of_benefit),
        );
        vec![p, e, c, o, m, pr, i, d, cl, eob]
    }

    /// Records delivered to the sink, per kind
    pub fn flushed_counts(&self) -> BTreeMap<ResourceKind, u64> {
        BTreeMap::from([
            (ResourceKind::Patient, self.patients.flushed_records()),
            (ResourceKind::Encounter, self.encounters.flushed_records()),
            (ResourceKind::Condition, self.conditions.flushed_records()),
            (ResourceKind::Observation, self.observations.flushed_records()),
            (ResourceKind::MedicationRequest, self.medications.flushed_records()),
            (ResourceKind::Procedure, self.procedures.flushed_records()),
            (ResourceKind::Immunization, self.immunizations.flushed_records()),
            (ResourceKind::DiagnosticReport, self.diagnostic_reports.flushed_records()),
            (ResourceKind::Claim, self.claims.flushed_records()),
            (
                ResourceKind::ExplanationOfBenefit,
                self.explanations_of_benefit.flushed_records(),
            ),
        ])
    }

    /// Records still buffered across all kinds
    pub async fn pending(&self) -> usize {
        self.patients.pending().await
            + self.encounters.pending().await
            + self.conditions.pending().await
            + self.observations.pending().await
            + self.medications.pending().await
            + self.procedures.pending().await
            + self.immunizations.pending().await
            + self.diagnostic_reports.pending().await
            + self.claims.pending().await
            + self.explanations_of_benefit.pending().await
    }
}
