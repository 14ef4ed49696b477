//! Shared fixtures for pipeline integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use zephyrus_ingest::sink::{MemorySink, Sink, SinkError};
use zephyrus_ingest::source::{decode_bundle, BundleSource, DecodeError};
use zephyrus_ingest::{PipelineRun, RawResource, RecordBatch};

/// Bundles held in memory, keyed by a fake path
#[derive(Default)]
pub struct InMemorySource {
    bundles: BTreeMap<PathBuf, Vec<u8>>,
    decode_calls: AtomicUsize,
    /// Request a stop on this run while decoding the n-th bundle (0-based)
    stop_on_decode: Option<(usize, Arc<PipelineRun>)>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(mut self, name: &str, resources: Vec<Value>) -> Self {
        let entries: Vec<Value> = resources
            .into_iter()
            .map(|resource| json!({ "resource": resource }))
            .collect();
        let document = json!({ "resourceType": "Bundle", "entry": entries });
        self.bundles
            .insert(PathBuf::from(name), document.to_string().into_bytes());
        self
    }

    pub fn with_raw(mut self, name: &str, bytes: &[u8]) -> Self {
        self.bundles.insert(PathBuf::from(name), bytes.to_vec());
        self
    }

    pub fn stop_on_decode(mut self, index: usize, run: Arc<PipelineRun>) -> Self {
        self.stop_on_decode = Some((index, run));
        self
    }

    pub fn decode_calls(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleSource for InMemorySource {
    async fn list(&self) -> zephyrus_common::Result<Vec<PathBuf>> {
        Ok(self.bundles.keys().cloned().collect())
    }

    async fn decode(&self, location: &Path) -> Result<Vec<RawResource>, DecodeError> {
        let call = self.decode_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((index, run)) = &self.stop_on_decode {
            if call == *index {
                run.request_stop();
            }
        }

        let bytes = self.bundles.get(location).ok_or_else(|| DecodeError::Io {
            path: location.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such bundle"),
        })?;
        decode_bundle(bytes).map_err(|source| DecodeError::Json {
            path: location.to_path_buf(),
            source,
        })
    }
}

/// Fails its first `failures` calls, then behaves like a [`MemorySink`]
pub struct FlakySink {
    failures: usize,
    calls: AtomicUsize,
    pub inner: MemorySink,
}

impl FlakySink {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            inner: MemorySink::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn flush(&self, batch: RecordBatch<'_>) -> Result<(), SinkError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(SinkError::rejected(batch.kind(), "connection reset"));
        }
        self.inner.flush(batch).await
    }
}

pub fn patient(id: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "birthDate": "1980-01-15",
        "gender": "male",
        "maritalStatus": {"coding": [{"code": "S"}]}
    })
}

pub fn encounter(id: &str, patient: &str, end: Option<&str>) -> Value {
    let mut period = json!({"start": "2022-05-01T08:00:00Z"});
    if let Some(end) = end {
        period["end"] = json!(end);
    }
    json!({
        "resourceType": "Encounter",
        "id": id,
        "subject": {"reference": format!("Patient/{patient}")},
        "period": period,
        "class": {"code": "AMB"}
    })
}

pub fn condition(id: &str, patient: &str) -> Value {
    json!({
        "resourceType": "Condition",
        "id": id,
        "subject": {"reference": format!("Patient/{patient}")},
        "code": {"coding": [{"code": "38341003", "display": "Hypertension"}]},
        "onsetDateTime": "2015-03-02T00:00:00Z"
    })
}

pub fn claim(id: &str, patient: &str, total: Option<f64>) -> Value {
    let mut claim = json!({
        "resourceType": "Claim",
        "id": id,
        "patient": {"reference": format!("Patient/{patient}")},
        "status": "active"
    });
    if let Some(total) = total {
        claim["total"] = json!({"value": total});
    }
    claim
}

pub fn unsupported(id: &str) -> Value {
    json!({"resourceType": "Coverage", "id": id})
}
