//! End-to-end pipeline behavior: extraction outcomes, cancellation and
//! fatal sink failures.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use std::sync::Arc;

use helpers::{claim, condition, encounter, patient, unsupported, FlakySink, InMemorySource};
use serde_json::Value;
use zephyrus_ingest::{
    IngestConfig, IngestPipeline, MemorySink, MissingAmountPolicy, PipelineRun, ReportScope,
    ResourceKind, RunState,
};

fn config(bundle_workers: usize, resource_workers: usize, threshold: usize) -> IngestConfig {
    IngestConfig::default()
        .with_bundle_workers(bundle_workers)
        .with_resource_workers(resource_workers)
        .with_batch_flush_threshold(threshold)
}

#[tokio::test]
async fn test_three_entry_bundle() {
    let source = Arc::new(InMemorySource::new().with_bundle(
        "bundle-1.json",
        vec![
            patient("p-1"),
            encounter("e-1", "p-1", None),
            unsupported("cov-1"),
        ],
    ));
    let sink = Arc::new(MemorySink::new());

    let pipeline = IngestPipeline::new(config(2, 4, 1000), source, sink.clone());
    let run = pipeline.run_state();
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.files_total, 1);
    assert_eq!(summary.files_succeeded, 1);
    assert_eq!(summary.entries.attempted, 3);
    assert_eq!(summary.entries.succeeded, 2);
    assert_eq!(summary.entries.failed, 1);
    assert_eq!(summary.entries.skipped, 0);
    assert!(summary.is_success());
    assert!(!summary.cancelled);
    assert_eq!(run.state(), RunState::Stopped);

    // Both records reach the sink through the final drain
    let patients = sink.batches_for(ResourceKind::Patient);
    assert_eq!(patients.len(), 1);
    assert_eq!(patients[0].rows[0]["patient_id"], "p-1");
    assert_eq!(patients[0].rows[0]["birth_date"], "1980-01-15T00:00:00");

    let encounters = sink.batches_for(ResourceKind::Encounter);
    assert_eq!(encounters[0].rows[0]["patient_id"], "p-1");
    assert_eq!(encounters[0].rows[0]["start_date"], "2022-05-01T08:00:00+00:00");
    assert_eq!(encounters[0].rows[0]["end_date"], Value::Null);

    let failures: Vec<_> = summary
        .problems
        .iter()
        .filter(|p| p.scope == ReportScope::Entry)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].message.contains("Coverage cov-1"));
    assert!(failures[0].identifier.starts_with("bundle-1.json#"));
}

#[tokio::test]
async fn test_empty_bundle_is_noop_success() {
    let source = Arc::new(InMemorySource::new().with_bundle("empty.json", vec![]));
    let sink = Arc::new(MemorySink::new());

    let summary = IngestPipeline::new(config(1, 1, 10), source, sink.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.files_succeeded, 1);
    assert_eq!(summary.entries.attempted, 0);
    assert!(sink.batches().is_empty());
}

#[tokio::test]
async fn test_malformed_bundle_is_not_fatal() {
    let source = Arc::new(
        InMemorySource::new()
            .with_bundle("a.json", vec![patient("p-1")])
            .with_raw("b.json", b"{\"entry\": [")
            .with_bundle("c.json", vec![patient("p-2")]),
    );
    let sink = Arc::new(MemorySink::new());

    let summary = IngestPipeline::new(config(2, 2, 1000), source, sink.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.files_attempted, 3);
    assert_eq!(summary.files_succeeded, 2);
    assert_eq!(summary.files_failed, 1);
    assert!(summary.fatal_error.is_none());
    assert_eq!(sink.record_count(ResourceKind::Patient), 2);

    let file_problems: Vec<_> = summary
        .problems
        .iter()
        .filter(|p| p.scope == ReportScope::File)
        .collect();
    assert_eq!(file_problems.len(), 1);
    assert_eq!(file_problems[0].identifier, "b.json");
}

#[tokio::test]
async fn test_missing_amount_policy_reaches_records() {
    let source = Arc::new(InMemorySource::new().with_bundle(
        "claims.json",
        vec![claim("cl-1", "p-1", None), claim("cl-2", "p-1", Some(42.0))],
    ));
    let sink = Arc::new(MemorySink::new());

    let config = config(1, 2, 1000).with_missing_amount(MissingAmountPolicy::Absent);
    IngestPipeline::new(config, source, sink.clone())
        .run()
        .await
        .unwrap();

    let rows = &sink.batches_for(ResourceKind::Claim)[0].rows;
    let mut totals: Vec<_> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| (row["claim_id"].as_str().unwrap().to_string(), row["total_cost"].clone()))
        .collect();
    totals.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(totals[0].1, Value::Null);
    assert_eq!(totals[1].1, serde_json::json!(42.0));
}

#[tokio::test]
async fn test_stop_request_halts_new_claims() {
    let run = Arc::new(PipelineRun::new());
    let source = Arc::new(
        InMemorySource::new()
            .with_bundle("1.json", vec![patient("p-1"), patient("p-2")])
            .with_bundle("2.json", vec![patient("p-3"), condition("c-1", "p-3")])
            .with_bundle("3.json", vec![patient("p-4")])
            .stop_on_decode(1, Arc::clone(&run)),
    );
    let sink = Arc::new(MemorySink::new());

    let summary = IngestPipeline::new(config(1, 2, 1000), source.clone(), sink.clone())
        .with_run(Arc::clone(&run))
        .run()
        .await
        .unwrap();

    // The second file was already claimed and completes; the third is never claimed
    assert_eq!(source.decode_calls(), 2);
    assert_eq!(summary.files_total, 3);
    assert_eq!(summary.files_attempted, 2);
    assert!(summary.cancelled);

    // The stop arrived before the second file's entries were claimed
    assert_eq!(summary.entries.attempted, 2);
    assert_eq!(summary.entries.skipped, 2);

    // Drain still persisted what was accumulated
    assert_eq!(sink.record_count(ResourceKind::Patient), 2);
    assert_eq!(run.state(), RunState::Stopped);
}

#[tokio::test]
async fn test_sink_failure_is_fatal_but_drain_runs() {
    let source = Arc::new(
        InMemorySource::new()
            .with_bundle(
                "1.json",
                vec![patient("p-1"), patient("p-2"), condition("c-1", "p-1")],
            )
            .with_bundle("2.json", vec![patient("p-3")]),
    );
    let sink = Arc::new(FlakySink::failing_first(1));

    let summary = IngestPipeline::new(config(1, 1, 2), source.clone(), sink.clone())
        .run()
        .await
        .unwrap();

    let fatal = summary.fatal_error.as_ref().expect("fatal error recorded");
    assert_eq!(fatal.source, "patients");
    assert!(!summary.is_success());

    // No new file after the failure
    assert_eq!(source.decode_calls(), 1);
    assert_eq!(summary.files_attempted, 1);

    // The failed batch was kept and delivered by the final drain
    assert_eq!(summary.entries.succeeded, 3);
    assert_eq!(sink.inner.record_count(ResourceKind::Patient), 2);
    assert_eq!(sink.inner.record_count(ResourceKind::Condition), 1);
    assert_eq!(summary.records_unflushed, 0);
    assert_eq!(summary.records_flushed[&ResourceKind::Patient], 2);

    assert!(summary
        .problems
        .iter()
        .any(|p| p.scope == ReportScope::Flush && p.identifier == "patients"));
}

#[tokio::test]
async fn test_drain_failure_sets_fatal() {
    let source = Arc::new(InMemorySource::new().with_bundle("1.json", vec![patient("p-1")]));
    let sink = Arc::new(FlakySink::failing_first(usize::MAX));

    let summary = IngestPipeline::new(config(1, 1, 100), source, sink.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.fatal_error.as_ref().map(|f| f.source.as_str()), Some("patients"));
    assert_eq!(summary.records_unflushed, 1);
    assert_eq!(sink.calls(), 1);
}
