//! End-to-end labeling runs against a scripted provider
//!
//! Run with: `cargo test --test labeling`

mod common;

use common::{ranked_answer, record, template, Fixture};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use targetlabel::{
    find_ids_by_explanation, CancellationToken, ExplanationCondition, JsonFileSink,
    LabelingResult, RecordFilter, RecordStream, RunError, RunRequest, ScriptedProvider,
    ERROR_PROCESSING,
};

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn every_filtered_record_gets_exactly_one_result() {
    let records = (0..12)
        .map(|i| record(&format!("T{i:02}"), &format!("Target {i:02}"), &["Kinase"]))
        .collect();
    let fixture = Fixture::new(records);
    let provider = Arc::new(
        ScriptedProvider::new()
            .respond(ranked_answer(&[("Kinase", 0.8)]))
            .fail_when("Target 03", "upstream 503"),
    );
    let labeler = fixture.labeler(provider.clone(), template("openai"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.scanned_count, 12);
    assert_eq!(summary.processed_count, 12);
    assert_eq!(summary.results.len(), 12);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.model_name, "test-model");
    assert_eq!(provider.calls(), 12);
    assert_eq!(fixture.traces.len(), 12);

    let written = fixture.output.written().unwrap();
    assert_eq!(written, summary.results);
    let ids: Vec<_> = written.iter().map(|r| r.target_id().to_string()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn topic_filter_counts_scanned_and_processed_separately() {
    let fixture = Fixture::new(vec![
        record("1", "EGFR", &["x"]),
        record("2", "Gravity", &["y"]),
    ]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Kinase", 0.9)])));
    let labeler = fixture.labeler(provider.clone(), template("openai"));

    let request = RunRequest {
        topics: vec!["x".into()],
        ..Default::default()
    };
    let summary = labeler.run(&request, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.scanned_count, 2);
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].target_id(), "1");
    // The filtered-out record never reached the provider.
    assert_eq!(provider.calls(), 1);
    assert!(provider.prompts().iter().all(|p| !p.contains("Gravity")));
}

#[tokio::test]
async fn prose_wrapped_answer_resolves_through_the_vocabulary() {
    let fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[
        ("Kinase", 0.9),
        ("Receptor", 0.7),
        ("Kinase", 0.4),
        ("Telepathy", 0.1),
    ])));
    let labeler = fixture.labeler(provider, template("openai"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();
    let result = &summary.results[0];

    assert!(!result.is_failure());
    assert_eq!(result.subject, set(&["Biology"]));
    assert_eq!(result.category, set(&["Enzymes", "Signalling"]));
    assert_eq!(result.confidence, Some(0.9));
    // Unknown topics are kept but contribute no subject or category.
    assert!(result.topic.contains(&"Telepathy".to_string()));
}

#[tokio::test]
async fn answer_without_json_is_failure_shaped_and_keeps_record_fields() {
    let fixture = Fixture::new(vec![record("7", "EGFR", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond("I cannot classify this target."));
    let labeler = fixture.labeler(provider, template("openai"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();
    let result = &summary.results[0];

    assert!(result.is_failure());
    assert_eq!(result.topic, vec![ERROR_PROCESSING.to_string()]);
    assert_eq!(result.confidence, Some(-1.0));
    assert_eq!(result.record.label.as_deref(), Some("EGFR"));
    assert_eq!(result.record.description.as_deref(), Some("EGFR description"));
    assert_eq!(result.record.explanation.as_deref(), Some("EGFR explanation."));

    let traces = fixture.traces.traces();
    assert_eq!(traces.len(), 1);
    assert!(traces[0].error.is_some());
    assert_eq!(traces[0].output.as_deref(), Some("I cannot classify this target."));
}

#[tokio::test]
async fn null_explanation_is_processed_and_may_have_no_confidence() {
    let mut raw = record("9", "Orphan", &[]);
    raw["target_explanation"] = serde_json::Value::Null;
    let fixture = Fixture::new(vec![raw]);
    let provider = Arc::new(ScriptedProvider::new().respond(r#"{"RankedTopics": []}"#));
    let labeler = fixture.labeler(provider.clone(), template("openai"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();
    let result = &summary.results[0];

    assert!(!result.is_failure());
    assert_eq!(result.record.explanation, None);
    assert_eq!(result.confidence, None);
    assert!(result.topic.is_empty());
    // The null explanation renders as an empty string in the prompt.
    assert!(provider.prompts()[0].contains("Explanation: \n"));
}

#[tokio::test]
async fn unsupported_provider_fails_each_record_but_the_run_completes() {
    let fixture = Fixture::new(vec![record("1", "EGFR", &[]), record("2", "KRAS", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Kinase", 0.9)])));
    let labeler = fixture.labeler(provider.clone(), template("anthropic"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.results.len(), 2);
    assert!(summary.results.iter().all(LabelingResult::is_failure));
    assert_eq!(provider.calls(), 0);
    assert_eq!(fixture.output.written().unwrap().len(), 2);
}

#[tokio::test]
async fn unconfigured_provider_fails_each_record() {
    let fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Kinase", 0.9)])));
    let labeler = fixture.labeler(provider.clone(), template("gemini"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.results[0].is_failure());
    assert_eq!(provider.calls(), 0);
    assert!(fixture.traces.traces()[0]
        .error
        .as_deref()
        .unwrap()
        .contains("not configured"));
}

#[tokio::test]
async fn provider_calls_never_exceed_the_concurrency_limit() {
    for limit in [1, 3, 5] {
        let records = (0..20)
            .map(|i| record(&format!("T{i:02}"), &format!("Target {i:02}"), &[]))
            .collect();
        let mut fixture = Fixture::new(records);
        fixture.config.concurrency = limit;
        let provider = Arc::new(
            ScriptedProvider::new()
                .respond(ranked_answer(&[("Kinase", 0.5)]))
                .with_latency(Duration::from_millis(10)),
        );
        let labeler = fixture.labeler(provider.clone(), template("openai"));

        let summary = labeler
            .run(&RunRequest::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.results.len(), 20);
        assert!(provider.peak_in_flight() <= limit, "limit {limit} exceeded");
        assert!(provider.peak_in_flight() >= 1);
    }
}

#[tokio::test]
async fn slow_calls_time_out_per_record() {
    let fixture = {
        let mut fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
        fixture.config.call_timeout_secs = 1;
        fixture
    };
    let provider = Arc::new(
        ScriptedProvider::new()
            .respond(ranked_answer(&[("Kinase", 0.5)]))
            .with_latency(Duration::from_secs(3)),
    );
    let labeler = fixture.labeler(provider, template("openai"));

    let summary = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.results[0].is_failure());
    assert!(fixture.traces.traces()[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn malformed_source_is_fatal_and_writes_nothing() {
    let fixture = Fixture::with_document(r#"{"data": {"search_results": {"targets": [{"id": 1}, "#);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Kinase", 0.5)])));
    let labeler = fixture.labeler(provider, template("openai"));

    let failure = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, RunError::Stream(_)));
    assert_eq!(failure.model_name.as_deref(), Some("test-model"));
    assert!(failure.elapsed_seconds >= 0.0);
    assert!(fixture.output.written().is_none());
}

#[tokio::test]
async fn missing_vocabulary_is_fatal() {
    let mut fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
    fixture.config.vocabulary = fixture.path("missing.json");
    let provider = Arc::new(ScriptedProvider::new());
    let labeler = fixture.labeler(provider.clone(), template("openai"));

    let failure = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, RunError::Vocabulary(_)));
    assert_eq!(provider.calls(), 0);
    assert!(fixture.output.written().is_none());
}

#[tokio::test]
async fn unknown_prompt_is_fatal_without_a_model_name() {
    let mut fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
    fixture.config.prompt_name = "no-such-prompt".into();
    let labeler = fixture.labeler(Arc::new(ScriptedProvider::new()), template("openai"));

    let failure = labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, RunError::Prompt(_)));
    assert!(failure.model_name.is_none());
    assert!(failure.envelope()["model"].is_null());
}

#[tokio::test]
async fn cancelled_run_is_fatal() {
    let records = (0..10)
        .map(|i| record(&format!("T{i}"), &format!("Target {i}"), &[]))
        .collect();
    let fixture = Fixture::new(records);
    let provider = Arc::new(
        ScriptedProvider::new()
            .respond(ranked_answer(&[("Kinase", 0.5)]))
            .with_latency(Duration::from_secs(2)),
    );
    let labeler = fixture.labeler(provider, template("openai"));

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let failure = labeler
        .run(&RunRequest::default(), cancel)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(failure.error, RunError::Cancelled { .. }));
    assert!(fixture.output.written().is_none());
}

#[tokio::test]
async fn vocabulary_subject_filter_narrows_the_prompt_only() {
    let fixture = Fixture::new(vec![record("1", "EGFR", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Orbit", 0.6)])));
    let labeler = fixture.labeler(provider.clone(), template("openai"));

    let request = RunRequest {
        vocabulary_subjects: vec!["biology".into()],
        ..Default::default()
    };
    let summary = labeler.run(&request, CancellationToken::new()).await.unwrap();

    let prompt = &provider.prompts()[0];
    assert!(prompt.contains("Kinase (phosphorylation)"));
    assert!(!prompt.contains("Orbit"));
    // Resolution still uses the full vocabulary.
    assert_eq!(summary.results[0].subject, set(&["Physics"]));
}

#[tokio::test]
async fn json_file_sink_persists_the_run() {
    let fixture = Fixture::new(vec![record("1", "EGFR", &[]), record("2", "KRAS", &[])]);
    let provider = Arc::new(ScriptedProvider::new().respond(ranked_answer(&[("Kinase", 0.5)])));
    let output = fixture.path("out/labeled_targets.json");
    let labeler = fixture
        .labeler(provider, template("openai"))
        .with_output_sink(Arc::new(JsonFileSink::new(&output)));

    labeler
        .run(&RunRequest::default(), CancellationToken::new())
        .await
        .unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let rows = written.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Target_ID"], "1");
    assert_eq!(rows[0]["Topic"][0], "Kinase");
    assert_eq!(rows[0]["Subject"][0], "Biology");
}

#[tokio::test]
async fn explanation_search_reads_the_record_file() {
    let mut with_null = record("2", "KRAS", &[]);
    with_null["target_explanation"] = serde_json::Value::Null;
    let mut without_key = record("3", "TP53", &[]);
    without_key.as_object_mut().unwrap().remove("target_explanation");
    let fixture = Fixture::new(vec![record("1", "EGFR", &[]), with_null, without_key]);

    let open = || {
        RecordStream::open(
            &fixture.config.input,
            &fixture.config.record_path,
            RecordFilter::new(),
        )
        .unwrap()
    };

    let nulls = find_ids_by_explanation(open(), &ExplanationCondition::IsNull)
        .await
        .unwrap();
    assert_eq!(nulls, vec!["2"]);

    let contains = ExplanationCondition::Contains("EGFR explanation".into());
    let ids = find_ids_by_explanation(open(), &contains).await.unwrap();
    assert_eq!(ids, vec!["1"]);
}
