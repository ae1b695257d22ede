//! End-to-end scenarios over the full backfill -> detect -> metrics ->
//! limit chain, using real temp-directory JSONL fixtures instead of
//! mocked components.

use ccwatch_core::config::Config;
use ccwatch_core::Pipeline;
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use tempfile::tempdir;

fn line(timestamp: chrono::DateTime<Utc>, model: &str, prompt: u64, completion: u64) -> String {
    format!(
        r#"{{"timestamp":"{}","model":"{}","prompt_tokens":{},"completion_tokens":{}}}"#,
        timestamp.to_rfc3339(),
        model,
        prompt,
        completion
    )
}

fn write_jsonl(path: &std::path::Path, lines: &[String]) {
    let mut f = std::fs::File::create(path).unwrap();
    for l in lines {
        writeln!(f, "{l}").unwrap();
    }
}

fn base_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data.paths = vec![root.to_path_buf()];
    config.subscription.plan = "pro".to_string();
    config
}

#[tokio::test]
async fn single_session_computes_nonzero_metrics() {
    let dir = tempdir().unwrap();
    let now = Utc::now();
    let lines = vec![
        line(now - ChronoDuration::minutes(30), "claude-3-5-sonnet", 1000, 500),
        line(now - ChronoDuration::minutes(10), "claude-3-5-sonnet", 2000, 800),
    ];
    write_jsonl(&dir.path().join("usage.jsonl"), &lines);

    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    let report = pipeline.backfill().await;

    assert_eq!(report.records_loaded, 2);
    let snapshot = pipeline.current_snapshot().await;
    assert!(snapshot.metrics.current_tokens > 0);
    assert_eq!(snapshot.session_blocks.len(), 1);
}

#[tokio::test]
async fn session_rollover_produces_two_blocks() {
    let dir = tempdir().unwrap();
    let now = Utc::now();
    let lines = vec![
        line(now - ChronoDuration::hours(8), "claude-3-5-sonnet", 500, 200),
        line(now - ChronoDuration::minutes(5), "claude-3-5-sonnet", 500, 200),
    ];
    write_jsonl(&dir.path().join("usage.jsonl"), &lines);

    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    pipeline.backfill().await;

    let snapshot = pipeline.current_snapshot().await;
    assert!(
        snapshot.session_blocks.len() >= 2,
        "expected a gap-separated rollover into a second block, got {:?}",
        snapshot.session_blocks.len()
    );
}

#[tokio::test]
async fn duplicate_records_are_suppressed_from_totals() {
    let dir = tempdir().unwrap();
    let now = Utc::now();
    let dup = format!(
        r#"{{"timestamp":"{}","model":"claude-3-5-sonnet","prompt_tokens":1000,"completion_tokens":500,"message_id":"m1","request_id":"r1"}}"#,
        (now - ChronoDuration::minutes(5)).to_rfc3339()
    );
    write_jsonl(&dir.path().join("usage.jsonl"), &[dup.clone(), dup]);

    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    let report = pipeline.backfill().await;
    assert_eq!(report.records_loaded, 2);

    let snapshot = pipeline.current_snapshot().await;
    // Only one of the two identical (message_id, request_id) records
    // should count toward the active block's token total.
    assert_eq!(snapshot.metrics.current_tokens, 1500);
}

#[tokio::test]
async fn malformed_lines_degrade_gracefully_without_losing_valid_records() {
    let dir = tempdir().unwrap();
    let now = Utc::now();
    let good = line(now - ChronoDuration::minutes(5), "claude-3-5-sonnet", 100, 50);
    let lines = vec![good, "{ not valid json".to_string()];
    write_jsonl(&dir.path().join("usage.jsonl"), &lines);

    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    let report = pipeline.backfill().await;

    assert_eq!(report.records_loaded, 1);
    assert!(report.has_errors());
    assert!(!report.has_critical_errors());

    let snapshot = pipeline.current_snapshot().await;
    assert_eq!(snapshot.metrics.current_tokens, 150);
}

#[tokio::test]
async fn empty_watch_root_yields_healthy_empty_snapshot() {
    let dir = tempdir().unwrap();
    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    let report = pipeline.backfill().await;

    assert_eq!(report.records_loaded, 0);
    let snapshot = pipeline.current_snapshot().await;
    assert_eq!(snapshot.metrics.current_tokens, 0);
    assert!(snapshot.session_blocks.is_empty());
}

#[tokio::test]
async fn missing_watch_root_is_a_load_error_not_a_panic() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let pipeline = Pipeline::new(base_config(&missing)).unwrap();
    let report = pipeline.backfill().await;

    assert!(report.has_errors());
    assert_eq!(report.records_loaded, 0);
}

#[tokio::test]
async fn force_refresh_recomputes_after_direct_state_is_unchanged() {
    let dir = tempdir().unwrap();
    let now = Utc::now();
    write_jsonl(
        &dir.path().join("usage.jsonl"),
        &[line(now - ChronoDuration::minutes(1), "claude-3-5-sonnet", 10, 5)],
    );

    let pipeline = Pipeline::new(base_config(dir.path())).unwrap();
    pipeline.backfill().await;
    let before = pipeline.current_snapshot().await;

    pipeline.force_refresh().await;
    let after = pipeline.current_snapshot().await;

    assert_eq!(before.metrics.current_tokens, after.metrics.current_tokens);
}
