//! Integration tests for the dispatcher and the worker retry loop.
//!
//! Time is paused, so retry delays and backoff waits cost nothing but are
//! still observable through tokio's clock.

use coa_sync::config::DispatchConfig;
use coa_sync::engine::Dispatcher;
use coa_sync::model::{Outcome, Record};
use coa_sync::upload::{UploadError, Uploader};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Copy)]
enum Script {
    Succeed,
    Duplicate,
    FailTimes(usize, Failure),
    AlwaysFail(Failure),
    Panic,
}

/// Which retryable error a failing script returns.
#[derive(Clone, Copy)]
enum Failure {
    Unavailable,
    Reset,
    TruncatedBody,
    Unserializable,
}

impl Failure {
    fn error(self) -> UploadError {
        match self {
            Failure::Unavailable => UploadError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            },
            Failure::Reset => UploadError::Network("connection reset".to_string()),
            Failure::TruncatedBody => UploadError::BodyRead {
                status: 200,
                message: "unexpected end of stream".to_string(),
            },
            Failure::Unserializable => UploadError::Serialize("key must be a string".to_string()),
        }
    }
}

/// Uploader that follows a per-code script and records every call.
struct FakeUploader {
    scripts: HashMap<String, Script>,
    latency: Duration,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeUploader {
    fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            latency: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn script(mut self, code: &str, script: Script) -> Self {
        self.scripts.insert(code.to_string(), script);
        self
    }

    fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn calls_for(&self, code: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .unwrap_or_default()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Uploader for FakeUploader {
    async fn upload(&self, record: &Record) -> Result<(), UploadError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(record.code.clone()).or_default();
            entry.push(Instant::now());
            entry.len()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(&record.code).copied().unwrap_or(Script::Succeed) {
            Script::Succeed => Ok(()),
            Script::Duplicate => Err(UploadError::from_rejection(
                400,
                "Account code: Please enter a unique Code.".to_string(),
            )),
            Script::FailTimes(n, failure) if attempt <= n => Err(failure.error()),
            Script::FailTimes(..) => Ok(()),
            Script::AlwaysFail(failure) => Err(failure.error()),
            Script::Panic => panic!("uploader crashed on {}", record.code),
        }
    }
}

fn config(workers: usize) -> DispatchConfig {
    DispatchConfig {
        worker_count: workers,
        backoff: Duration::from_secs(1),
        max_attempts: 10,
        retry_delay: RETRY_DELAY,
    }
}

fn records(codes: &[&str]) -> Vec<Record> {
    codes
        .iter()
        .map(|code| Record::new(*code, format!("Account {code}"), "EXPENSE"))
        .collect()
}

fn dispatcher(config: DispatchConfig, uploader: &Arc<FakeUploader>) -> Dispatcher<FakeUploader> {
    Dispatcher::new(config, Arc::clone(uploader)).expect("valid config")
}

fn assert_min_gaps(calls: &[Instant], gap: Duration) {
    for pair in calls.windows(2) {
        assert!(
            pair[1] - pair[0] >= gap,
            "attempts only {:?} apart",
            pair[1] - pair[0]
        );
    }
}

// ---------------------------------------------------------------------------
// Completion accounting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn five_records_two_workers_all_succeed() {
    let uploader = Arc::new(FakeUploader::new());
    let report = dispatcher(config(2), &uploader)
        .run(records(&["1", "2", "3", "4", "5"]))
        .await;

    assert_eq!(report.total(), 5);
    assert_eq!(report.uploaded(), 5);
    assert!(report.is_success());
    for (i, rec) in report.records.iter().enumerate() {
        assert_eq!(rec.index, i);
        assert_eq!(rec.code, (i + 1).to_string());
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.outcome, Outcome::Uploaded);
        assert!(rec.worker.is_some_and(|w| w < 2));
        assert_eq!(uploader.calls_for(&rec.code).len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn empty_batch_completes_immediately() {
    let uploader = Arc::new(FakeUploader::new());
    let report = dispatcher(config(3), &uploader).run(Vec::new()).await;

    assert_eq!(report.total(), 0);
    assert!(report.is_success());
}

#[tokio::test(start_paused = true)]
async fn every_record_signals_once_under_mixed_outcomes() {
    let uploader = Arc::new(
        FakeUploader::new()
            .script("b", Script::Duplicate)
            .script("c", Script::FailTimes(2, Failure::Unavailable))
            .script("d", Script::AlwaysFail(Failure::Reset))
            .latency(Duration::from_millis(250)),
    );
    let codes = ["a", "b", "c", "d", "e", "f", "g"];
    let report = dispatcher(config(3), &uploader).run(records(&codes)).await;

    assert_eq!(report.total(), codes.len());
    let indices: HashSet<usize> = report.records.iter().map(|r| r.index).collect();
    assert_eq!(indices.len(), codes.len());
    assert_eq!(report.already_existed(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.uploaded(), 5);
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicate_rejection_is_success_without_retry() {
    let uploader = Arc::new(FakeUploader::new().script("200", Script::Duplicate));
    let started = Instant::now();
    let report = dispatcher(config(2), &uploader).run(records(&["200"])).await;

    let rec = &report.records[0];
    assert_eq!(rec.outcome, Outcome::AlreadyExists);
    assert_eq!(rec.attempts, 1);
    assert_eq!(uploader.calls_for("200").len(), 1);
    assert!(started.elapsed() < RETRY_DELAY, "no retry delay expected");
    assert!(report.is_success());
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_until_success() {
    let uploader = Arc::new(FakeUploader::new().script("300", Script::FailTimes(3, Failure::Unavailable)));
    let report = dispatcher(config(2), &uploader).run(records(&["300"])).await;

    let rec = &report.records[0];
    assert_eq!(rec.outcome, Outcome::Uploaded);
    assert_eq!(rec.attempts, 4);

    let calls = uploader.calls_for("300");
    assert_eq!(calls.len(), 4);
    assert_min_gaps(&calls, RETRY_DELAY);
}

#[tokio::test(start_paused = true)]
async fn exhausted_record_does_not_block_the_batch() {
    let uploader = Arc::new(FakeUploader::new().script("bad", Script::AlwaysFail(Failure::Reset)));
    let report = dispatcher(config(2), &uploader)
        .run(records(&["ok-1", "bad", "ok-2", "ok-3"]))
        .await;

    let bad = &report.records[1];
    assert_eq!(bad.attempts, 10);
    match &bad.outcome {
        Outcome::Exhausted { last_error } => assert!(last_error.contains("connection reset")),
        other => panic!("expected Exhausted, got {other:?}"),
    }

    let calls = uploader.calls_for("bad");
    assert_eq!(calls.len(), 10);
    assert_min_gaps(&calls, RETRY_DELAY);

    assert_eq!(report.uploaded(), 3);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_success());
}

#[tokio::test(start_paused = true)]
async fn retry_budget_follows_config() {
    let uploader = Arc::new(FakeUploader::new().script("x", Script::AlwaysFail(Failure::Reset)));
    let config = DispatchConfig {
        max_attempts: 3,
        ..config(1)
    };
    let started = Instant::now();
    let report = dispatcher(config, &uploader).run(records(&["x"])).await;

    assert_eq!(report.records[0].attempts, 3);
    assert_eq!(uploader.calls_for("x").len(), 3);
    // Two delays between three attempts, none after the last.
    assert!(started.elapsed() >= RETRY_DELAY * 2);
    assert!(started.elapsed() < RETRY_DELAY * 3);
}

#[tokio::test(start_paused = true)]
async fn body_read_failures_are_retried() {
    let uploader = Arc::new(
        FakeUploader::new().script("400", Script::FailTimes(2, Failure::TruncatedBody)),
    );
    let report = dispatcher(config(2), &uploader).run(records(&["400"])).await;

    let rec = &report.records[0];
    assert_eq!(rec.outcome, Outcome::Uploaded);
    assert_eq!(rec.attempts, 3);

    let calls = uploader.calls_for("400");
    assert_eq!(calls.len(), 3);
    assert_min_gaps(&calls, RETRY_DELAY);
}

#[tokio::test(start_paused = true)]
async fn serialize_failures_are_retried() {
    let uploader = Arc::new(
        FakeUploader::new().script("500", Script::FailTimes(4, Failure::Unserializable)),
    );
    let report = dispatcher(config(2), &uploader).run(records(&["500"])).await;

    let rec = &report.records[0];
    assert_eq!(rec.outcome, Outcome::Uploaded);
    assert_eq!(rec.attempts, 5);
    assert_min_gaps(&uploader.calls_for("500"), RETRY_DELAY);
}

#[tokio::test(start_paused = true)]
async fn unreadable_body_exhausts_without_blocking_the_batch() {
    let uploader = Arc::new(
        FakeUploader::new()
            .script("trunc", Script::AlwaysFail(Failure::TruncatedBody))
            .script("late", Script::FailTimes(1, Failure::Unserializable)),
    );
    let report = dispatcher(config(2), &uploader)
        .run(records(&["ok-1", "trunc", "late", "ok-2"]))
        .await;

    let trunc = &report.records[1];
    assert_eq!(trunc.attempts, 10);
    match &trunc.outcome {
        Outcome::Exhausted { last_error } => {
            assert!(last_error.contains("failed to read response body"))
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(uploader.calls_for("trunc").len(), 10);

    assert_eq!(report.records[2].attempts, 2);
    assert_eq!(report.uploaded(), 3);
    assert_eq!(report.failed(), 1);
}

// ---------------------------------------------------------------------------
// Assignment and backpressure
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn busy_pool_queues_records_without_dropping() {
    let uploader = Arc::new(FakeUploader::new().latency(Duration::from_secs(2)));
    let codes = ["1", "2", "3", "4"];
    let report = dispatcher(config(1), &uploader).run(records(&codes)).await;

    assert_eq!(report.uploaded(), 4);
    assert!(report.records.iter().all(|r| r.worker == Some(0)));

    // One worker: records go out strictly in input order, one at a time.
    let firsts: Vec<Instant> = codes.iter().map(|c| uploader.calls_for(c)[0]).collect();
    assert_min_gaps(&firsts, Duration::from_secs(2));
    assert_eq!(uploader.max_in_flight(), 1);

    // Each record reached an idle worker; none sat behind another in an inbox.
    for rec in &report.records {
        assert_eq!(rec.inbox_wait_ms, Some(0), "record {} queued in an inbox", rec.code);
    }
}

#[tokio::test(start_paused = true)]
async fn workers_never_hold_two_records_at_once() {
    let uploader = Arc::new(
        FakeUploader::new()
            .script("r3", Script::FailTimes(1, Failure::Unavailable))
            .latency(Duration::from_millis(500)),
    );
    let codes: Vec<String> = (0..12).map(|i| format!("r{i}")).collect();
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let report = dispatcher(config(3), &uploader).run(records(&refs)).await;

    assert_eq!(report.total(), 12);
    assert!(report.is_success());
    assert_eq!(uploader.max_in_flight(), 3);

    let used: HashSet<usize> = report.records.iter().filter_map(|r| r.worker).collect();
    assert_eq!(used.len(), 3);

    for rec in &report.records {
        assert_eq!(rec.inbox_wait_ms, Some(0), "record {} queued in an inbox", rec.code);
    }
}

#[tokio::test(start_paused = true)]
async fn record_is_never_queued_behind_a_slow_one() {
    // One worker stuck in long retries must not accumulate a backlog; the
    // other records all flow through the free worker.
    let uploader = Arc::new(
        FakeUploader::new()
            .script("slow", Script::FailTimes(3, Failure::Unavailable))
            .latency(Duration::from_secs(2)),
    );
    let codes = ["slow", "a", "b", "c", "d", "e"];
    let report = dispatcher(config(2), &uploader).run(records(&codes)).await;

    assert!(report.is_success());
    let slow_worker = report.records[0].worker;
    for rec in &report.records[1..] {
        assert_eq!(rec.inbox_wait_ms, Some(0), "record {} queued in an inbox", rec.code);
        assert_ne!(rec.worker, slow_worker, "record {} went to the busy worker", rec.code);
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_uploader_abandons_only_that_record() {
    let uploader = Arc::new(FakeUploader::new().script("boom", Script::Panic));
    let report = dispatcher(config(2), &uploader)
        .run(records(&["ok-1", "boom", "ok-2", "ok-3"]))
        .await;

    assert_eq!(report.total(), 4);
    assert!(matches!(
        report.records[1].outcome,
        Outcome::Abandoned { .. }
    ));
    assert_eq!(report.uploaded(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_worker_never_swallows_a_healthy_record() {
    // Real threads and real time: the dispatcher races the dying worker.
    let uploader = Arc::new(
        FakeUploader::new()
            .script("boom", Script::Panic)
            .latency(Duration::from_millis(5)),
    );
    let mut codes: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();
    codes[4] = "boom".to_string();
    let refs: Vec<&str> = codes.iter().map(String::as_str).collect();
    let config = DispatchConfig {
        backoff: Duration::from_millis(20),
        ..config(3)
    };
    let report = dispatcher(config, &uploader).run(records(&refs)).await;

    assert_eq!(report.total(), 30);
    for rec in &report.records {
        if rec.code == "boom" {
            assert!(matches!(rec.outcome, Outcome::Abandoned { .. }));
        } else {
            assert_eq!(rec.outcome, Outcome::Uploaded, "record {}", rec.code);
        }
    }
}

#[test]
fn zero_workers_is_rejected() {
    let uploader = Arc::new(FakeUploader::new());
    let result = Dispatcher::new(config(0), uploader);
    assert!(result.is_err());
}

#[test]
fn zero_attempt_budget_is_rejected() {
    let uploader = Arc::new(FakeUploader::new());
    let config = DispatchConfig {
        max_attempts: 0,
        ..config(2)
    };
    assert!(Dispatcher::new(config, uploader).is_err());
}

#[test]
fn zero_backoff_is_rejected() {
    let uploader = Arc::new(FakeUploader::new());
    let config = DispatchConfig {
        backoff: Duration::ZERO,
        ..config(2)
    };
    assert!(Dispatcher::new(config, uploader).is_err());
}
