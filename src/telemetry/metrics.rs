//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("coa-sync")
}

/// Counter: records handed to a worker.
pub fn records_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("coa.records.dispatched")
        .with_description("Records delivered to a worker inbox")
        .build()
}

/// Counter: remote upload attempts.
/// Labels: `result` ("ok" | "duplicate" | "error").
pub fn upload_attempts() -> Counter<u64> {
    meter()
        .u64_counter("coa.upload.attempts")
        .with_description("Remote upload attempts")
        .build()
}

/// Counter: records reaching a terminal state.
/// Labels: `outcome`.
pub fn records_completed() -> Counter<u64> {
    meter()
        .u64_counter("coa.records.completed")
        .with_description("Records that reached a terminal state")
        .build()
}

/// Counter: times the dispatcher found every worker busy.
pub fn dispatch_backoffs() -> Counter<u64> {
    meter()
        .u64_counter("coa.dispatch.backoffs")
        .with_description("Dispatcher waits for a free worker")
        .build()
}

/// Histogram: single upload attempt duration in milliseconds.
pub fn upload_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("coa.upload.duration_ms")
        .with_description("Remote upload attempt duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: time a record waited in a worker inbox before its first attempt.
pub fn inbox_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("coa.worker.inbox_wait_ms")
        .with_description("Inbox wait before first attempt in milliseconds")
        .with_unit("ms")
        .build()
}
