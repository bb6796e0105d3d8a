//! Per-record span helpers.

use crate::model::RecordState;
use tracing::Span;

/// Start a span covering one record from dispatch to its terminal state.
///
/// `record.worker` and `record.outcome` are filled in by the worker.
pub fn start_record_span(code: &str, index: usize) -> Span {
    tracing::info_span!(
        "record.upload",
        "record.code" = code,
        "record.index" = index,
        "record.worker" = tracing::field::Empty,
        "record.outcome" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: RecordState, to: RecordState) {
    span.in_scope(|| {
        tracing::debug!(from = %from, to = %to, "state_transition");
    });
}
