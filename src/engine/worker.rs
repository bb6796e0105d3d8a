//! Worker: single-slot inbox, one record in flight, bounded retry.

use crate::config::DispatchConfig;
use crate::model::{Outcome, Record, RecordState};
use crate::telemetry::metrics;
use crate::telemetry::record::record_state_transition;
use crate::upload::Uploader;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::completion::Ticket;

/// Attempt budget and spacing for one record.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        }
    }
}

/// A record on its way to (or inside) a worker.
pub(crate) struct Job {
    pub(crate) record: Record,
    pub(crate) ticket: Ticket,
    /// The worker's idle permit, held until the record is terminal.
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) span: Span,
}

/// Dispatcher-side handle to a running worker task.
pub(crate) struct WorkerHandle {
    pub(crate) id: usize,
    inbox: mpsc::Sender<Job>,
    idle: Arc<Semaphore>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn<U: Uploader>(
        id: usize,
        uploader: Arc<U>,
        policy: RetryPolicy,
        freed: Arc<Notify>,
    ) -> Self {
        let (inbox, rx) = mpsc::channel(1);
        let task = tokio::spawn(run_worker(id, rx, uploader, policy, freed));
        Self {
            id,
            inbox,
            idle: Arc::new(Semaphore::new(1)),
            task,
        }
    }

    /// Claim this worker if it has nothing in flight.
    pub(crate) fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.idle).try_acquire_owned().ok()
    }

    /// Non-blocking delivery into the inbox.
    pub(crate) fn offer(&self, job: Job) -> Result<(), TrySendError<Job>> {
        self.inbox.try_send(job)
    }

    /// Close the inbox; the task exits once its current record is done.
    pub(crate) fn close(self) -> JoinHandle<()> {
        let WorkerHandle { inbox, task, .. } = self;
        drop(inbox);
        task
    }
}

async fn run_worker<U: Uploader>(
    id: usize,
    mut inbox: mpsc::Receiver<Job>,
    uploader: Arc<U>,
    policy: RetryPolicy,
    freed: Arc<Notify>,
) {
    debug!(worker = id, "worker started");

    while let Some(job) = inbox.recv().await {
        let Job {
            record,
            mut ticket,
            permit,
            span,
        } = job;
        let mut in_flight = InFlight {
            inbox: &mut inbox,
            permit,
            finished: false,
        };
        span.record("record.worker", id);

        let outcome = process(uploader.as_ref(), &record, &mut ticket, policy, &span)
            .instrument(span.clone())
            .await;

        span.record("record.outcome", outcome.label());
        span.in_scope(|| match &outcome {
            Outcome::Exhausted { last_error } => error!(
                worker = id,
                code = %record.code,
                attempts = ticket.attempts(),
                error = %last_error,
                "cannot process record, retry budget exhausted"
            ),
            _ => info!(
                worker = id,
                code = %record.code,
                attempts = ticket.attempts(),
                outcome = outcome.label(),
                "finished processing record"
            ),
        });
        metrics::records_completed().add(1, &[KeyValue::new("outcome", outcome.label())]);
        if let Some(wait) = ticket.inbox_wait() {
            metrics::inbox_wait_ms().record(wait.as_secs_f64() * 1000.0, &[]);
        }

        ticket.complete(outcome);
        in_flight.finished = true;
        drop(in_flight);
        freed.notify_one();
    }

    debug!(worker = id, "inbox closed, worker exiting");
}

/// Holds the idle permit while a record is in flight.
///
/// If the worker task dies mid-record (the uploader panicked), the inbox is
/// closed before the permit goes back, so the dispatcher sees a closed worker
/// instead of an idle one and cannot strand a record in a dead inbox.
struct InFlight<'a> {
    inbox: &'a mut mpsc::Receiver<Job>,
    permit: Option<OwnedSemaphorePermit>,
    finished: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inbox.close();
        }
        self.permit.take();
    }
}

/// Drive one record from `Dispatched` to `Done`.
///
/// Makes at most `policy.max_attempts` remote calls, sleeping
/// `policy.retry_delay` between failed attempts. A duplicate-key rejection
/// ends the loop as success without a retry.
pub(crate) async fn process<U: Uploader>(
    uploader: &U,
    record: &Record,
    ticket: &mut Ticket,
    policy: RetryPolicy,
    span: &Span,
) -> Outcome {
    let mut state = RecordState::Dispatched;
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        advance(span, &mut state, RecordState::Attempting);
        ticket.record_attempt();

        let started = Instant::now();
        let result = uploader.upload(record).await;
        metrics::upload_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        match result {
            Ok(()) => {
                metrics::upload_attempts().add(1, &[KeyValue::new("result", "ok")]);
                advance(span, &mut state, RecordState::Done);
                return Outcome::Uploaded;
            }
            Err(e) if e.is_duplicate() => {
                metrics::upload_attempts().add(1, &[KeyValue::new("result", "duplicate")]);
                debug!(code = %record.code, "code already exists remotely");
                advance(span, &mut state, RecordState::Done);
                return Outcome::AlreadyExists;
            }
            Err(e) => {
                metrics::upload_attempts().add(1, &[KeyValue::new("result", "error")]);
                warn!(
                    code = %record.code,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "upload attempt failed"
                );
                last_error = e.to_string();
                advance(span, &mut state, RecordState::Retrying);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }
    }

    advance(span, &mut state, RecordState::Done);
    Outcome::Exhausted { last_error }
}

fn advance(span: &Span, state: &mut RecordState, to: RecordState) {
    debug_assert!(
        state.can_transition_to(to),
        "invalid record transition {state} -> {to}"
    );
    record_state_transition(span, *state, to);
    *state = to;
}
