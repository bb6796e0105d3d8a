//! Completion tracking: one signal per record, caller parks until all arrive.
//!
//! Every dispatched record carries a [`Ticket`]. A ticket signals exactly
//! once, either through [`Ticket::complete`] or, if it is dropped first, as
//! [`Outcome::Abandoned`]. Under-counting would hang the caller and
//! over-counting would release it early, so the tracker also refuses a
//! second signal for the same slot.

use crate::model::{Outcome, RecordReport};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::error;

struct Slots {
    reports: Vec<Option<RecordReport>>,
    remaining: usize,
}

/// Counts terminal signals for a batch of known size.
pub struct CompletionTracker {
    slots: Mutex<Slots>,
    all_done: Notify,
}

impl CompletionTracker {
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(Slots {
                reports: vec![None; expected],
                remaining: expected,
            }),
            all_done: Notify::new(),
        })
    }

    /// Issue the ticket for record `index`.
    pub fn ticket(self: &Arc<Self>, index: usize, code: impl Into<String>) -> Ticket {
        Ticket {
            tracker: Some(Arc::clone(self)),
            index,
            code: code.into(),
            worker: None,
            dispatched_at: None,
            inbox_wait: None,
            attempts: 0,
        }
    }

    /// Records still waiting for their terminal signal.
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Store a terminal report. Returns false if the slot was already filled
    /// or does not exist; such signals are not counted.
    pub fn signal(&self, report: RecordReport) -> bool {
        let mut slots = self.lock();
        let index = report.index;
        match slots.reports.get(index) {
            Some(None) => {}
            Some(Some(_)) => {
                error!(index, code = %report.code, "duplicate completion signal ignored");
                return false;
            }
            None => {
                error!(index, code = %report.code, "completion signal for unknown record");
                return false;
            }
        }
        slots.reports[index] = Some(report);
        slots.remaining -= 1;
        if slots.remaining == 0 {
            // notify_one stores a permit, so a waiter arriving later still wakes.
            self.all_done.notify_one();
        }
        true
    }

    /// Park until every record has signaled, then return the reports in
    /// input order.
    pub async fn wait(&self) -> Vec<RecordReport> {
        loop {
            {
                let mut slots = self.lock();
                if slots.remaining == 0 {
                    return std::mem::take(&mut slots.reports)
                        .into_iter()
                        .flatten()
                        .collect();
                }
            }
            self.all_done.notified().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Obligation to report one record's terminal state.
pub struct Ticket {
    tracker: Option<Arc<CompletionTracker>>,
    index: usize,
    code: String,
    worker: Option<usize>,
    dispatched_at: Option<Instant>,
    inbox_wait: Option<Duration>,
    attempts: u32,
}

impl Ticket {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Mark the record as handed to `worker`, or taken back with `None`.
    pub(crate) fn set_worker(&mut self, worker: Option<usize>) {
        self.worker = worker;
        self.dispatched_at = worker.map(|_| Instant::now());
    }

    pub(crate) fn record_attempt(&mut self) {
        if self.attempts == 0 {
            self.inbox_wait = self.dispatched_at.map(|at| at.elapsed());
        }
        self.attempts += 1;
    }

    /// How long the record sat in the inbox before its first attempt.
    pub fn inbox_wait(&self) -> Option<Duration> {
        self.inbox_wait
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Report the terminal outcome. Consumes the ticket.
    pub fn complete(mut self, outcome: Outcome) {
        self.emit(outcome);
    }

    fn emit(&mut self, outcome: Outcome) {
        let Some(tracker) = self.tracker.take() else {
            return;
        };
        tracker.signal(RecordReport {
            index: self.index,
            code: std::mem::take(&mut self.code),
            worker: self.worker,
            attempts: self.attempts,
            inbox_wait_ms: self.inbox_wait.map(|d| d.as_millis() as u64),
            outcome,
            finished_at: Utc::now(),
        });
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.tracker.is_some() {
            let reason = match self.worker {
                Some(worker) => format!("worker {worker} stopped before the record finished"),
                None => "no worker available to take the record".to_string(),
            };
            error!(index = self.index, code = %self.code, %reason, "record abandoned");
            self.emit(Outcome::Abandoned { reason });
        }
    }
}
