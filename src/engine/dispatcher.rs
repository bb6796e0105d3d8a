//! Dispatcher: owns the worker pool and the batch, blocks until every record
//! is terminal.

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::model::{BatchReport, Record};
use crate::telemetry::metrics;
use crate::telemetry::record::start_record_span;
use crate::upload::Uploader;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::completion::CompletionTracker;
use super::worker::{Job, RetryPolicy, WorkerHandle};

/// Distributes a batch of records across a fixed pool of workers.
pub struct Dispatcher<U: Uploader> {
    config: DispatchConfig,
    uploader: Arc<U>,
}

impl<U: Uploader> Dispatcher<U> {
    /// Fails if the configuration could never finish a batch.
    pub fn new(config: DispatchConfig, uploader: Arc<U>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, uploader })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Upload every record and return once each one is terminal.
    ///
    /// Records are offered to workers in input order. Completion order is
    /// not; the returned report lists records in input order regardless.
    pub async fn run(&self, records: Vec<Record>) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let total = records.len();

        let tracker = CompletionTracker::new(total);
        let freed = Arc::new(Notify::new());
        let policy = RetryPolicy::from(&self.config);
        let mut pool = Pool::spawn(
            self.config.worker_count,
            &self.uploader,
            policy,
            &freed,
        );

        info!(%batch_id, records = total, workers = pool.len(), "batch started");

        for (index, record) in records.into_iter().enumerate() {
            let span = start_record_span(&record.code, index);
            let ticket = tracker.ticket(index, record.code.clone());
            let job = Job {
                record,
                ticket,
                permit: None,
                span,
            };
            self.deliver(job, &mut pool, &freed).await;
        }

        let tasks = pool.shutdown();
        let records = tracker.wait().await;
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }

        let report = BatchReport {
            batch_id,
            records,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %batch_id,
            total = report.total(),
            uploaded = report.uploaded(),
            already_existed = report.already_existed(),
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms,
            "batch finished"
        );
        report
    }

    /// Hand one record to some worker, waiting while they are all busy.
    ///
    /// Never drops the record: if the pool has no live workers left, the
    /// job's ticket reports it as abandoned.
    async fn deliver(&self, mut job: Job, pool: &mut Pool, freed: &Notify) {
        loop {
            job = match pool.try_assign(job) {
                None => {
                    metrics::records_dispatched().add(1, &[]);
                    return;
                }
                Some(job) => job,
            };

            if pool.is_empty() {
                error!(code = job.ticket.code(), "no live workers left");
                return;
            }

            metrics::dispatch_backoffs().add(1, &[]);
            debug!(code = job.ticket.code(), "all workers busy, waiting");
            // A worker finishing wakes us early; the backoff only bounds the wait.
            let _ = tokio::time::timeout(self.config.backoff, freed.notified()).await;
        }
    }
}

/// Live workers plus the round-robin cursor.
struct Pool {
    workers: Vec<WorkerHandle>,
    cursor: usize,
    retired: Vec<JoinHandle<()>>,
}

impl Pool {
    fn spawn<U: Uploader>(
        count: usize,
        uploader: &Arc<U>,
        policy: RetryPolicy,
        freed: &Arc<Notify>,
    ) -> Self {
        let workers = (0..count)
            .map(|id| WorkerHandle::spawn(id, Arc::clone(uploader), policy, Arc::clone(freed)))
            .collect();
        Self {
            workers,
            cursor: 0,
            retired: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.workers.len()
    }

    fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// One round-robin sweep, starting after the last worker that got a
    /// record. Returns the job back if every worker was busy.
    fn try_assign(&mut self, mut job: Job) -> Option<Job> {
        let mut offset = 0;
        while offset < self.workers.len() {
            let slot = (self.cursor + offset) % self.workers.len();
            let worker = &self.workers[slot];

            let Some(permit) = worker.try_reserve() else {
                offset += 1;
                continue;
            };
            job.permit = Some(permit);
            job.ticket.set_worker(Some(worker.id));

            match worker.offer(job) {
                Ok(()) => {
                    self.cursor = (slot + 1) % self.workers.len();
                    return None;
                }
                Err(TrySendError::Full(returned)) => {
                    job = reclaim(returned);
                    offset += 1;
                }
                Err(TrySendError::Closed(returned)) => {
                    job = reclaim(returned);
                    let dead = self.workers.remove(slot);
                    warn!(worker = dead.id, "worker inbox closed, removing from rotation");
                    self.retired.push(dead.close());
                    offset = 0;
                    if self.cursor >= self.workers.len() {
                        self.cursor = 0;
                    }
                }
            }
        }
        Some(job)
    }

    /// Close every inbox and hand back all worker tasks for joining.
    fn shutdown(self) -> Vec<JoinHandle<()>> {
        let Pool {
            workers, retired, ..
        } = self;
        workers
            .into_iter()
            .map(WorkerHandle::close)
            .chain(retired)
            .collect()
    }
}

fn reclaim(mut job: Job) -> Job {
    job.permit = None;
    job.ticket.set_worker(None);
    job
}
