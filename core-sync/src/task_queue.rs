//! # Task Queue
//!
//! Bounded-concurrency worker pool draining a shared list of async jobs.
//!
//! ## Overview
//!
//! `N` workers share one `VecDeque` of jobs. Each worker pops the front job
//! under a mutex, awaits it, and repeats until the list is empty. A job that
//! returns an error or panics is reported through the `on_error` hook and the
//! worker moves on.
//!
//! Stopping is cooperative: [`QueueHandle::stop`] empties the list so no new
//! job starts, while jobs already claimed by a worker run to completion.
//! [`TaskQueue::run`] resolves only after every claimed job has finished.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::task_queue::{job, TaskQueue};
//!
//! let jobs = files.into_iter().map(|f| job(move || sync_one(f))).collect();
//! let queue = TaskQueue::new(jobs, 4);
//! let handle = queue.handle();
//!
//! // elsewhere: handle.stop();
//! let report = queue.run(|err| tracing::warn!(error = %err, "job failed")).await;
//! ```

use crate::{Result, SyncError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// A zero-argument async job
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Wrap an async closure as a [`Job`]
pub fn job<F, Fut>(f: F) -> Job
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// Why a job did not complete
#[derive(Debug)]
pub enum JobError {
    /// The job returned an error
    Failed(SyncError),
    /// The job panicked
    Panicked(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Failed(e) => write!(f, "{}", e),
            JobError::Panicked(msg) => write!(f, "job panicked: {}", msg),
        }
    }
}

/// Final counts of a queue run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Jobs that returned `Ok`
    pub completed: usize,
    /// Jobs that returned `Err` or panicked
    pub errored: usize,
    /// Jobs removed by [`QueueHandle::stop`] before they started
    pub dropped: usize,
}

type SharedJobs = Arc<Mutex<VecDeque<Job>>>;

fn lock(jobs: &SharedJobs) -> MutexGuard<'_, VecDeque<Job>> {
    // A panic never happens while the lock is held, but recover anyway
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable control handle for a running [`TaskQueue`]
#[derive(Clone)]
pub struct QueueHandle {
    jobs: SharedJobs,
    dropped: Arc<AtomicUsize>,
}

impl QueueHandle {
    /// Drop every job not yet claimed by a worker
    ///
    /// Returns how many jobs were dropped. Calling it again, or after the
    /// queue drained, returns 0.
    pub fn stop(&self) -> usize {
        let mut jobs = lock(&self.jobs);
        let dropped = jobs.len();
        jobs.clear();
        drop(jobs);

        self.dropped.fetch_add(dropped, Ordering::SeqCst);
        debug!(dropped, "Task queue stopped");
        dropped
    }

    /// Jobs not yet claimed by a worker
    pub fn remaining(&self) -> usize {
        lock(&self.jobs).len()
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Bounded-concurrency job runner
pub struct TaskQueue {
    jobs: SharedJobs,
    concurrency: usize,
    dropped: Arc<AtomicUsize>,
}

impl TaskQueue {
    /// Create a queue; a concurrency of 0 is treated as 1
    pub fn new(jobs: Vec<Job>, concurrency: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(jobs.into())),
            concurrency: concurrency.max(1),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            jobs: Arc::clone(&self.jobs),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Run until the job list is empty, then wait for in-flight jobs
    ///
    /// Spawns at most one worker per queued job. Must be called from within
    /// a Tokio runtime.
    pub async fn run<F>(self, on_error: F) -> QueueReport
    where
        F: Fn(JobError) + Send + Sync + 'static,
    {
        let on_error = Arc::new(on_error);
        let mut workers = JoinSet::new();

        let worker_count = self.concurrency.min(lock(&self.jobs).len());
        for worker_id in 0..worker_count {
            let jobs = Arc::clone(&self.jobs);
            let on_error = Arc::clone(&on_error);
            workers.spawn(async move { Self::worker(worker_id, jobs, on_error).await });
        }

        let mut report = QueueReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((completed, errored)) => {
                    report.completed += completed;
                    report.errored += errored;
                }
                Err(e) => error!(error = %e, "Task queue worker aborted"),
            }
        }

        report.dropped = self.dropped.load(Ordering::SeqCst);
        debug!(
            completed = report.completed,
            errored = report.errored,
            dropped = report.dropped,
            "Task queue drained"
        );
        report
    }

    async fn worker<F>(worker_id: usize, jobs: SharedJobs, on_error: Arc<F>) -> (usize, usize)
    where
        F: Fn(JobError) + Send + Sync + 'static,
    {
        let mut completed = 0;
        let mut errored = 0;

        loop {
            // Guard is released before the job is awaited
            let Some(next) = lock(&jobs).pop_front() else {
                break;
            };

            match AssertUnwindSafe(next()).catch_unwind().await {
                Ok(Ok(())) => completed += 1,
                Ok(Err(e)) => {
                    errored += 1;
                    on_error(JobError::Failed(e));
                }
                Err(panic) => {
                    errored += 1;
                    on_error(JobError::Panicked(panic_message(panic.as_ref())));
                }
            }
        }

        debug!(worker_id, completed, errored, "Task queue worker finished");
        (completed, errored)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
