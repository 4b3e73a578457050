//! Bounded worker pool
//!
//! Workers are OS threads pulling from a shared `TaskQueue`. Tasks are
//! submitted first, then one poison pill per worker; `join` waits on the
//! completion barrier and then on the threads themselves.
//!
//! A task that returns an error or panics is logged and counted as failed.
//! Either way it is marked done, so the barrier always releases.

pub mod queue;

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use crossbeam::channel::Sender;
use serde::Serialize;
use crate::ui::{ProgressMessage, ProgressPhase};
use crate::Result;

pub use queue::{TaskQueue, WorkItem};

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 10;

/// Counters collected over one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pills_sent: usize,
    pub pills_consumed: usize,
    pub workers_exited: usize,
    /// Items left in the queue after every worker exited
    pub leftover: usize,
}

/// A task that did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
}

/// Everything a finished pool run produced
#[derive(Debug)]
pub struct PoolOutcome<R> {
    pub stats: PoolStats,
    pub results: Vec<R>,
    pub failures: Vec<TaskFailure>,
}

struct Collected<R> {
    results: Vec<R>,
    failures: Vec<TaskFailure>,
}

struct Shared<R> {
    collected: Mutex<Collected<R>>,
    completed: AtomicUsize,
    pills_consumed: AtomicUsize,
    workers_exited: AtomicUsize,
    progress: Option<Sender<ProgressMessage>>,
}

impl<R> Shared<R> {
    fn record(&self, label: String, outcome: std::result::Result<R, String>) {
        let current = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let mut collected = self.collected.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(result) => collected.results.push(result),
            Err(error) => {
                if let Some(tx) = &self.progress {
                    let _ = tx.send(ProgressMessage::Error(format!("{}: {}", label, error)));
                }
                collected.failures.push(TaskFailure { task: label.clone(), error });
            }
        }
        drop(collected);

        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressMessage::Progress {
                phase: ProgressPhase::Extraction,
                current,
                item: Some(label),
            });
        }
    }
}

/// Fixed-size pool configuration
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    progress: Option<Sender<ProgressMessage>>,
}

impl WorkerPool {
    /// Create a pool of `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1), progress: None }
    }

    /// Report each completed task on `tx`
    pub fn with_progress(mut self, tx: Sender<ProgressMessage>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn the workers. They block on the queue until tasks arrive.
    ///
    /// Workers run under the caller's tracing dispatcher, inside a
    /// `worker` span parented to the caller's current span.
    pub fn start<T, R, F>(&self, handler: F) -> Result<RunningPool<T, R>>
    where
        T: Display + Send + 'static,
        R: Send + 'static,
        F: Fn(&T) -> Result<R> + Send + Sync + 'static,
    {
        let queue = Arc::new(TaskQueue::new());
        let shared = Arc::new(Shared {
            collected: Mutex::new(Collected { results: Vec::new(), failures: Vec::new() }),
            completed: AtomicUsize::new(0),
            pills_consumed: AtomicUsize::new(0),
            workers_exited: AtomicUsize::new(0),
            progress: self.progress.clone(),
        });
        let handler = Arc::new(handler);
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let parent = tracing::Span::current();

        let mut running = RunningPool {
            queue,
            shared,
            workers: Vec::with_capacity(self.size),
            dispatched: 0,
            pills_sent: 0,
        };

        for id in 0..self.size {
            let queue = Arc::clone(&running.queue);
            let shared = Arc::clone(&running.shared);
            let handler = Arc::clone(&handler);
            let dispatch = dispatch.clone();
            let parent = parent.clone();

            let handle = thread::Builder::new()
                .name(format!("githist-worker-{}", id))
                .spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || {
                        let span = tracing::info_span!(parent: &parent, "worker", id);
                        let _entered = span.enter();
                        work(&queue, &shared, handler.as_ref());
                    })
                })?;
            running.workers.push(handle);
        }
        tracing::debug!("Started {} workers", running.workers.len());
        Ok(running)
    }

    /// Run `tasks` to completion with `handler`
    pub fn run<T, R, F>(
        &self,
        tasks: impl IntoIterator<Item = T>,
        handler: F,
    ) -> Result<PoolOutcome<R>>
    where
        T: Display + Send + 'static,
        R: Send + 'static,
        F: Fn(&T) -> Result<R> + Send + Sync + 'static,
    {
        let mut running = self.start(handler)?;
        for task in tasks {
            running.submit(task);
        }
        running.shutdown();
        Ok(running.join())
    }
}

fn work<T, R, F>(queue: &TaskQueue<T>, shared: &Shared<R>, handler: &F)
where
    T: Display,
    F: Fn(&T) -> Result<R>,
{
    loop {
        match queue.get() {
            WorkItem::Pill => {
                shared.pills_consumed.fetch_add(1, Ordering::SeqCst);
                break;
            }
            WorkItem::Task(task) => {
                let label = task.to_string();
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler(&task))) {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        tracing::error!("Task {} failed: {}", label, e);
                        Err(e.to_string())
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("Task {} panicked: {}", label, message);
                        Err(format!("panicked: {}", message))
                    }
                };
                shared.record(label, outcome);
                queue.task_done();
            }
        }
    }
    shared.workers_exited.fetch_add(1, Ordering::SeqCst);
    tracing::debug!("Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A pool whose workers are running
pub struct RunningPool<T, R> {
    queue: Arc<TaskQueue<T>>,
    shared: Arc<Shared<R>>,
    workers: Vec<JoinHandle<()>>,
    dispatched: usize,
    pills_sent: usize,
}

impl<T, R> RunningPool<T, R> {
    /// Enqueue one task
    pub fn submit(&mut self, task: T) {
        self.queue.put(task);
        self.dispatched += 1;
    }

    /// Enqueue one poison pill per worker. Further calls do nothing.
    pub fn shutdown(&mut self) {
        if self.pills_sent > 0 {
            return;
        }
        for _ in 0..self.workers.len() {
            self.queue.put_pill();
            self.pills_sent += 1;
        }
    }

    /// Wait on the completion barrier, then for every worker to exit
    pub fn join(mut self) -> PoolOutcome<R> {
        self.shutdown();
        self.queue.join();
        tracing::debug!("All {} tasks marked done", self.dispatched);

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("A worker thread terminated abnormally");
            }
        }

        let collected = {
            let mut guard = self.shared.collected.lock().unwrap_or_else(PoisonError::into_inner);
            Collected {
                results: std::mem::take(&mut guard.results),
                failures: std::mem::take(&mut guard.failures),
            }
        };

        let stats = PoolStats {
            dispatched: self.dispatched,
            succeeded: collected.results.len(),
            failed: collected.failures.len(),
            pills_sent: self.pills_sent,
            pills_consumed: self.shared.pills_consumed.load(Ordering::SeqCst),
            workers_exited: self.shared.workers_exited.load(Ordering::SeqCst),
            leftover: self.queue.len(),
        };
        PoolOutcome { stats, results: collected.results, failures: collected.failures }
    }
}

impl<T, R> Drop for RunningPool<T, R> {
    fn drop(&mut self) {
        // release workers of a pool that was never joined
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
