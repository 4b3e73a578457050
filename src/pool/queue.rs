//! Joinable task queue
//!
//! A multi-consumer queue of work items plus a counter of unfinished tasks.
//! `join` blocks until every task that was `put` has been marked with
//! `task_done`. Poison pills travel through the same channel but are never
//! counted, so they cannot hold the barrier open.

use std::sync::{Condvar, Mutex, PoisonError};
use crossbeam::channel::{self, Receiver, Sender};

/// An item pulled from the queue
#[derive(Debug, PartialEq, Eq)]
pub enum WorkItem<T> {
    Task(T),
    /// Tells the worker that received it to exit
    Pill,
}

pub struct TaskQueue<T> {
    tx: Sender<WorkItem<T>>,
    rx: Receiver<WorkItem<T>>,
    unfinished: Mutex<usize>,
    all_done: Condvar,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            unfinished: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    /// Enqueue a task and count it as unfinished
    pub fn put(&self, task: T) {
        *self.lock_unfinished() += 1;
        self.send(WorkItem::Task(task));
    }

    /// Enqueue a poison pill
    pub fn put_pill(&self) {
        self.send(WorkItem::Pill);
    }

    /// Block until an item is available
    pub fn get(&self) -> WorkItem<T> {
        // unreachable while the queue is alive: it owns a sender
        self.rx.recv().unwrap_or(WorkItem::Pill)
    }

    /// Mark one previously dequeued task as complete
    pub fn task_done(&self) {
        let mut unfinished = self.lock_unfinished();
        if *unfinished == 0 {
            tracing::warn!("task_done called more times than tasks were queued");
            return;
        }
        *unfinished -= 1;
        if *unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block until every queued task has been marked complete
    pub fn join(&self) {
        let mut unfinished = self.lock_unfinished();
        while *unfinished > 0 {
            unfinished = self.all_done.wait(unfinished).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Tasks queued but not yet marked complete
    pub fn unfinished(&self) -> usize {
        *self.lock_unfinished()
    }

    /// Items (tasks and pills) still waiting in the channel
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn send(&self, item: WorkItem<T>) {
        // the queue owns a receiver, so the channel is never disconnected
        let _ = self.tx.send(item);
    }

    fn lock_unfinished(&self) -> std::sync::MutexGuard<'_, usize> {
        self.unfinished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
