//! Exception Queue
//!
//! Failures captured from background analyses are never re-raised across
//! the thread boundary. They are pushed here instead and picked up by the
//! foreground, which polls or blocks on the queue.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::RelaxError;

/// A failure captured from an analysis.
#[derive(Debug)]
pub struct CapturedException {
    /// Index of the analysis whose run failed
    pub data_index: usize,
    pub error: RelaxError,
    /// Backtrace captured where the failure was caught
    pub backtrace: String,
    pub timestamp: DateTime<Local>,
}

impl CapturedException {
    pub fn new(data_index: usize, error: RelaxError, backtrace: String) -> Self {
        Self {
            data_index,
            error,
            backtrace,
            timestamp: Local::now(),
        }
    }

    /// The error message.
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Thread-safe FIFO of captured failures.
#[derive(Default)]
pub struct ExceptionQueue {
    items: Mutex<VecDeque<CapturedException>>,
    available: Condvar,
}

impl ExceptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<CapturedException>> {
        self.items.lock()
    }

    pub fn put(&self, exception: CapturedException) {
        self.items().push_back(exception);
        self.available.notify_all();
    }

    /// Removes the oldest entry, if any.
    pub fn try_pop(&self) -> Option<CapturedException> {
        self.items().pop_front()
    }

    /// Waits up to `timeout` for an entry.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<CapturedException> {
        let mut items = self.items();
        self.available
            .wait_while_for(&mut items, |items| items.is_empty(), timeout);
        items.pop_front()
    }

    /// Removes and returns every entry, oldest first.
    pub fn drain(&self) -> Vec<CapturedException> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn clear(&self) {
        self.items().clear();
    }
}

impl std::fmt::Debug for ExceptionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionQueue")
            .field("len", &self.len())
            .finish()
    }
}
