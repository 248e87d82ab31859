//! The per-session FIFO of pending requests.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::request::Request;

/// Mutex-guarded FIFO with a blocking, timeout-bounded dequeue.
///
/// This is the only structure callers and the session worker share;
/// everything else a session owns is touched by the worker alone. Growth is
/// unbounded: a session whose worker is blocked accumulates requests.
pub(crate) struct RequestQueue {
    items: Mutex<VecDeque<Request>>,
    available: Condvar,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append a request and wake a waiting worker.
    pub(crate) fn push(&self, req: Request) {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(_) => return,
        };
        items.push_back(req);
        self.available.notify_all();
    }

    /// Dequeue the earliest request, blocking up to `timeout` for one to
    /// arrive. Returns `None` on timeout.
    pub(crate) fn pop(&self, timeout: Duration) -> Option<Request> {
        let items = self.items.lock().ok()?;
        let (mut items, _) = self
            .available
            .wait_timeout_while(items, timeout, |items| items.is_empty())
            .ok()?;
        items.pop_front()
    }

    /// Atomically drop every queued request, returning how many were
    /// discarded. Dropping a request drops its resolver, which settles the
    /// caller's promise as abandoned.
    pub(crate) fn clear(&self) -> usize {
        match self.items.lock() {
            Ok(mut items) => {
                let dropped = items.len();
                items.clear();
                dropped
            }
            Err(_) => 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self.items.lock() {
            Ok(items) => items.is_empty(),
            Err(_) => true,
        }
    }
}
