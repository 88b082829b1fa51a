/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::utilities::lock;

/// A single-shot, thread-safe "done" gate
///
/// A `CompletionSignal` transitions exactly once, monotonically, from
/// *pending* to *done* and never resets. Any number of threads may block on
/// [`wait()`](CompletionSignal::wait) or
/// [`wait_timeout()`](CompletionSignal::wait_timeout); all of them are
/// released by the first [`done()`](CompletionSignal::done) call, and any
/// thread arriving afterwards returns immediately.
///
/// [`TcpServer`](crate::TcpServer) and [`TcpReactor`](crate::TcpReactor) use
/// a `CompletionSignal` to implement their blocking `wait()` lifecycle
/// operations. It is safe to share across threads without any additional
/// synchronization.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    done: Mutex<bool>,
    waiters: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self {
            done: Mutex::new(false),
            waiters: Condvar::new(),
        }
    }

    /// Marks the signal as done and releases every parked waiter.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// signal had already been completed.
    pub fn done(&self) -> bool {
        let mut done = lock(&self.done);
        if *done {
            return false;
        }
        *done = true;
        self.waiters.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        *lock(&self.done)
    }

    /// Blocks the calling thread until the signal completes.
    pub fn wait(&self) {
        let mut done = lock(&self.done);
        while !*done {
            done = self
                .waiters
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks the calling thread until the signal completes or the timeout
    /// elapses. Returns `false` on timeout, leaving the signal untouched.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = lock(&self.done);
        while !*done {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return false,
            };
            let (guard, result) = self
                .waiters
                .wait_timeout(done, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            done = guard;
            if result.timed_out() && !*done {
                return false;
            }
        }
        true
    }
}
