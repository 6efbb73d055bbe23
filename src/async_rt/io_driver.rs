//! The periphery contract (spec §1 Non-goals, §6 External Interfaces;
//! SPEC_FULL.md §6 supplement): the boundary between the Async Core and a
//! real OS event loop. `spec.md` places TCP/HTTP/DNS/epoll/io_uring out of
//! scope as external collaborators referenced only through this trait.
//! [`ThreadDriver`] is the one concrete implementation this crate ships —
//! enough to drive timers and simulated I/O in tests, not a production
//! socket stack.

use crate::async_rt::request::{RequestId, RequestOutcome};
use crate::value::Value;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One request's outcome, as reported back from the driver.
pub struct Completion {
    pub id: RequestId,
    pub result: Result<Value, RequestOutcome>,
}

/// The Async Core's view of an OS event loop (spec §4.5.1, §6 supplement).
/// Implementors own however they actually wait for readiness; the Async
/// Core only ever calls these four operations.
pub trait IoDriver: Send + Sync {
    /// Register a timer that fires at `deadline`, resolving the request
    /// with `value` once it elapses.
    fn submit_timer(&self, id: RequestId, deadline: Instant, value: Value);

    /// Cancel a previously submitted request. A no-op if it already fired.
    fn cancel(&self, id: RequestId);

    /// The driver's notion of "now" — indirected so a future driver could
    /// use a virtual clock; [`ThreadDriver`] just uses the wall clock.
    fn now(&self) -> Instant;

    /// Drain whatever completions are ready without blocking.
    fn poll(&self) -> Vec<Completion>;

    /// Block until at least one completion is ready, or `timeout` elapses.
    fn poll_blocking(&self, timeout: Duration) -> Vec<Completion>;
}

/// A background-thread-driven [`IoDriver`]: every timer gets its own
/// short-lived worker thread that sleeps until its deadline and reports
/// back over a shared `crossbeam_channel`. Good enough to exercise
/// timeouts, `interleave`, and cancellation in tests without a real
/// epoll/io_uring-backed reactor; a production driver would replace this
/// with a single-threaded event loop instead of one thread per timer.
pub struct ThreadDriver {
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    cancelled: Arc<Mutex<HashSet<RequestId>>>,
}

impl ThreadDriver {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            cancelled: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl Default for ThreadDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl IoDriver for ThreadDriver {
    fn submit_timer(&self, id: RequestId, deadline: Instant, value: Value) {
        tracing::trace!(?id, ?deadline, "submit_timer");
        let tx = self.tx.clone();
        let cancelled = self.cancelled.clone();
        std::thread::spawn(move || {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            if cancelled.lock().unwrap().remove(&id) {
                return;
            }
            let _ = tx.send(Completion {
                id,
                result: Ok(value),
            });
        });
    }

    fn cancel(&self, id: RequestId) {
        self.cancelled.lock().unwrap().insert(id);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn poll(&self) -> Vec<Completion> {
        self.rx.try_iter().collect()
    }

    fn poll_blocking(&self, timeout: Duration) -> Vec<Completion> {
        match self.rx.recv_timeout(timeout) {
            Ok(first) => {
                let mut out = vec![first];
                out.extend(self.rx.try_iter());
                out
            }
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_after_deadline() {
        let driver = ThreadDriver::new();
        let id = RequestId::next();
        driver.submit_timer(id, Instant::now() + Duration::from_millis(10), Value::from_i64(1));
        let completions = driver.poll_blocking(Duration::from_secs(1));
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].id, id);
    }

    #[test]
    fn cancelled_timer_never_completes() {
        let driver = ThreadDriver::new();
        let id = RequestId::next();
        driver.submit_timer(id, Instant::now() + Duration::from_millis(50), Value::from_i64(1));
        driver.cancel(id);
        let completions = driver.poll_blocking(Duration::from_millis(150));
        assert!(completions.is_empty());
    }
}
