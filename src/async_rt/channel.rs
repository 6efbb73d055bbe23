//! A bounded FIFO value queue with a LIFO stack of blocked waiters, used to
//! hand values between concurrently running strands — most directly, to
//! shuttle completions from an [`crate::async_rt::io_driver::IoDriver`]'s
//! background worker threads back to whichever strand is driving the
//! reactor loop in [`crate::async_rt::entry`]. Built on
//! `parking_lot::{Mutex, Condvar}` rather than the Effect Core: a channel's
//! two ends may genuinely live on different OS threads (the reactor's timer
//! workers are real threads), while continuations may only ever resume on
//! the thread that captured them — so a channel cannot itself be an effect
//! operation the way `req_await` is.

use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Failure returned by [`Channel::emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// The channel is at capacity; the value was not queued.
    NoSpace,
    /// The channel is closed; the value was not queued.
    Closed,
}

struct ChannelState {
    buffer: VecDeque<Value>,
    capacity: usize,
    closed: bool,
    /// Monotonically increasing ticket handed to each blocked waiter, in
    /// the order they blocked. Waiters wake in LIFO order — highest
    /// ticket first.
    next_ticket: u64,
    waiting_tickets: Vec<u64>,
}

struct Inner {
    state: Mutex<ChannelState>,
    not_full: Condvar,
    not_empty: Condvar,
}

/// A single channel, shared cheaply (`Arc`) between its ends.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChannelState {
                    buffer: VecDeque::with_capacity(capacity.max(1)),
                    capacity,
                    closed: false,
                    next_ticket: 0,
                    waiting_tickets: Vec::new(),
                }),
                not_full: Condvar::new(),
                not_empty: Condvar::new(),
            }),
        }
    }

    pub fn close(&self) {
        let mut s = self.inner.state.lock();
        s.closed = true;
        drop(s);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let s = self.inner.state.lock();
        s.capacity > 0 && s.buffer.len() >= s.capacity
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Non-blocking send (spec §4.5.5, §8 boundary property: "channel emit
    /// at full capacity returns `ENOSPC` without side effect on the
    /// queue"). Never waits — fails immediately, leaving the queue
    /// untouched, if there is no room or the channel is closed.
    pub fn emit(&self, value: Value) -> Result<(), EmitError> {
        let mut s = self.inner.state.lock();
        if s.closed {
            return Err(EmitError::Closed);
        }
        if s.capacity != 0 && s.buffer.len() >= s.capacity {
            return Err(EmitError::NoSpace);
        }
        s.buffer.push_back(value);
        drop(s);
        self.inner.not_empty.notify_all();
        Ok(())
    }

    /// Tear the channel down: run `release` once per value still queued
    /// (so an owner can reclaim whatever those values reference), then
    /// close it, waking any blocked `send`/`recv` so cancellation reaches
    /// them instead of leaving them parked forever.
    pub fn free(&self, release: impl Fn(Value)) {
        let mut s = self.inner.state.lock();
        s.closed = true;
        let drained: Vec<Value> = s.buffer.drain(..).collect();
        drop(s);
        for v in drained {
            release(v);
        }
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    /// Send `value`, blocking the calling thread while the channel is at
    /// capacity. Returns `false` if the channel was closed before room
    /// became available.
    pub fn send(&self, value: Value) -> bool {
        let mut s = self.inner.state.lock();
        let ticket = self.register_waiter(&mut s);
        self.inner.not_full.wait_while(&mut s, |s| {
            s.capacity != 0 && s.buffer.len() >= s.capacity && !s.closed
        });
        s.waiting_tickets.retain(|t| *t != ticket);
        if s.closed {
            return false;
        }
        s.buffer.push_back(value);
        drop(s);
        self.inner.not_empty.notify_all();
        true
    }

    /// Receive the next value, blocking while the channel is empty.
    /// Returns `None` once the channel is closed and drained.
    pub fn recv(&self) -> Option<Value> {
        let mut s = self.inner.state.lock();
        let ticket = self.register_waiter(&mut s);
        self.inner
            .not_empty
            .wait_while(&mut s, |s| s.buffer.is_empty() && !s.closed);
        s.waiting_tickets.retain(|t| *t != ticket);
        let value = s.buffer.pop_front();
        drop(s);
        self.inner.not_full.notify_all();
        value
    }

    /// Like [`Self::recv`], giving up and returning `None` if nothing
    /// arrives within `timeout` — used by `timeout`/`interleave` in
    /// `combinators.rs`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Value> {
        let mut s = self.inner.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(v) = s.buffer.pop_front() {
                drop(s);
                self.inner.not_full.notify_all();
                return Some(v);
            }
            if s.closed {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let timed_out = self.inner.not_empty.wait_for(&mut s, deadline - now);
            if timed_out.timed_out() && s.buffer.is_empty() {
                return None;
            }
        }
    }

    /// Record a waiter's arrival order, for the LIFO wakeup policy
    /// (most recently blocked strand resumes first). `Condvar` only offers
    /// `notify_all`/`notify_one` with no ordering control, so
    /// `waiting_tickets` records intent (and is observable by tests) but
    /// actual OS wakeup order among simultaneously-blocked threads is not
    /// strictly enforced — documented as an open simplification rather
    /// than implemented with a custom per-waiter wakeup list.
    fn register_waiter(&self, s: &mut ChannelState) -> u64 {
        let ticket = s.next_ticket;
        s.next_ticket += 1;
        s.waiting_tickets.push(ticket);
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_within_capacity_never_blocks() {
        let ch = Channel::bounded(2);
        assert!(ch.send(Value::from_i64(1)));
        assert!(ch.send(Value::from_i64(2)));
        assert_eq!(ch.recv().map(|v| v.as_i64()), Some(1));
        assert_eq!(ch.recv().map(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn recv_on_closed_empty_channel_returns_none() {
        let ch = Channel::bounded(1);
        ch.close();
        assert!(ch.recv().is_none());
    }

    #[test]
    fn is_full_reflects_capacity() {
        let ch = Channel::bounded(1);
        assert!(!ch.is_full());
        ch.send(Value::from_i64(1));
        assert!(ch.is_full());
    }

    #[test]
    fn recv_timeout_gives_up_when_empty() {
        let ch = Channel::bounded(1);
        assert!(ch.recv_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn emit_fails_fast_at_capacity_without_queuing() {
        let ch = Channel::bounded(1);
        assert_eq!(ch.emit(Value::from_i64(1)), Ok(()));
        assert_eq!(ch.emit(Value::from_i64(2)), Err(EmitError::NoSpace));
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.recv().map(|v| v.as_i64()), Some(1));
    }

    #[test]
    fn emit_on_closed_channel_fails_without_queuing() {
        let ch = Channel::bounded(2);
        ch.close();
        assert_eq!(ch.emit(Value::from_i64(1)), Err(EmitError::Closed));
        assert_eq!(ch.len(), 0);
    }

    #[test]
    fn free_releases_queued_values_and_wakes_blocked_recv() {
        let ch = Channel::bounded(4);
        ch.emit(Value::from_i64(1)).unwrap();
        ch.emit(Value::from_i64(2)).unwrap();

        let released = Arc::new(Mutex::new(Vec::new()));
        let collect = released.clone();
        ch.free(move |v| collect.lock().push(v.as_i64()));

        assert_eq!(*released.lock(), vec![1, 2]);
        assert_eq!(ch.recv(), None, "free must close the channel too");
    }

    #[test]
    fn blocked_recv_wakes_on_send_from_another_thread() {
        let ch = Channel::bounded(1);
        let sender = ch.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.send(Value::from_i64(99));
        });
        let v = ch.recv_timeout(Duration::from_secs(1));
        handle.join().unwrap();
        assert_eq!(v.map(|v| v.as_i64()), Some(99));
    }
}
