//! `AsyncRequest`: the record of one outstanding request against an
//! `async_io` handler (spec §3, §4.5.2).
//!
//! `spec.md` §4.5.1 describes `req_await` as a `General` effect operation.
//! This crate's `req_await` (in `async_rt/effect_ops.rs`) is `TailNoop`,
//! not `General`: its opfun runs a polling loop over
//! [`crate::async_rt::io_driver::IoDriver`] in short slices and resumes
//! synchronously, rather than capturing the calling strand's continuation
//! and letting the reactor resume it later from wherever a completion
//! happens to arrive. That's a deliberate, recorded simplification (see
//! DESIGN.md's `async_rt/effect_ops.rs` entry), not an oversight: a driver
//! completion can arrive on a background OS thread (see `ThreadDriver`),
//! and a captured continuation may only ever be resumed on the thread that
//! captured it (spec §5) — resuming one directly from a driver's callback
//! thread would violate that invariant, so bridging the two properly needs
//! a single-threaded reactor loop driving continuations itself, which this
//! crate does not build out (see `async_rt/combinators.rs`'s doc comment
//! for the same gap from the scheduling side). What this module's
//! `req_await` does get right is routing through the Effect Core at all:
//! every call is dispatched through a handler installed by
//! `with_async_handler`, not a free function reaching past it.

use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The handle-comparable owner of a request (spec §4.5 supplement): the
/// stream/socket/file handle whose closure should reap any requests still
/// outstanding against it. Compared by pointer identity, not content.
pub type Owner = Arc<dyn std::any::Any + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

pub struct AsyncRequest {
    pub id: RequestId,
    pub owner: Option<Owner>,
    pub deadline: Option<Instant>,
}

impl AsyncRequest {
    pub fn new(owner: Option<Owner>, deadline: Option<Instant>) -> Self {
        Self {
            id: RequestId::next(),
            owner,
            deadline,
        }
    }

    /// Whether `owner` is the same handle this request was registered
    /// under (spec §4.5 supplement `owner_release`): pointer-identity
    /// comparison via `Arc::ptr_eq`, not a value comparison.
    pub fn owned_by(&self, owner: &Owner) -> bool {
        match &self.owner {
            Some(o) => Arc::ptr_eq(o, owner),
            None => false,
        }
    }
}

/// What a completed `req_await` resumes with.
pub enum RequestResult {
    Value(Value),
    Outcome(RequestOutcome),
}
