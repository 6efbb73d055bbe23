//! Error taxonomy (spec §7): recoverable [`Fault`]s returned from fallible
//! entry points, and [`FatalError`]s for conditions the spec treats as
//! program-fatal (a missing handler, a misused continuation). Fatal errors
//! go through [`fatal`], which logs and then aborts via an `on_fatal` hook
//! mirroring libhandler's `onfatal`, rather than unwinding — unwinding
//! through handler frames and restored stack snapshots is not a supported
//! recovery path.

use crate::effect::descriptor::EffectTag;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Fault {
    #[error("effect {effect:?} has no handler for operation `{operation}`")]
    Unhandled { effect: EffectTag, operation: String },

    #[error("operation `{operation}` timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("cancellation scope was cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("I/O request failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("async request was cancelled before it completed")]
    RequestCancelled,
}

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("no handler found for effect {effect:?}, operation `{operation}`")]
    OperationNotFound {
        effect: EffectTag,
        operation: String,
    },

    #[error("continuation {id} resumed on a different thread than the one that captured it")]
    CrossThreadResume { id: u64 },

    #[error("continuation {id} was resumed or released more than once")]
    ContinuationAlreadyConsumed { id: u64 },

    #[error("a Tail/TailNoop resume handle was invoked a second time")]
    TailResumedTwice,

    #[error("scoped continuation {id} was resumed outside its opfun's dynamic extent")]
    ScopedContinuationEscaped { id: u64 },

    #[error("handler stack underflow: popped past the bottom frame")]
    HandlerStackUnderflow,

    #[error("async request table is full")]
    RequestTableExhausted,
}

/// Invoked by [`fatal`] instead of unwinding. Defaults to logging at
/// `error` level via `tracing` and then aborting the process. Tests
/// override this with [`set_fatal_hook`] to assert on fatal conditions
/// without actually aborting the test binary.
pub type FatalHook = fn(&FatalError) -> !;

static FATAL_HOOK: OnceLock<FatalHook> = OnceLock::new();

fn default_hook(err: &FatalError) -> ! {
    tracing::error!(error = %err, "effectio: fatal error, aborting");
    std::process::abort();
}

/// Override the fatal-error hook. Intended for test harnesses that want to
/// unwind via panic (using `#[should_panic]`) instead of aborting.
///
/// # Panics
/// Panics if called more than once per process — the hook is a
/// process-wide `OnceLock`, matching `onfatal`'s own one-shot registration
/// in the reference implementation.
pub fn set_fatal_hook(hook: FatalHook) {
    FATAL_HOOK
        .set(hook)
        .unwrap_or_else(|_| panic!("effectio: fatal hook already installed"));
}

pub fn fatal(err: FatalError) -> ! {
    let hook = *FATAL_HOOK.get_or_init(|| default_hook as FatalHook);
    hook(&err)
}
