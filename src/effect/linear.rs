//! Linear handlers (spec §4.4.4 `defer`, §4.4.5 exceptions): handlers that
//! can never be the target of a captured continuation because they never
//! register an operation a `Scoped`/`General` yield could find. This is
//! the no-capture fast path — `handle` still pushes a frame, but no
//! continuation is ever built for it.

use crate::effect::core::{handle, yield_};
use crate::effect::descriptor::{Effect, OperationDef, OperationKind, OperationTable};
use crate::handler_stack::ReleaseFun;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Run `body`, guaranteeing `on_release` runs once the handled region is
/// left, whether `body` returned normally or a `NoResume`/`NoResumeX`
/// unwind (an exception, most commonly) passed through it.
pub fn defer(
    on_release: impl Fn(Value) + Send + Sync + 'static,
    body: impl FnOnce() -> Value,
) -> Value {
    let effect = Effect::new("defer", &[]);
    handle(
        &effect,
        Value::null(),
        OperationTable { ops: Vec::new() },
        None,
        Some(Arc::new(on_release) as ReleaseFun),
        body,
    )
}

/// `finally`, ignoring the handled local — runs `on_exit` once the scope
/// is left either way.
pub fn finally(on_exit: impl Fn() + Send + Sync + 'static, body: impl FnOnce() -> Value) -> Value {
    defer(move |_| on_exit(), body)
}

/// Whether an exception's message is a `'static` string literal or an
/// allocated, owned `String` — mirrors the `owned_bits` distinction
/// `nodec`'s exception payload tracks, so release knows whether there is
/// anything to free.
#[derive(Debug, Clone)]
pub enum Message {
    Borrowed(&'static str),
    Owned(String),
}

impl Message {
    pub fn as_str(&self) -> &str {
        match self {
            Message::Borrowed(s) => s,
            Message::Owned(s) => s,
        }
    }
}

/// Reserved exception codes (spec §6 "Exception payload"), in the OS
/// error-number space like every other code an [`Exception`] might carry.
pub const ETHROWCANCEL: i32 = -10000;

/// A thrown value: an OS-error-space code, a short message plus optional
/// structured payload, boxed through a [`Value`] when it crosses the
/// effect boundary (spec §6 "Exception payload").
#[derive(Debug)]
pub struct Exception {
    pub code: i32,
    pub message: Message,
    pub data: Option<Value>,
}

impl Exception {
    pub fn borrowed(message: &'static str) -> Self {
        Self {
            code: 0,
            message: Message::Borrowed(message),
            data: None,
        }
    }

    pub fn owned(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: Message::Owned(message.into()),
            data: None,
        }
    }

    /// A distinguished cancellation exception (spec §4.4.5, §6
    /// `ETHROWCANCEL`): `try_` rethrows these rather than catching them;
    /// only `try_all` is exhaustive enough to catch one.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            code: ETHROWCANCEL,
            message: Message::Owned(reason.into()),
            data: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether this is the distinguished cancellation exception (spec
    /// §4.4.5: "A dedicated cancellation marker identifies cancellation
    /// exceptions").
    pub fn is_cancellation(&self) -> bool {
        self.code == ETHROWCANCEL
    }
}

static EXCEPTION_EFFECT: OnceLock<Effect> = OnceLock::new();

fn exception_effect() -> &'static Effect {
    EXCEPTION_EFFECT.get_or_init(|| Effect::new("exception", &["throw"]))
}

/// Raise `exc` to the nearest enclosing [`try_`] (spec §4.4.5). `throw`'s
/// operation kind is `NoResume`: every frame between here and the
/// catching `try_` is discarded, running their `on_release` hooks, and
/// control never returns here.
pub fn throw(exc: Exception) -> ! {
    let tag = exception_effect().id();
    let arg = Value::from_boxed(exc);
    let _ = yield_(tag, "throw", arg);
    unreachable!("`throw` is a NoResume operation; it cannot be resumed back to its call site")
}

/// Installs the `exception` handler around `body` and catches whatever it
/// throws, unconditionally. Shared by [`try_`] (which rethrows a caught
/// cancellation once the handler frame is off the stack) and [`try_all`]
/// (which never does).
fn catch_any(body: impl FnOnce() -> Value) -> Result<Value, Exception> {
    let threw = Arc::new(AtomicBool::new(false));
    let flag = threw.clone();
    let ops = OperationTable {
        ops: vec![OperationDef::new(
            OperationKind::NoResume,
            "throw",
            Box::new(move |_resume, _local, arg| {
                flag.store(true, Ordering::SeqCst);
                arg
            }),
        )],
    };
    let result = handle(exception_effect(), Value::null(), ops, None, None, body);
    if threw.load(Ordering::SeqCst) {
        Err(*unsafe { result.into_boxed::<Exception>() })
    } else {
        Ok(result)
    }
}

/// Run `body`, catching any [`throw`] that escapes it — except the
/// distinguished cancellation exception, which `try_` is not exhaustive
/// enough to swallow (spec §4.4.5) and rethrows once its own handler frame
/// has already been popped, so the rethrow is seen by the next enclosing
/// handler rather than bouncing straight back into this one.
pub fn try_(body: impl FnOnce() -> Value) -> Result<Value, Exception> {
    match catch_any(body) {
        Err(exc) if exc.is_cancellation() => throw(exc),
        other => other,
    }
}

/// Run each of `bodies` under its own exhaustive catch, independently,
/// collecting every outcome — including cancellation exceptions, which
/// `try_all` catches rather than rethrows (spec §4.4.5) — rather than
/// stopping at the first exception.
pub fn try_all(bodies: Vec<Box<dyn FnOnce() -> Value>>) -> Vec<Result<Value, Exception>> {
    bodies.into_iter().map(catch_any).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defer_runs_on_normal_return() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let result = defer(move |_| ran2.store(true, Ordering::SeqCst), || Value::from_i64(42));
        assert_eq!(result.as_i64(), 42);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn try_catches_throw() {
        let result = try_(|| throw(Exception::borrowed("boom")));
        match result {
            Err(e) => assert_eq!(e.message.as_str(), "boom"),
            Ok(_) => panic!("expected an exception"),
        }
    }

    #[test]
    fn try_passes_through_normal_result() {
        let result = try_(|| Value::from_i64(7));
        assert_eq!(result.unwrap().as_i64(), 7);
    }

    #[test]
    fn try_rethrows_cancellation_to_an_outer_handler() {
        let outer = try_(|| match try_(|| throw(Exception::cancelled("shutdown"))) {
            Ok(v) => v,
            Err(e) => throw(e),
        });
        match outer {
            Err(e) => assert!(e.is_cancellation()),
            Ok(_) => panic!("expected the cancellation to reach the outer try_"),
        }
    }

    #[test]
    fn try_all_catches_cancellation_instead_of_rethrowing() {
        let results = try_all(vec![
            Box::new(|| throw(Exception::cancelled("shutdown"))),
            Box::new(|| Value::from_i64(1)),
        ]);
        assert!(matches!(&results[0], Err(e) if e.is_cancellation()));
        assert_eq!(results[1].as_ref().unwrap().as_i64(), 1);
    }
}
