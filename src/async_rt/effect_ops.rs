//! `async_io` (spec §4.5.1): the five async-handler operations a strand
//! yields through to reach the reactor, replacing `request.rs`'s former
//! free-function `req_await` (which polled [`IoDriver`] directly, bypassing
//! the Effect Core entirely). `req_await`, `uv_loop`, `req_register`,
//! `uv_cancel`, and `owner_release` are all `TailNoop`: each opfun runs its
//! polling/registry logic in place and resumes synchronously before
//! returning, so installing this handler costs no continuation capture —
//! the same reasoning `linear.rs`'s `defer` uses for never registering a
//! `Scoped`/`General` operation.
//!
//! [`with_async_handler`] installs the handler; its private state (the
//! driver plus the table of in-flight requests) lives in the handler's
//! `local` cell as a boxed [`AsyncHandlerState`], read by every opfun
//! through [`with_state`] and dropped exactly once by `release_state` when
//! the handled region ends.

use crate::async_rt::io_driver::IoDriver;
use crate::async_rt::request::{AsyncRequest, Owner, RequestId};
use crate::async_rt::scope;
use crate::effect::continuation::Resume;
use crate::effect::core::handle;
use crate::effect::descriptor::{Effect, OperationDef, OperationKind, OperationTable};
use crate::error::Fault;
use crate::handler_stack::ReleaseFun;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static ASYNC_IO_EFFECT: OnceLock<Effect> = OnceLock::new();

fn async_io_effect() -> &'static Effect {
    ASYNC_IO_EFFECT.get_or_init(|| {
        Effect::new(
            "async_io",
            &["req_await", "uv_loop", "req_register", "uv_cancel", "owner_release"],
        )
    })
}

struct AsyncHandlerState {
    driver: Arc<dyn IoDriver>,
    registry: RefCell<HashMap<RequestId, AsyncRequest>>,
}

/// Borrow the handler's private state for the duration of `f`. `local` is
/// never consumed here — only [`release_state`] ever calls `into_boxed` on
/// it — so the same boxed state can be read across many opfun calls.
fn with_state<R>(local: Value, f: impl FnOnce(&AsyncHandlerState) -> R) -> R {
    // SAFETY: `local` was produced by `with_async_handler` via
    // `Value::from_boxed(AsyncHandlerState)` and stays alive for the whole
    // handled region; this call happens inside that region.
    let state = unsafe { &*local.as_ptr::<AsyncHandlerState>() };
    f(state)
}

fn release_state(local: Value) {
    drop(unsafe { local.into_boxed::<AsyncHandlerState>() });
}

struct RegisterArgs {
    owner: Option<Owner>,
    deadline: Option<Instant>,
}

struct AwaitArgs {
    deadline: Instant,
    poll_slice: Duration,
    value_on_fire: Value,
    owner: Option<Owner>,
}

fn register(state: &AsyncHandlerState, owner: Option<Owner>, deadline: Option<Instant>) -> RequestId {
    let req = AsyncRequest::new(owner, deadline);
    let id = req.id;
    state.registry.borrow_mut().insert(id, req);
    id
}

fn cancel(state: &AsyncHandlerState, id: RequestId) {
    if state.registry.borrow_mut().remove(&id).is_some() {
        state.driver.cancel(id);
    }
}

fn release_owner(state: &AsyncHandlerState, owner: &Owner) {
    let ids: Vec<RequestId> = state
        .registry
        .borrow()
        .iter()
        .filter(|(_, req)| req.owned_by(owner))
        .map(|(id, _)| *id)
        .collect();
    for id in ids {
        cancel(state, id);
    }
}

/// Drain whatever completions the driver already has ready, without
/// blocking, reaping their registry entries. Returns how many were
/// processed.
fn poll_once(state: &AsyncHandlerState) -> usize {
    let completions = state.driver.poll();
    let n = completions.len();
    let mut registry = state.registry.borrow_mut();
    for c in completions {
        registry.remove(&c.id);
    }
    n
}

/// The polling loop `request.rs`'s free-function `req_await` used to run
/// directly: submit a timer, then wait in `poll_slice` slices until it
/// fires, the calling strand's scope is cancelled, or `deadline` passes
/// (spec §4.5.2). Still a polling loop, not a reactor parking the strand's
/// continuation and waking it from a driver callback — that gap is
/// unchanged from before; what changes is that a strand can now only reach
/// this path through an installed `async_io` handler instead of calling a
/// free function with an explicit driver and scope.
fn await_request(state: &AsyncHandlerState, args: AwaitArgs) -> Result<Value, Fault> {
    let strand_scope = scope::current();
    let id = register(state, args.owner, Some(args.deadline));
    state.driver.submit_timer(id, args.deadline, args.value_on_fire);
    loop {
        if strand_scope.is_cancelled() {
            cancel(state, id);
            return Err(Fault::Cancelled {
                reason: strand_scope
                    .cancellation_reason()
                    .unwrap_or_else(|| "cancelled".to_string()),
            });
        }
        let completions = state.driver.poll_blocking(args.poll_slice);
        let mut found = None;
        {
            let mut registry = state.registry.borrow_mut();
            for c in completions {
                registry.remove(&c.id);
                if c.id == id {
                    found = Some(c.result);
                }
            }
        }
        if let Some(result) = found {
            return match result {
                Ok(v) => Ok(v),
                Err(outcome) => Err(Fault::Cancelled {
                    reason: format!("{outcome:?}"),
                }),
            };
        }
        if state.driver.now() >= args.deadline + args.poll_slice {
            cancel(state, id);
            return Err(Fault::Timeout {
                operation: "req_await".to_string(),
                elapsed_ms: args.poll_slice.as_millis() as u64,
            });
        }
    }
}

fn op_req_await(resume: Resume<'_>, local: Value, arg: Value) -> Value {
    let args = *unsafe { arg.into_boxed::<AwaitArgs>() };
    let result = with_state(local, |state| await_request(state, args));
    resume.tail().unwrap().tail_resume(Value::from_boxed(result));
    Value::null()
}

fn op_req_register(resume: Resume<'_>, local: Value, arg: Value) -> Value {
    let args = *unsafe { arg.into_boxed::<RegisterArgs>() };
    let id = with_state(local, |state| register(state, args.owner, args.deadline));
    resume.tail().unwrap().tail_resume(Value::from_boxed(id));
    Value::null()
}

fn op_uv_cancel(resume: Resume<'_>, local: Value, arg: Value) -> Value {
    let id = *unsafe { arg.into_boxed::<RequestId>() };
    with_state(local, |state| cancel(state, id));
    resume.tail().unwrap().tail_resume(Value::null());
    Value::null()
}

fn op_owner_release(resume: Resume<'_>, local: Value, arg: Value) -> Value {
    let owner = *unsafe { arg.into_boxed::<Owner>() };
    with_state(local, |state| release_owner(state, &owner));
    resume.tail().unwrap().tail_resume(Value::null());
    Value::null()
}

fn op_uv_loop(resume: Resume<'_>, local: Value, _arg: Value) -> Value {
    let count = with_state(local, |state| poll_once(state));
    resume.tail().unwrap().tail_resume(Value::from_u64(count as u64));
    Value::null()
}

/// Install the `async_io` handler around `body`, backed by `driver`. Every
/// `req_await`/`uv_loop`/`req_register`/`uv_cancel`/`owner_release` call
/// inside `body` (including ones made indirectly, by code `body` calls)
/// reaches this handler, not whatever `async_io` handler might be installed
/// further out — the usual `find`-from-the-top handler semantics apply.
pub fn with_async_handler(driver: Arc<dyn IoDriver>, body: impl FnOnce() -> Value) -> Value {
    let state = AsyncHandlerState {
        driver,
        registry: RefCell::new(HashMap::new()),
    };
    let local = Value::from_boxed(state);
    let ops = OperationTable {
        ops: vec![
            OperationDef::new(OperationKind::TailNoop, "req_await", Box::new(op_req_await)),
            OperationDef::new(OperationKind::TailNoop, "uv_loop", Box::new(op_uv_loop)),
            OperationDef::new(OperationKind::TailNoop, "req_register", Box::new(op_req_register)),
            OperationDef::new(OperationKind::TailNoop, "uv_cancel", Box::new(op_uv_cancel)),
            OperationDef::new(OperationKind::TailNoop, "owner_release", Box::new(op_owner_release)),
        ],
    };
    handle(
        async_io_effect(),
        local,
        ops,
        None,
        Some(Arc::new(release_state) as ReleaseFun),
        body,
    )
}

/// Submit a timer request and block the calling strand until it fires, the
/// ambient [`scope::current`] scope is cancelled, or `deadline` passes —
/// whichever comes first (spec §4.5.2). Must run inside
/// [`with_async_handler`] (directly, or by way of [`crate::async_rt::async_main`]).
pub fn req_await(deadline: Instant, poll_slice: Duration, value_on_fire: Value) -> Result<Value, Fault> {
    req_await_for(None, deadline, poll_slice, value_on_fire)
}

/// Like [`req_await`], additionally registering the request under `owner`
/// so a later [`owner_release`] call can reap it (spec §4.5 supplement).
pub fn req_await_for(
    owner: Option<Owner>,
    deadline: Instant,
    poll_slice: Duration,
    value_on_fire: Value,
) -> Result<Value, Fault> {
    let arg = Value::from_boxed(AwaitArgs {
        deadline,
        poll_slice,
        value_on_fire,
        owner,
    });
    let result = async_io_effect().yield1("req_await", arg);
    *unsafe { result.into_boxed::<Result<Value, Fault>>() }
}

/// Register a request against the handler's table without submitting
/// anything to the driver — the registration half of spec §4.5.1's
/// `req_register`, used by code that drives a request's lifecycle itself
/// rather than through `req_await`'s polling loop.
pub fn req_register(owner: Option<Owner>, deadline: Option<Instant>) -> RequestId {
    let arg = Value::from_boxed(RegisterArgs { owner, deadline });
    let result = async_io_effect().yield1("req_register", arg);
    *unsafe { result.into_boxed::<RequestId>() }
}

/// Cancel a request registered via [`req_register`] or still in-flight
/// under [`req_await`]; a no-op if it is not currently registered.
pub fn uv_cancel(id: RequestId) {
    let arg = Value::from_boxed(id);
    async_io_effect().yield1("uv_cancel", arg);
}

/// Cancel every request currently registered under `owner` (spec §4.5
/// supplement: closing a handle reaps whatever is still outstanding
/// against it).
pub fn owner_release(owner: Owner) {
    let arg = Value::from_boxed(owner);
    async_io_effect().yield1("owner_release", arg);
}

/// Pump the driver once for whatever completions are already ready,
/// without blocking. Returns how many were processed.
pub fn uv_loop() -> usize {
    let result = async_io_effect().yield0("uv_loop");
    result.as_u64() as usize
}
