//! C4 — Effect Core: `handle` and `yield_`, the two primitives everything
//! else (linear handlers, the async runtime) is built from (spec §4.4.1,
//! §4.4.2).
//!
//! Resumption cost is paid only for the operation kinds that need it.
//! `Tail`/`TailNoop` opfuns run in place at the yield site — no stack
//! capture, no jump. `NoResume`/`NoResumeX`/`Scoped`/`General` opfuns run at
//! the handler's own stack position, reached via a `siglongjmp`; the first
//! two never resume (the intervening native frames are discarded), the
//! last two carry a continuation that can jump back.

use crate::effect::continuation::{self, FullContinuation, Resume, TailResume};
use crate::effect::descriptor::{Effect, EffectTag, OperationKind, OperationTable};
use crate::handler_stack::{self, EffectFrame, Frame, PendingResume, ReleaseFun, ResultFun, ScopedFrame};
use crate::stack::jump::JumpContext;
use crate::stack::snapshot::{self, StackSnapshot};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

#[inline(never)]
fn stack_pointer() -> usize {
    let probe = 0u8;
    &probe as *const u8 as usize
}

/// Install a handler for `effect` around `body` (spec §4.4.1 `handle`).
///
/// `local` is the handler's private state, threaded through every opfun
/// call via [`Resume`]'s companion `local`/`local'` values and readable by
/// `resultfun`/`on_release` on the way out.
pub fn handle(
    effect: &Effect,
    local: Value,
    operations: OperationTable,
    resultfun: Option<ResultFun>,
    on_release: Option<ReleaseFun>,
    body: impl FnOnce() -> Value,
) -> Value {
    let stackbase = stack_pointer();
    let frame_index = handler_stack::with_stack(|s| {
        s.push(Frame::Effect(EffectFrame {
            tag: effect.id(),
            operations: Arc::new(operations),
            local: Cell::new(local),
            ctx: JumpContext::new(),
            stackbase,
            resultfun,
            on_release,
            pending_op: Cell::new(None),
            pending_arg: Cell::new(Value::null()),
            pending_resume: RefCell::new(None),
        }))
    });

    // SAFETY: this call site is re-entered either directly (the `true`
    // branch) or via a `siglongjmp` targeting the saved context (the
    // `false` branch); the frame stays alive in the handler stack across
    // both, and is only popped below, after the result is in hand.
    let first_time = unsafe {
        handler_stack::with_stack(|s| {
            let ef = s.get_mut(frame_index).unwrap().as_effect_mut().unwrap();
            ef.ctx.save()
        })
    };

    let result = if first_time {
        body()
    } else {
        dispatch(frame_index)
    };

    // Spec §4.4.1 step 5: a `body()` completion reached by resuming a
    // `call_resume` call (as opposed to the opfun itself finally returning)
    // means the handler is still logically in scope — the opfun may call
    // `resume` again. Hand the value back to that `call_resume` instead of
    // tearing down the frame; `frame_index` must stay exactly as it is for
    // a possible further resume.
    if continuation::has_fragment(frame_index) {
        continuation::return_through_fragment(frame_index, result);
    }

    let (resultfun, on_release, local_final) = handler_stack::with_stack(|s| match s.pop() {
        Some(Frame::Effect(ef)) => (ef.resultfun, ef.on_release, ef.local.into_inner()),
        _ => crate::error::fatal(crate::error::FatalError::HandlerStackUnderflow),
    });
    if let Some(rel) = on_release {
        rel(local_final);
    }
    match resultfun {
        Some(f) => f(local_final, result),
        None => result,
    }
}

/// Run the opfun an operation was dispatched to, once control has jumped
/// back into this frame's `handle` call.
fn dispatch(frame_index: usize) -> Value {
    let (op_index, arg, resume, local, table) = handler_stack::with_stack(|s| {
        let ef = s.get(frame_index).unwrap().as_effect().unwrap();
        (
            ef.pending_op.get().expect("dispatch with no pending operation"),
            ef.pending_arg.get(),
            ef.pending_resume
                .borrow_mut()
                .take()
                .expect("dispatch with no pending resume"),
            ef.local.get(),
            ef.operations.clone(),
        )
    });
    let opdef = table
        .get(op_index)
        .expect("operation index out of range at dispatch");
    let opfun = opdef
        .opfun
        .as_ref()
        .expect("Forward operation reached dispatch; find() should have skipped it");
    let resume = match resume {
        PendingResume::None => Resume::None,
        PendingResume::Full(rc) => Resume::Full(rc),
    };

    // Spec §4.4.1 step 3: a `Scoped` op's invocation runs wrapped in a
    // pushed scoped frame that owns the resume, so `call_resume` can check
    // it is still within this call's dynamic extent.
    let scoped_cont = match &resume {
        Resume::Full(rc) if rc.is_scoped() => Some(rc.clone()),
        _ => None,
    };
    if let Some(cont) = &scoped_cont {
        handler_stack::with_stack(|s| {
            s.push(Frame::Scoped(ScopedFrame {
                resume: cont.clone(),
            }));
        });
    }
    let result = opfun(resume, local, arg);
    if scoped_cont.is_some() {
        handler_stack::with_stack(|s| match s.pop() {
            Some(Frame::Scoped(_)) => {}
            _ => crate::error::fatal(crate::error::FatalError::HandlerStackUnderflow),
        });
    }
    result
}

/// Invoke `op_name` on the nearest enclosing handler for `tag` (spec §4.4.2
/// `yield`). Blocks (in the coroutine sense: may not return for an
/// arbitrary amount of native-call-stack depth) until the operation's
/// opfun resumes it, or never returns at all if the opfun aborts the
/// handled scope.
pub fn yield_(tag: EffectTag, op_name: &'static str, arg: Value) -> Value {
    let found = handler_stack::with_stack(|s| s.find(tag, op_name));
    let kind = handler_stack::with_stack(|s| {
        s.get(found.frame_index)
            .unwrap()
            .as_effect()
            .unwrap()
            .operations
            .get(found.op_index)
            .unwrap()
            .kind
    });

    match kind {
        OperationKind::Forward => {
            unreachable!("HandlerStack::find never matches a Forward operation")
        }
        OperationKind::TailNoop | OperationKind::Tail => yield_tail(found.frame_index, found.op_index, found.skipped, kind, arg),
        OperationKind::NoResume | OperationKind::NoResumeX => {
            yield_abort(found.frame_index, found.op_index, kind, arg)
        }
        OperationKind::Scoped | OperationKind::General => {
            yield_capture(found.frame_index, found.op_index, kind, arg)
        }
    }
}

fn yield_tail(
    frame_index: usize,
    op_index: usize,
    skipped: usize,
    kind: OperationKind,
    arg: Value,
) -> Value {
    if kind == OperationKind::Tail {
        handler_stack::with_stack(|s| {
            s.push(Frame::Skip { toskip: skipped });
        });
    }
    let (local, table) = handler_stack::with_stack(|s| {
        let ef = s.get(frame_index).unwrap().as_effect().unwrap();
        (ef.local.get(), ef.operations.clone())
    });
    let opfun = table.get(op_index).unwrap().opfun.as_ref().unwrap();

    let resumed = Cell::new(false);
    let slot: Cell<Option<Value>> = Cell::new(None);
    let fallback = opfun(Resume::Tail(TailResume::new(&resumed, &slot)), local, arg);

    if kind == OperationKind::Tail {
        handler_stack::with_stack(|s| {
            s.pop();
        });
    }
    slot.take().unwrap_or(fallback)
}

fn yield_abort(frame_index: usize, op_index: usize, kind: OperationKind, arg: Value) -> Value {
    let (local, table) = handler_stack::with_stack(|s| {
        let ef = s.get(frame_index).unwrap().as_effect().unwrap();
        (ef.local.get(), ef.operations.clone())
    });
    let opfun = table.get(op_index).unwrap().opfun.as_ref().unwrap();
    let result = opfun(Resume::None, local, arg);

    let run_releases = kind == OperationKind::NoResume;
    handler_stack::with_stack(|s| {
        s.pop_up_to(frame_index + 1, |frame| {
            if run_releases {
                if let Some(ef) = frame.as_effect() {
                    if let Some(rel) = &ef.on_release {
                        rel(ef.local.get());
                    }
                }
            }
        });
    });

    handler_stack::with_stack(|s| {
        let ef = s.get(frame_index).unwrap().as_effect().unwrap();
        ef.pending_resume.replace(Some(PendingResume::None));
        ef.pending_op.set(Some(op_index));
        ef.pending_arg.set(result);
    });
    jump_to_handler(frame_index)
}

fn yield_capture(frame_index: usize, op_index: usize, kind: OperationKind, arg: Value) -> Value {
    let scoped = kind == OperationKind::Scoped;
    let stackbase = handler_stack::with_stack(|s| s.get(frame_index).unwrap().as_effect().unwrap().stackbase);
    let top = stack_pointer();

    let mut resume_ctx = JumpContext::new();
    // SAFETY: re-entered either directly below (capturing and jumping
    // away) or later via `FullContinuation::call_resume`'s `siglongjmp`,
    // at which point the matching `StackSnapshot` has just been restored
    // to these same addresses.
    let first_time = unsafe { resume_ctx.save() };

    if first_time {
        let snapshot = unsafe { StackSnapshot::capture(stackbase, top) };
        let frames = handler_stack::with_stack(|s| s.drain_from(frame_index + 1));
        let cont = FullContinuation::capture(snapshot, frames, resume_ctx, scoped, frame_index);

        handler_stack::with_stack(|s| {
            let ef = s.get(frame_index).unwrap().as_effect().unwrap();
            ef.pending_resume
                .replace(Some(PendingResume::Full(cont)));
            ef.pending_op.set(Some(op_index));
            ef.pending_arg.set(arg);
        });
        jump_to_handler(frame_index)
    } else {
        // Arrived here via `FullContinuation::call_resume`'s forward jump;
        // it stashed the resume value in a thread-local handoff cell just
        // before jumping (see `continuation::set_resumed_value`) rather
        // than threading it through the frame, since registers aren't
        // meaningful Rust values across a `siglongjmp`.
        crate::effect::continuation::take_resumed_value()
    }
}

fn jump_to_handler(frame_index: usize) -> ! {
    // Re-read the frame by index right before the jump rather than caching
    // a reference across any of the calls above: the handler stack's
    // backing `Vec` can relocate on push, so a pointer taken earlier could
    // already be stale (spec §9 design note). The frame itself outlives
    // this jump because `handle` does not pop it until the dispatch above
    // has returned a result.
    let ctx_ptr = handler_stack::with_stack(|s| {
        std::ptr::addr_of!(s.get(frame_index).unwrap().as_effect().unwrap().ctx) as usize
    });
    unsafe { (*(ctx_ptr as *const JumpContext)).jump() }
}
