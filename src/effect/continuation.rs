//! Continuations and resume handles (spec §3 "Continuation", §4.4.3 "Resume
//! kinds").
//!
//! A continuation is never shared across threads — it captures a slice of
//! one thread's native stack, so it can only ever be resumed where it was
//! captured (spec §5). It is reference-counted with `Rc`, not `Arc`.

use crate::error::{fatal, FatalError};
use crate::handler_stack::{self, EffectFrame, Frame, ScopedFrame};
use crate::stack::jump::JumpContext;
use crate::stack::snapshot::{self, StackSnapshot};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

static CAPTURED: AtomicU64 = AtomicU64::new(0);
static RELEASED: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Hands a resumed value across a `siglongjmp`: registers are not
    /// meaningful Rust values, so both `call_resume` (jumping forward into
    /// the captured continuation) and `core::handle`'s fragment jump
    /// (jumping back once the handled scope completes) stash their value
    /// here just before jumping, and the matching landing site takes it
    /// back out immediately.
    static RESUMED_VALUE: Cell<Value> = Cell::new(Value::null());

    /// `call_resume` calls currently "in flight" on this thread, keyed by
    /// the handler frame index whose eventual completion should jump back
    /// to that call (spec §4.4.3 steps 2-5, the "fragment" mechanism that
    /// makes `General` resumption multi-shot: `core::handle` checks this
    /// table, not the handler stack itself, once it has computed a result —
    /// the handler-stack invariant that indices stay valid only while
    /// `count` hasn't decreased past them rules out parking a frame there
    /// for this purpose).
    ///
    /// Each `frame_index` carries a stack, not a single slot: a resumed
    /// body that yields again to the same handler before returning (e.g. two
    /// sequential operations under one `General` handler) registers a
    /// second fragment for the same index while the first is still pending,
    /// and completions must unwind them LIFO.
    static FRAGMENTS: RefCell<HashMap<usize, Vec<FragmentReturn>>> = RefCell::new(HashMap::new());
}

pub(crate) fn take_resumed_value() -> Value {
    RESUMED_VALUE.with(|c| c.take())
}

pub(crate) fn set_resumed_value(v: Value) {
    RESUMED_VALUE.with(|c| c.set(v));
}

/// Where a `call_resume` call should be rejoined once the handler frame it
/// resumed into (`frame_index`) finishes for real.
struct FragmentReturn {
    ctx: JumpContext,
    /// The bytes at `call_resume`'s own call site, captured just before the
    /// forward jump overwrote them (the resumed computation reuses the same
    /// absolute stack addresses, since it re-enters the same handler).
    snapshot: StackSnapshot,
}

pub(crate) fn register_fragment(frame_index: usize, ctx: JumpContext, snapshot: StackSnapshot) {
    FRAGMENTS.with(|f| {
        f.borrow_mut()
            .entry(frame_index)
            .or_default()
            .push(FragmentReturn { ctx, snapshot })
    });
}

/// Called by `core::handle` once [`has_fragment`] has confirmed a
/// `call_resume` is waiting on this exact handler to finish (checked before
/// the handler frame itself is touched): pops the most recently registered
/// fragment for `frame_index`, restores its stack bytes, and jumps back
/// into it with `value`, standing in for the normal return `handle` would
/// otherwise make to its own caller.
pub(crate) fn return_through_fragment(frame_index: usize, value: Value) -> ! {
    let frag = FRAGMENTS
        .with(|f| f.borrow_mut().get_mut(&frame_index).and_then(Vec::pop))
        .unwrap_or_else(|| unreachable!("return_through_fragment called with no pending fragment"));
    set_resumed_value(value);
    snapshot::restore_guarded(&frag.snapshot, || unsafe { frag.ctx.jump() })
}

pub(crate) fn has_fragment(frame_index: usize) -> bool {
    FRAGMENTS.with(|f| f.borrow().get(&frame_index).is_some_and(|v| !v.is_empty()))
}

/// `captured - released`, the number of continuations currently alive on
/// this process. Used by tests to check the spec §3 refcount invariant
/// (`resume_live == 0` once a scenario has fully unwound).
pub fn live_count() -> u64 {
    CAPTURED.load(Ordering::SeqCst) - RELEASED.load(Ordering::SeqCst)
}

/// A `General` or `Scoped` continuation: the captured stack slice, the
/// handler frames from the yielding operation's frame upward, and the jump
/// context to re-enter at.
///
/// Unlike a `Tail` resume, this one is multi-shot for `General` operations
/// (spec §3: "may resume zero, one, or many times"): `call_resume` clones
/// the captured handler frames on each call rather than consuming them, and
/// returns once the resumed computation's handled scope actually finishes —
/// it does not simply diverge into the captured stack forever.
pub struct FullContinuation {
    id: u64,
    frame_index: usize,
    cstack: StackSnapshot,
    hstack: RefCell<Vec<Frame>>,
    ctx: JumpContext,
    home_thread: ThreadId,
    /// `Scoped` continuations may resume only while still inside the
    /// opfun's dynamic extent; `General` ones may escape it.
    scoped: bool,
    released: Cell<bool>,
}

impl FullContinuation {
    pub(crate) fn capture(
        cstack: StackSnapshot,
        hstack: Vec<Frame>,
        ctx: JumpContext,
        scoped: bool,
        frame_index: usize,
    ) -> Rc<Self> {
        CAPTURED.fetch_add(1, Ordering::SeqCst);
        Rc::new(Self {
            id: CAPTURED.load(Ordering::SeqCst),
            frame_index,
            cstack,
            hstack: RefCell::new(hstack),
            ctx,
            home_thread: std::thread::current().id(),
            scoped,
            released: Cell::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn check_resumable(&self) {
        if std::thread::current().id() != self.home_thread {
            fatal(FatalError::CrossThreadResume { id: self.id });
        }
        if self.released.get() {
            fatal(FatalError::ContinuationAlreadyConsumed { id: self.id });
        }
        if self.scoped {
            let still_in_scope = handler_stack::with_stack(|s| {
                matches!(
                    s.get(s.len().wrapping_sub(1)),
                    Some(Frame::Scoped(ScopedFrame { resume })) if resume.id() == self.id
                )
            });
            if !still_in_scope {
                fatal(FatalError::ScopedContinuationEscaped { id: self.id });
            }
        }
    }

    /// Resume with `value`, transferring control into the captured stack.
    ///
    /// Returns once the handler frame this continuation was captured from
    /// (`frame_index`) finishes for real (spec §4.4.3 steps 2-5: the
    /// fragment jump in `core::handle` redirects that completion back
    /// here instead of letting it unwind through whatever the restored
    /// call chain's native return addresses would otherwise lead to). `self`
    /// is left untouched and can be resumed again afterward — that's what
    /// makes a `General` resume multi-shot.
    ///
    /// # Safety
    /// Must run on the thread that captured `self`; a `Scoped` continuation
    /// must still be within its opfun's dynamic extent; neither is checked
    /// at the type level (matching libhandler's runtime-checked discipline)
    /// but both are asserted via [`FatalError`].
    pub unsafe fn call_resume(self: &Rc<Self>, value: Value) -> Value {
        self.check_resumable();

        // Step 2 (spec §4.4.3): save a jump context for this call site.
        let mut fragment_ctx = JumpContext::new();
        // SAFETY: re-entered either directly below (the `true` branch,
        // which registers the fragment and jumps forward) or later via
        // `core::handle`'s `return_through_fragment`, whose `siglongjmp`
        // targets this exact saved context once the matching
        // `StackSnapshot` below has been restored to these addresses.
        let first_time = unsafe { fragment_ctx.save() };
        if !first_time {
            return take_resumed_value();
        }

        let top = stack_pointer();
        // Preserve what's about to be overwritten: resuming re-enters the
        // same handler's stack region, which is exactly what `self.cstack`
        // is about to be restored over.
        let fragment_snapshot = unsafe { StackSnapshot::capture(self.cstack.base(), top) };
        register_fragment(self.frame_index, fragment_ctx, fragment_snapshot);

        let frames = handler_stack::clone_frames(&self.hstack.borrow());
        handler_stack::with_stack(|s| {
            s.append_frames(frames);
        });
        set_resumed_value(value);
        let ctx = std::ptr::addr_of!(self.ctx);
        snapshot::restore_guarded(&self.cstack, || unsafe { (*ctx).jump() })
    }

    /// [`Self::call_resume`] followed immediately by [`Self::release`]
    /// (spec §4.4.3 `release_resume`).
    ///
    /// # Safety
    /// Same obligations as [`Self::call_resume`].
    pub unsafe fn release_resume(self: &Rc<Self>, value: Value) -> Value {
        let result = unsafe { self.call_resume(value) };
        self.release();
        result
    }

    /// Release the handler frames this continuation would otherwise have
    /// kept alive, without resuming — used when a caller decides not to
    /// resume after all (spec §4.4.3 `release`).
    pub fn release(&self) {
        if self.released.replace(true) {
            fatal(FatalError::ContinuationAlreadyConsumed { id: self.id });
        }
        RELEASED.fetch_add(1, Ordering::SeqCst);
        self.hstack.borrow_mut().clear();
    }

    pub fn is_scoped(&self) -> bool {
        self.scoped
    }
}

impl Drop for FullContinuation {
    fn drop(&mut self) {
        if !self.released.get() {
            RELEASED.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[inline(never)]
fn stack_pointer() -> usize {
    let probe = 0u8;
    &probe as *const u8 as usize
}

/// A one-shot, stack-confined resume target handed to `Tail`/`TailNoop`
/// opfuns. It cannot outlive the opfun call, matching the spec's promise
/// that tail resumes need no heap continuation at all.
pub struct TailResume<'a> {
    resumed: &'a Cell<bool>,
    slot: &'a Cell<Option<Value>>,
}

impl<'a> TailResume<'a> {
    pub(crate) fn new(resumed: &'a Cell<bool>, slot: &'a Cell<Option<Value>>) -> Self {
        Self { resumed, slot }
    }

    /// Resume in tail position with `value`. May be called at most once;
    /// a second call is a fatal misuse of the `Tail`/`TailNoop` contract.
    pub fn tail_resume(&self, value: Value) {
        if self.resumed.replace(true) {
            fatal(FatalError::TailResumedTwice);
        }
        self.slot.set(Some(value));
    }
}

/// What an opfun receives to resume its operation, shaped by the
/// [`crate::effect::descriptor::OperationKind`] it was registered with
/// (spec §4.4.3).
pub enum Resume<'a> {
    /// `TailNoop`/`Tail`: resume synchronously, at most once, before the
    /// opfun returns.
    Tail(TailResume<'a>),
    /// `Scoped`/`General`: a full continuation the opfun may resume zero,
    /// one, or (for `General`) many times.
    Full(Rc<FullContinuation>),
    /// `NoResume`/`NoResumeX`: no resume is possible; present only so
    /// opfun signatures are uniform across operation kinds.
    None,
}

impl<'a> Resume<'a> {
    pub fn full(&self) -> Option<&Rc<FullContinuation>> {
        match self {
            Resume::Full(r) => Some(r),
            _ => None,
        }
    }

    pub fn tail(&self) -> Option<&TailResume<'a>> {
        match self {
            Resume::Tail(t) => Some(t),
            _ => None,
        }
    }
}
