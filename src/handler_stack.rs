//! C3 — Handler Stack: a shadow stack of handler frames, maintained as a
//! plain heap-allocated array independent of the native call stack (spec
//! §4.3). The handler stack is thread-local; continuations must be resumed
//! on the thread that created them (spec §5).

use crate::effect::descriptor::{EffectTag, OperationKind, OperationTable};
use crate::stack::jump::JumpContext;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

pub type ResultFun = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;
pub type ReleaseFun = Arc<dyn Fn(Value) + Send + Sync>;

pub struct EffectFrame {
    pub tag: EffectTag,
    pub operations: Arc<OperationTable>,
    pub local: Cell<Value>,
    pub ctx: JumpContext,
    pub stackbase: usize,
    pub resultfun: Option<ResultFun>,
    /// Runs on both normal exit and abort when present (spec §4.4.4
    /// linear `defer`); `None` for ordinary effect handlers.
    pub on_release: Option<ReleaseFun>,

    // Scratch written by `yield_` just before jumping into `ctx`, read back
    // by `handle` on the second arrival (spec §4.4.1 step 2).
    pub pending_op: Cell<Option<usize>>,
    pub pending_arg: Cell<Value>,
    pub pending_resume: RefCell<Option<PendingResume>>,
}

/// What `yield_` leaves behind for `handle` to dispatch on, for every
/// operation kind except the ones that never resume.
pub enum PendingResume {
    /// `TailNoop`/`Tail`: no heap continuation, resumption (if any) already
    /// happened synchronously inside the opfun call.
    None,
    /// `Scoped`/`General`: a captured continuation.
    Full(Rc<crate::effect::continuation::FullContinuation>),
}

pub struct ScopedFrame {
    pub resume: Rc<crate::effect::continuation::FullContinuation>,
}

pub enum Frame {
    Effect(EffectFrame),
    Skip { toskip: usize },
    /// Wraps a `Scoped` opfun's own call, so a `call_resume` on the
    /// continuation it was handed can check it is still within that
    /// opfun's dynamic extent (spec §4.4.3 "scoped").
    Scoped(ScopedFrame),
}

impl Frame {
    pub fn as_effect(&self) -> Option<&EffectFrame> {
        match self {
            Frame::Effect(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_effect_mut(&mut self) -> Option<&mut EffectFrame> {
        match self {
            Frame::Effect(f) => Some(f),
            _ => None,
        }
    }
}

/// Growth policy for the handler stack's backing array (spec §4.3: "grown
/// geometrically up to a threshold, then linearly").
pub struct GrowthPolicy {
    pub geometric_factor: usize,
    pub linear_step: usize,
    pub threshold: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            geometric_factor: 2,
            linear_step: 64,
            threshold: 1024,
        }
    }
}

/// Found by [`HandlerStack::find`]: the frame, its matching operation
/// index, and how many frames sit between it and the stack top.
pub struct Found {
    pub frame_index: usize,
    pub op_index: usize,
    pub skipped: usize,
}

pub struct HandlerStack {
    frames: Vec<Frame>,
    growth: GrowthPolicy,
}

impl HandlerStack {
    pub fn new(growth: GrowthPolicy) -> Self {
        Self {
            frames: Vec::new(),
            growth,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    /// Append a frame, reserving capacity per the growth policy if needed.
    /// Returns the index the frame now lives at; re-read frames by index
    /// after any call that might push again, since reallocation invalidates
    /// raw references (spec §9 design note).
    pub fn push(&mut self, frame: Frame) -> usize {
        if self.frames.len() == self.frames.capacity() {
            let extra = if self.frames.len() < self.growth.threshold {
                (self.frames.len() * (self.growth.geometric_factor - 1)).max(1)
            } else {
                self.growth.linear_step
            };
            self.frames.reserve(extra);
        }
        self.frames.push(frame);
        self.frames.len() - 1
    }

    /// Release the top frame's resources, then drop it.
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Pop down to (not including) `target`, discarding frames — the path
    /// used by a `NoResume`/`NoResumeX` abort (spec §4.3 `pop-up-to`).
    /// `on_pop` runs on every frame just before it is dropped, so callers
    /// can run release hooks (`NoResume`) or skip that entirely
    /// (`NoResumeX`).
    pub fn pop_up_to(&mut self, target: usize, mut on_pop: impl FnMut(&Frame)) {
        while self.frames.len() > target {
            let frame = self.frames.last().unwrap();
            on_pop(frame);
            self.frames.pop();
        }
    }

    /// Remove and return every frame from `start` to the top, preserving
    /// order — the path used to move frames into a `Scoped`/`General`
    /// continuation being captured (spec §4.3 `append-move-from`, applied
    /// in reverse at capture time).
    pub fn drain_from(&mut self, start: usize) -> Vec<Frame> {
        self.frames.split_off(start)
    }

    /// Walk top-down for the first effect frame whose operation table has
    /// `op_name` bound to a non-`Forward` operation, honoring skip frames
    /// (spec §4.3 `find`).
    ///
    /// # Fatal
    /// Per spec §4.3 and §7, a missing handler is a program-fatal
    /// condition, not a recoverable error.
    pub fn find(&self, tag: EffectTag, op_name: &str) -> Found {
        let mut skip_remaining = 0usize;
        let mut skipped_frames = 0usize;
        for idx in (0..self.frames.len()).rev() {
            match &self.frames[idx] {
                Frame::Skip { toskip } if skip_remaining == 0 => {
                    skip_remaining = *toskip;
                    skipped_frames += 1;
                    continue;
                }
                _ if skip_remaining > 0 => {
                    skip_remaining -= 1;
                    skipped_frames += 1;
                    continue;
                }
                Frame::Effect(ef) if ef.tag == tag => {
                    if let Some(op_index) = ef.operations.ops.iter().position(|o| {
                        o.name == op_name && !matches!(o.kind, OperationKind::Forward)
                    }) {
                        return Found {
                            frame_index: idx,
                            op_index,
                            skipped: skipped_frames,
                        };
                    }
                }
                _ => {}
            }
            skipped_frames += 1;
        }
        crate::error::fatal(crate::error::FatalError::OperationNotFound {
            effect: tag,
            operation: op_name.to_string(),
        })
    }

    /// Bulk-copy frames from `start` to the top, acquiring references for
    /// any continuation-owning frames along the way (spec §4.3
    /// `append-copy-from`). Used when a `General`/`Scoped` yield captures
    /// the handler frames from the handled effect upward.
    pub fn copy_from(&self, start: usize) -> Vec<Frame> {
        clone_frames(&self.frames[start..])
    }

    /// Append previously captured frames onto the live stack (spec §4.3
    /// `append-move-from`), used when resuming a first-class continuation.
    pub fn append_frames(&mut self, frames: Vec<Frame>) -> usize {
        let start = self.frames.len();
        self.frames.extend(frames);
        start
    }
}

/// Clone every frame in `frames`, acquiring fresh `Rc`/`Arc` references
/// rather than moving them. Used both by [`HandlerStack::copy_from`] and by
/// `FullContinuation::call_resume` (spec §4.4.3), which must leave its own
/// captured frames untouched so the same continuation can be resumed again.
pub fn clone_frames(frames: &[Frame]) -> Vec<Frame> {
    frames.iter().map(clone_frame).collect()
}

fn clone_frame(frame: &Frame) -> Frame {
    match frame {
        Frame::Effect(ef) => Frame::Effect(EffectFrame {
            tag: ef.tag,
            operations: ef.operations.clone(),
            local: Cell::new(ef.local.get()),
            ctx: ef.ctx.clone(),
            stackbase: ef.stackbase,
            resultfun: ef.resultfun.clone(),
            on_release: ef.on_release.clone(),
            pending_op: Cell::new(ef.pending_op.get()),
            pending_arg: Cell::new(ef.pending_arg.get()),
            pending_resume: RefCell::new(None),
        }),
        Frame::Skip { toskip } => Frame::Skip { toskip: *toskip },
        Frame::Scoped(s) => Frame::Scoped(ScopedFrame {
            resume: s.resume.clone(),
        }),
    }
}

thread_local! {
    pub static STACK: RefCell<HandlerStack> = RefCell::new(HandlerStack::new(GrowthPolicy::default()));
}

pub fn with_stack<R>(f: impl FnOnce(&mut HandlerStack) -> R) -> R {
    STACK.with(|s| f(&mut s.borrow_mut()))
}
