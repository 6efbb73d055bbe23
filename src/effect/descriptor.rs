//! Effect and operation descriptors (spec §3 "Effect", §6 "Operation-
//! definition surface").

use crate::effect::continuation::Resume;
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// A named tag plus an ordered operation list. Two effects with the same
/// name but different identity are distinct — identity is a freshly
/// allocated counter, not the name string, so `Effect::new("state")` twice
/// yields two unrelated effects (spec §3).
#[derive(Debug, Clone)]
pub struct Effect {
    id: u64,
    pub name: &'static str,
    pub operations: Vec<&'static str>,
}

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

impl Effect {
    pub fn new(name: &'static str, operations: &[&'static str]) -> Self {
        Self {
            id: NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed),
            name,
            operations: operations.to_vec(),
        }
    }

    pub fn id(&self) -> EffectTag {
        EffectTag(self.id)
    }

    pub fn operation_index(&self, name: &str) -> Option<usize> {
        self.operations.iter().position(|op| *op == name)
    }

    /// Yield with no argument, sharing one process-wide null [`Value`]
    /// rather than allocating a fresh one per call (spec §8 boundary
    /// properties; `original_source/test/test-yieldn.c`'s `yieldN` wraps
    /// the same zero-arg case this way).
    pub fn yield0(&self, op_name: &'static str) -> Value {
        crate::effect::core::yield_(self.id(), op_name, Value::null())
    }

    pub fn yield1(&self, op_name: &'static str, arg: Value) -> Value {
        crate::effect::core::yield_(self.id(), op_name, arg)
    }
}

/// Identity of an effect, independent of its name (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectTag(u64);

/// Resumption discipline an operation commits to at handler-registration
/// time (spec §3 "Operation kind"). The runtime picks the cheapest correct
/// implementation based on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Opfun absent; propagate to the next enclosing handler.
    Forward,
    /// Guaranteed no resume; scoped exits may be skipped during unwind.
    NoResumeX,
    /// Guaranteed no resume; scoped exits still run.
    NoResume,
    /// At most one resume, in tail position, and no further operations are
    /// invoked by the opfun. No skip frame is needed.
    TailNoop,
    /// At most one resume, in tail position. A skip frame hides this
    /// handler from operations the opfun itself invokes.
    Tail,
    /// Resumes only within the opfun's lexical scope.
    Scoped,
    /// May resume zero, one, or many times, possibly outside the opfun's
    /// scope. Requires a full continuation snapshot.
    General,
}

/// The user-supplied implementation of one operation inside a handler.
pub type OpFun = Box<dyn for<'a> Fn(Resume<'a>, Value, Value) -> Value + Send>;

pub struct OperationDef {
    pub kind: OperationKind,
    pub name: &'static str,
    pub opfun: Option<OpFun>,
}

impl OperationDef {
    pub fn forward(name: &'static str) -> Self {
        Self {
            kind: OperationKind::Forward,
            name,
            opfun: None,
        }
    }

    pub fn new(kind: OperationKind, name: &'static str, opfun: OpFun) -> Self {
        assert!(
            kind != OperationKind::Forward,
            "Forward operations carry no opfun; use OperationDef::forward"
        );
        Self {
            kind,
            name,
            opfun: Some(opfun),
        }
    }
}

/// A handler's operation table, indexed the same way as the effect
/// descriptor's operation list (spec §6: "Operation indices in the handler
/// table must equal their index in the effect descriptor").
pub struct OperationTable {
    pub ops: Vec<OperationDef>,
}

impl OperationTable {
    pub fn get(&self, index: usize) -> Option<&OperationDef> {
        self.ops.get(index)
    }
}
