//! C4 — Effect Core: effect/operation descriptors, the `handle`/`yield_`
//! primitives, first-class continuations, and the linear (no-capture)
//! handlers built on top of them (spec §3, §4.4).

pub mod continuation;
pub mod core;
pub mod descriptor;
pub mod linear;

pub use continuation::Resume;
pub use core::{handle, yield_};
pub use descriptor::{Effect, EffectTag, OperationDef, OperationKind, OperationTable};
