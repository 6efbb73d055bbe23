//! effectio — algebraic effect handlers with first-class delimited
//! continuations, and an async runtime built as operations yielded
//! through them.
//!
//! The crate is organized around the six components `spec.md` §4
//! describes:
//!
//! - [`stack`] — C1 Stack Snapshot, C2 Jump Context: capture/restore a
//!   contiguous slice of the native call stack plus a `setjmp`/`longjmp`
//!   register snapshot. No per-strand fiber stacks; everything runs on one
//!   native stack.
//! - [`handler_stack`] — C3: the shadow stack of handler frames.
//! - [`effect`] — C4: `handle`/`yield_`, continuations, resume handles,
//!   and the linear (no-capture) handlers built on top (`defer`,
//!   exceptions).
//! - [`async_rt`] — C5: the async runtime, built as effect operations.
//!
//! This crate never installs a global `tracing` subscriber; wiring one up
//! is the embedding application's call.

pub mod async_rt;
pub mod config;
pub mod effect;
pub mod error;
pub mod handler_stack;
pub mod stack;
pub mod value;

pub use config::RuntimeConfig;
pub use effect::{
    handle, yield_, Effect, EffectTag, OperationDef, OperationKind, OperationTable, Resume,
};
pub use error::{Fault, FatalError};
pub use value::Value;
