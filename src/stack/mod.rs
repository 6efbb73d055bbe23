//! Stack Snapshot (C1) and Jump Context (C2): the two primitives the Effect
//! Core builds continuations out of. Everything in this module runs on a
//! single native stack — there is no per-strand fiber stack, matching the
//! spec's Non-goal of direct assembly stack-switching. Capturing a
//! continuation copies out a slice of bytes; resuming it copies those bytes
//! back to the same absolute addresses and jumps.

pub mod jump;
pub mod snapshot;
