//! C5 — Async Core: everything here is built as ordinary Rust over the
//! Effect Core's primitives and a couple of small concurrency helpers
//! (spec §4.5). `spec.md` places the real OS event loop, TCP/HTTP/DNS
//! parsing, and epoll/io_uring plumbing out of scope; [`io_driver`] gives
//! that boundary a concrete trait and one reference implementation.

pub mod channel;
pub mod combinators;
pub mod effect_ops;
pub mod entry;
pub mod io_driver;
pub mod request;
pub mod scope;

pub use channel::Channel;
pub use combinators::{first_of, interleave, timeout};
pub use effect_ops::{owner_release, req_await, req_await_for, req_register, uv_cancel, uv_loop, with_async_handler};
pub use entry::async_main;
pub use io_driver::{IoDriver, ThreadDriver};
pub use request::{AsyncRequest, RequestId};
pub use scope::CancellationScope;
