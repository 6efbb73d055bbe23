//! `async_main` (spec §6): the embedding application's entry point into
//! the Async Core. Installs a [`ThreadDriver`], the `async_io` handler it
//! backs, and a root [`CancellationScope`] for the duration of `body`,
//! mirroring how `nodec`'s `async_main` wraps a whole program in one
//! reactor lifetime.

use crate::async_rt::effect_ops::with_async_handler;
use crate::async_rt::io_driver::{IoDriver, ThreadDriver};
use crate::async_rt::scope::{self, CancellationScope};
use crate::config::RuntimeConfig;
use crate::value::Value;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT_DRIVER: RefCell<Option<Arc<dyn IoDriver>>> = RefCell::new(None);
}

/// The driver installed by the innermost enclosing [`async_main`] call on
/// this thread. `Arc`, not `Rc`: `combinators.rs`'s strands clone it
/// across the OS threads they spawn, each installing its own `async_io`
/// handler around the shared driver.
///
/// # Panics
/// Panics if called outside an `async_main` scope — matching
/// `nodec`'s own assumption that async primitives only make sense inside
/// an installed event loop.
pub fn current_driver() -> Arc<dyn IoDriver> {
    CURRENT_DRIVER.with(|d| {
        d.borrow()
            .clone()
            .expect("effectio: async primitive used outside async_main")
    })
}

/// Run `body` with a fresh [`ThreadDriver`], its `async_io` handler, and a
/// root [`CancellationScope`] installed for the duration of the call.
pub fn async_main(config: &RuntimeConfig, body: impl FnOnce() -> Value) -> Value {
    let _ = config;
    let driver: Arc<dyn IoDriver> = Arc::new(ThreadDriver::new());
    let previous = CURRENT_DRIVER.with(|d| d.borrow_mut().replace(driver.clone()));
    let root = CancellationScope::root();
    let result = with_async_handler(driver, || scope::with_scope(&root, body));
    CURRENT_DRIVER.with(|d| *d.borrow_mut() = previous);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_main_installs_and_tears_down_a_driver() {
        let result = async_main(&RuntimeConfig::default(), || {
            let _ = current_driver();
            Value::from_i64(5)
        });
        assert_eq!(result.as_i64(), 5);
    }

    #[test]
    #[should_panic(expected = "outside async_main")]
    fn current_driver_panics_outside_async_main() {
        let _ = current_driver();
    }
}
