//! Scenario tests covering the behaviors the rest of this crate's unit
//! tests don't reach in combination: a stateful Tail handler, ambiguous
//! choice via a General handler, exceptions crossing a Tail handler and
//! a `defer`, concurrent requests, and timeouts.

use effectio::async_rt::{
    async_main, interleave, req_await, timeout, with_async_handler, CancellationScope, IoDriver,
    ThreadDriver,
};
use effectio::effect::continuation;
use effectio::effect::linear::{defer, throw, try_, Exception};
use effectio::{
    handle, Effect, Fault, OperationDef, OperationKind, OperationTable, Resume, RuntimeConfig, Value,
};
use pretty_assertions::assert_eq as assert_eq_pretty;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// A Tail handler decrementing a local counter via get/put until it
// reaches zero, then the body returns a constant independent of it.
#[test]
fn state_counter_tail_resume_returns_body_constant() {
    let effect = Effect::new("state", &["get", "put"]);
    let counter = Arc::new(AtomicI64::new(2));
    let get_counter = counter.clone();
    let put_counter = counter.clone();
    let ops = OperationTable {
        ops: vec![
            OperationDef::new(
                OperationKind::Tail,
                "get",
                Box::new(move |resume, _local, _arg| {
                    let v = get_counter.load(Ordering::SeqCst);
                    resume.tail().unwrap().tail_resume(Value::from_i64(v));
                    Value::null()
                }),
            ),
            OperationDef::new(
                OperationKind::Tail,
                "put",
                Box::new(move |resume, _local, arg| {
                    put_counter.store(arg.as_i64(), Ordering::SeqCst);
                    resume.tail().unwrap().tail_resume(Value::null());
                    Value::null()
                }),
            ),
        ],
    };

    let result = handle(&effect, Value::null(), ops, None, None, || {
        while effect.yield0("get").as_i64() > 0 {
            let n = effect.yield0("get").as_i64();
            effect.yield1("put", Value::from_i64(n - 1));
        }
        Value::from_i64(42)
    });

    assert_eq!(result.as_i64(), 42);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(continuation::live_count(), 0);
}

// Build the `amb{flip}` operation table used by both the plain S2 test
// and its composition with `state` below: on each flip, resume with
// `false` then `true` and concatenate the two result lists (spec §8 S2).
fn amb_ops() -> OperationTable {
    OperationTable {
        ops: vec![OperationDef::new(
            OperationKind::General,
            "flip",
            Box::new(|resume, _local, _arg| match resume {
                Resume::Full(cont) => unsafe {
                    let left = cont.call_resume(Value::from_bool(false));
                    let mut left = *left.into_boxed::<Vec<bool>>();
                    let right = cont.call_resume(Value::from_bool(true));
                    let mut right = *right.into_boxed::<Vec<bool>>();
                    cont.release();
                    left.append(&mut right);
                    Value::from_boxed(left)
                },
                _ => unreachable!(),
            }),
        )],
    }
}

// S2 — ambiguous choice. Two sequential flips, handler resumes each one
// twice (false then true) and concatenates; `action = xor of two flips`
// gives `[false,true,true,false]` (spec §8 S2). This exercises a second
// `call_resume` on the same continuation after the first has already run
// to completion and returned, and a nested second flip resumed while the
// first flip's own resume is still unwinding.
#[test]
fn general_handler_double_resume_concatenates_xor_of_two_flips() {
    let effect = Effect::new("amb", &["flip"]);

    let result = handle(&effect, Value::null(), amb_ops(), None, None, || {
        let f1 = effect.yield0("flip").as_bool();
        let f2 = effect.yield0("flip").as_bool();
        Value::from_boxed(vec![f1 ^ f2])
    });

    let list = unsafe { result.into_boxed::<Vec<bool>>() };
    assert_eq!(*list, vec![false, true, true, false]);
    assert_eq!(continuation::live_count(), 0);
}

// Same `amb` handler, but with a Tail-resumed `state` handler installed
// inside its body (the composed case spec §8 S2 calls "state inside
// amb"). The distilled spec's exact composed result lists depend on
// reference-implementation detail this pack's source doesn't resolve
// (§8's own "Open questions" note makes the same call on a related
// signature-reconciliation question), so this checks what is decidable
// from the spec text directly: the xor concatenation is unaffected by an
// inner Tail handler sharing the stack, and no continuation leaks once
// both handlers unwind.
#[test]
fn general_handler_double_resume_composes_with_inner_tail_handler() {
    let amb = Effect::new("amb", &["flip"]);
    let state = Effect::new("state", &["get", "put"]);
    let counter = Arc::new(AtomicI64::new(2));
    let get_counter = counter.clone();
    let put_counter = counter.clone();
    let state_ops = OperationTable {
        ops: vec![
            OperationDef::new(
                OperationKind::Tail,
                "get",
                Box::new(move |resume, _local, _arg| {
                    resume
                        .tail()
                        .unwrap()
                        .tail_resume(Value::from_i64(get_counter.load(Ordering::SeqCst)));
                    Value::null()
                }),
            ),
            OperationDef::new(
                OperationKind::Tail,
                "put",
                Box::new(move |resume, _local, arg| {
                    put_counter.store(arg.as_i64(), Ordering::SeqCst);
                    resume.tail().unwrap().tail_resume(Value::null());
                    Value::null()
                }),
            ),
        ],
    };

    let result = handle(&amb, Value::null(), amb_ops(), None, None, || {
        handle(&state, Value::null(), state_ops, None, None, || {
            while state.yield0("get").as_i64() > 0 {
                let n = state.yield0("get").as_i64();
                state.yield1("put", Value::from_i64(n - 1));
            }
            let f1 = amb.yield0("flip").as_bool();
            let f2 = amb.yield0("flip").as_bool();
            Value::from_boxed(vec![f1 ^ f2])
        })
    });

    let list = unsafe { result.into_boxed::<Vec<bool>>() };
    assert_eq!(*list, vec![false, true, true, false]);
    assert_eq!(continuation::live_count(), 0);
}

// A Tail handler's opfun declines to resume and throws instead; the
// exception must propagate past the tail handler to an outer `try_`.
#[test]
fn throw_from_tail_opfun_propagates_past_tail_handler() {
    let effect = Effect::new("tailex", &["go"]);
    let ops = OperationTable {
        ops: vec![OperationDef::new(
            OperationKind::Tail,
            "go",
            Box::new(|_resume, _local, _arg| throw(Exception::borrowed("boom"))),
        )],
    };

    let result = try_(|| {
        handle(&effect, Value::null(), ops, None, None, || {
            effect.yield0("go");
            Value::from_i64(1)
        })
    });

    match result {
        Err(e) => assert_eq!(e.message.as_str(), "boom"),
        Ok(_) => panic!("expected the throw to escape the tail handler"),
    }
    assert_eq!(continuation::live_count(), 0);
}

// A deferred release runs even when the body throws, and the exception
// it's wrapped in still reaches the outer catch.
#[test]
fn defer_releases_resource_before_enclosing_throw_is_caught() {
    let freed = Arc::new(AtomicBool::new(false));
    let resource = 42i64;

    let result = try_(|| {
        let freed = freed.clone();
        defer(
            move |_local| freed.store(true, Ordering::SeqCst),
            move || {
                let _ = resource;
                throw(Exception::owned("Domain error"))
            },
        )
    });

    assert!(freed.load(Ordering::SeqCst), "defer must run before the throw is caught");
    match result {
        Err(e) => assert_eq!(e.message.as_str(), "Domain error"),
        Ok(_) => panic!("expected the throw to be caught"),
    }
}

// Two concurrent requests against a shared driver complete in roughly
// max(T1, T2), not their sum; a pre-cancelled scope surfaces as
// `Fault::Cancelled` to a strand that hasn't started waiting yet.
#[test]
fn interleaved_requests_complete_in_parallel_not_in_series() {
    async_main(&RuntimeConfig::default(), || {
        let start = Instant::now();
        let results = interleave(vec![
            Box::new(move || {
                let r = req_await(
                    Instant::now() + Duration::from_millis(80),
                    Duration::from_millis(10),
                    Value::from_i64(1),
                );
                r.unwrap_or(Value::from_i64(-1))
            }),
            Box::new(move || {
                let r = req_await(
                    Instant::now() + Duration::from_millis(60),
                    Duration::from_millis(10),
                    Value::from_i64(2),
                );
                r.unwrap_or(Value::from_i64(-1))
            }),
        ]);
        let elapsed = start.elapsed();

        let observed: Vec<i64> = results.iter().map(|v| v.as_i64()).collect();
        assert_eq_pretty!(observed, vec![1, 2]);
        // Generous upper bound: well under the ~140ms the two waits would
        // take run back to back, close to the slower of the two (~80ms).
        assert!(elapsed < Duration::from_millis(130), "elapsed = {elapsed:?}");
        Value::null()
    });
}

#[test]
fn cancelled_scope_surfaces_as_fault_before_request_fires() {
    let driver: Arc<dyn IoDriver> = Arc::new(ThreadDriver::new());
    let scope = CancellationScope::root();
    scope.cancel("shutdown");

    let result = effectio::async_rt::scope::with_scope(&scope, || {
        with_async_handler(driver, || {
            let r = req_await(
                Instant::now() + Duration::from_secs(5),
                Duration::from_millis(10),
                Value::null(),
            );
            Value::from_boxed(r)
        })
    });
    let result = *unsafe { result.into_boxed::<Result<Value, Fault>>() };

    assert!(matches!(result, Err(Fault::Cancelled { .. })));
}

// A slow strand under `timeout` reports the timeout fault, leaving the
// caller to supply its own default value; a fast strand under the same
// timeout returns its real result.
#[test]
fn timeout_reports_fault_for_slow_strand_and_value_for_fast_strand() {
    async_main(&RuntimeConfig::default(), || {
        let slow = timeout(Duration::from_millis(1000), || {
            std::thread::sleep(Duration::from_millis(1500));
            Value::from_i64(1)
        });
        assert!(matches!(slow, Err(Fault::Timeout { .. })));
        let default_value = slow.unwrap_or(Value::from_i64(0));
        assert_eq!(default_value.as_i64(), 0);

        let fast = timeout(Duration::from_millis(1000), || {
            std::thread::sleep(Duration::from_millis(200));
            Value::from_i64(99)
        });
        assert_eq!(fast.unwrap().as_i64(), 99);
        Value::null()
    });
}
