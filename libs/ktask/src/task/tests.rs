// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::*;
use crate::dispatch::tests::spawned_on_current_thread;
use crate::error::{ForcePanic, Panicked, panic_force};
use crate::test_util::trace_init;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Barrier;
use std::thread;

fn as_u32(value: Option<Value>) -> u32 {
    *value.unwrap().downcast_ref::<u32>().unwrap()
}

fn force_message(payload: Box<dyn core::any::Any + Send>) -> String {
    payload
        .downcast::<ForcePanic>()
        .map(|force| force.message().to_string())
        .unwrap_or_else(|_| panic!("expected a ForcePanic payload"))
}

#[test]
fn settled_factories() {
    let _trace = trace_init();

    let completed = resolve(Value::new(5_u32));
    assert_eq!(completed.state(), TaskState::Completed);
    assert_eq!(as_u32(completed.result()), 5);
    assert!(completed.error().is_none());

    let faulted = reject(Error::msg("bad"));
    assert!(faulted.is_faulted());
    assert!(faulted.result().is_none());
    assert_eq!(faulted.error().unwrap().to_string(), "bad");

    let canceled = cancel(None);
    assert!(canceled.is_canceled());
    assert!(canceled.error().unwrap().is::<error::Canceled>());
}

#[test]
fn settled_factories_share_records() {
    assert!(resolve(None).ptr_eq(&resolve(None)));
    assert!(reject(None).ptr_eq(&reject(None)));
    assert!(cancel(None).ptr_eq(&cancel(error::canceled())));
    assert!(cancel(error::deadline_exceeded()).ptr_eq(&cancel(error::deadline_exceeded())));
    assert!(!cancel(None).ptr_eq(&cancel(error::deadline_exceeded())));

    let cause = Error::msg("custom");
    let custom = cancel(cause.clone());
    assert!(custom.error().unwrap().ptr_eq(&cause));
    assert!(!custom.ptr_eq(&cancel(Error::msg("custom"))));
}

#[test]
fn output_mirrors_outcome() {
    assert!(matches!(resolve(None).output(), Ok(None)));
    assert_eq!(as_u32(resolve(Value::new(3_u32)).output().unwrap()), 3);
    assert!(reject(None).output().unwrap_err().unwrap().is::<error::Rejected>());
    assert!(cancel(None).output().unwrap_err().unwrap().is::<error::Canceled>());
}

#[test]
fn rejecting_without_error_is_normalized() {
    assert!(reject(None).ptr_eq(&reject(error::rejected())));

    let (task, _resolver, rejecter) = new();
    rejecter.reject(None);
    assert!(task.is_faulted());
    assert!(task.error().unwrap().ptr_eq(&error::rejected()));

    let task = start(|_, rejecter| rejecter.reject(None), None);
    assert!(task.wait(None).error().unwrap().is::<error::Rejected>());
    assert!(task.output().unwrap_err().is_some());
}

#[test]
fn resolving_with_a_task_flattens() {
    let _trace = trace_init();

    let task = resolve(Value::from(resolve(Value::new(5_u32))));
    assert!(task.is_completed());
    assert_eq!(as_u32(task.result()), 5);

    let cause = Error::msg("inner");
    let task = resolve(Value::from(reject(cause.clone())));
    assert!(task.is_faulted());
    assert!(task.error().unwrap().ptr_eq(&cause));

    let task = resolve(Value::from(cancel(None)));
    assert!(task.is_canceled());
}

#[test]
fn resolving_with_a_pending_task_waits_for_it() {
    let (inner, resolver, _rejecter) = new();
    let outer = resolve(Value::from(delay(Duration::from_millis(10), None).then(
        move |_| -> Output {
            resolver.resolve(Value::new(7_u32));
            Ok(None)
        },
        None,
    )));
    assert!(outer.is_completed());

    let flattened = resolve(Value::from(inner));
    assert_eq!(as_u32(flattened.result()), 7);
}

#[test]
fn self_resolution_is_forced() {
    let _trace = trace_init();

    let (task, resolver, _rejecter) = new();
    let payload = panic::catch_unwind(AssertUnwindSafe(|| {
        resolver.resolve(Value::from(task.clone()));
    }))
    .unwrap_err();

    assert_eq!(
        force_message(payload),
        "Task: a task cannot be resolved with itself"
    );
    assert!(!task.is_done());
}

#[test]
fn rejecting_with_force_unwinds() {
    let payload = panic::catch_unwind(|| {
        reject(Error::force("fatal"));
    })
    .unwrap_err();
    assert_eq!(force_message(payload), "fatal");

    let (task, _resolver, rejecter) = new();
    let res = panic::catch_unwind(AssertUnwindSafe(|| rejecter.reject(Error::force("fatal"))));
    assert!(res.is_err());
    assert!(!task.is_done());
}

#[test]
fn force_panic_escapes_continuations() {
    let payload = panic::catch_unwind(|| {
        resolve(None).continue_await(|_| -> Output { panic_force("escape") }, None);
    })
    .unwrap_err();
    assert_eq!(force_message(payload), "escape");
}

#[test]
fn first_settle_wins() {
    let _trace = trace_init();

    const THREADS: usize = 8;

    for _ in 0..32 {
        let (task, resolver, rejecter) = new();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let barrier = barrier.clone();
                let task = task.clone();
                let resolver = resolver.clone();
                let rejecter = rejecter.clone();
                thread::spawn(move || {
                    barrier.wait();
                    match i % 3 {
                        0 => resolver.resolve(Value::new(i)),
                        1 => rejecter.reject(Error::msg(i)),
                        _ => task.cancel_with(Some(Error::msg(i))),
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // the payload must belong to the transition that was published
        let winner: usize = match task.state() {
            TaskState::Completed => *task.result().unwrap().downcast_ref::<usize>().unwrap(),
            TaskState::Faulted | TaskState::Canceled => {
                task.error().unwrap().to_string().parse().unwrap()
            }
            TaskState::Pending => unreachable!(),
        };
        let expected = match winner % 3 {
            0 => TaskState::Completed,
            1 => TaskState::Faulted,
            _ => TaskState::Canceled,
        };
        assert_eq!(task.state(), expected);
    }
}

#[test]
fn settling_twice_is_a_noop() {
    let (task, resolver, rejecter) = new();
    resolver.resolve(Value::new(1_u32));
    resolver.resolve(Value::new(2_u32));
    rejecter.reject(Error::msg("late"));
    task.cancel_with(None);

    assert!(task.is_completed());
    assert_eq!(as_u32(task.result()), 1);
}

#[test]
fn done_is_shared() {
    let (task, resolver, _rejecter) = new();
    let barrier = Arc::new(Barrier::new(2));

    let other = thread::spawn({
        let task = task.clone();
        let barrier = barrier.clone();
        move || {
            barrier.wait();
            task.done()
        }
    });
    barrier.wait();
    let signal = task.done();
    let other = other.join().unwrap();

    assert!(signal.ptr_eq(&other));
    assert!(signal.ptr_eq(&task.done()));
    assert!(!signal.is_closed());

    resolver.resolve(None);
    assert!(signal.is_closed());
}

#[test]
fn done_on_settled_task_is_the_closed_sentinel() {
    assert!(resolve(None).done().ptr_eq(&Signal::closed()));
    assert!(reject(Error::msg("x")).done().ptr_eq(&Signal::closed()));

    let (task, resolver, _rejecter) = new();
    resolver.resolve(None);
    assert!(task.done().ptr_eq(&Signal::closed()));
}

#[test]
fn wait_timeout_gives_up() {
    let (task, _resolver, _rejecter) = new();
    let start = Instant::now();
    assert!(!task.wait_timeout(Duration::from_millis(20), None).is_done());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn wait_gives_up_on_cancel() {
    let (task, _resolver, _rejecter) = new();
    let token = CancelToken::with_timeout(Duration::from_millis(10));
    assert!(!task.wait(Some(&token)).is_done());
    assert!(token.cause().unwrap().is::<error::DeadlineExceeded>());
}

#[test]
fn run_settles_with_body_output() {
    let _trace = trace_init();

    let task = run(|| Ok(Some(Value::new(11_u32))), None);
    assert_eq!(as_u32(task.wait(None).result()), 11);

    let task = run(|| Err(Error::msg("body failed")), None);
    assert!(task.wait(None).is_faulted());
    assert_eq!(task.error().unwrap().to_string(), "body failed");

    let task = run(|| -> Output { panic!("body panicked") }, None);
    assert_eq!(
        task.error()
            .unwrap()
            .downcast_ref::<Panicked>()
            .unwrap()
            .message(),
        "body panicked"
    );
}

#[test]
fn start_hands_out_settle_handles() {
    let task = start(
        |resolver, rejecter| {
            resolver.resolve(Value::new(4_u32));
            rejecter.reject(Error::msg("ignored"));
        },
        None,
    );
    assert_eq!(as_u32(task.result()), 4);

    // the body may hand the resolver to another thread and return early
    let task = start(
        |resolver, _rejecter| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                resolver.resolve(Value::new(9_u32));
            });
        },
        None,
    );
    assert_eq!(as_u32(task.result()), 9);
}

#[test]
fn delay_completes_after_timeout() {
    let start = Instant::now();
    let task = delay(Duration::from_millis(20), None);
    assert!(task.wait(None).is_completed());
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(task.result().is_none());
}

#[test]
fn delay_is_canceled_by_token() {
    let token = CancelToken::new();
    let task = delay(Duration::from_secs(60), Some(&token));

    thread::sleep(Duration::from_millis(5));
    token.cancel(Error::msg("stop"));

    assert!(task.wait(None).is_canceled());
    assert_eq!(task.error().unwrap().to_string(), "stop");
}

#[test]
fn cancelled_token_short_circuits() {
    let token = CancelToken::new();
    let cause = Error::msg("early");
    token.cancel(cause.clone());

    let before = spawned_on_current_thread();
    let tasks = [
        run(|| -> Output { unreachable!() }, Some(&token)),
        start(|_, _| unreachable!(), Some(&token)),
        delay(Duration::from_secs(60), Some(&token)),
        resolve(None).then(|_| -> Output { unreachable!() }, Some(&token)),
        resolve(None).continue_await(|_| -> Output { unreachable!() }, Some(&token)),
    ];
    assert_eq!(spawned_on_current_thread(), before);

    for task in tasks {
        assert!(task.is_canceled());
        assert!(task.error().unwrap().ptr_eq(&cause));
    }
}

#[test]
fn then_runs_on_completion_only() {
    let task = run(|| Ok(Some(Value::new(20_u32))), None)
        .then(|v| Ok(Some(Value::new(as_u32(v) + 1))), None)
        .then(|v| Ok(Some(Value::new(as_u32(v) * 2))), None);
    assert_eq!(as_u32(task.result()), 42);

    let cause = Error::msg("bad");
    let task = reject(cause.clone()).then(|_| -> Output { unreachable!() }, None);
    assert!(task.wait(None).is_faulted());
    assert!(task.error().unwrap().ptr_eq(&cause));

    let task = cancel(None).then(|_| -> Output { unreachable!() }, None);
    assert!(task.wait(None).is_canceled());
}

#[test]
fn catch_runs_on_fault_only() {
    let task = reject(Error::msg("bad")).catch(
        |error| Ok(Some(Value::new(error.unwrap().to_string()))),
        None,
    );
    let value = task.result().unwrap();
    assert_eq!(value.downcast_ref::<String>().unwrap(), "bad");

    let task = resolve(Value::new(1_u32)).catch(|_| -> Output { unreachable!() }, None);
    assert_eq!(as_u32(task.result()), 1);

    // cancellation is not an error
    let task = cancel(None).catch(|_| -> Output { unreachable!() }, None);
    assert!(task.wait(None).is_canceled());
}

#[test]
fn continue_with_sees_every_outcome() {
    for upstream in [resolve(None), reject(None), cancel(None)] {
        let expected = upstream.state();
        let task = upstream.continue_with(
            move |task| Ok(Some(Value::new(task.state() == expected))),
            None,
        );
        assert!(*task.result().unwrap().downcast_ref::<bool>().unwrap());
    }
}

#[test]
fn continuation_may_return_a_task() {
    let task = resolve(None).then(
        |_| {
            Ok(Some(Value::from(
                delay(Duration::from_millis(5), None).then(|_| Ok(Some(Value::new(3_u32))), None),
            )))
        },
        None,
    );
    assert_eq!(as_u32(task.result()), 3);
}

#[test]
fn panicking_continuation_faults_dependent() {
    let task = resolve(None).then(|_| -> Output { panic!("oops") }, None);
    let error = task.error().unwrap();
    assert!(task.is_faulted());
    assert_eq!(error.downcast_ref::<Panicked>().unwrap().message(), "oops");
}

#[test]
fn continuations_on_pending_task_run_after_settle() {
    let _trace = trace_init();

    let (task, resolver, _rejecter) = new();
    let dependents: Vec<_> = (0..8_u32)
        .map(|i| task.then(move |v| Ok(Some(Value::new(as_u32(v) + i))), None))
        .collect();

    resolver.resolve(Value::new(100_u32));
    for (i, dependent) in (0..8_u32).zip(dependents) {
        assert_eq!(as_u32(dependent.result()), 100 + i);
    }
}

#[test]
fn dropping_a_long_pending_chain() {
    let (root, resolver, rejecter) = new();
    let mut last = root.clone();
    for _ in 0..100_000 {
        last = last.then(Ok, None);
    }

    drop(last);
    drop(root);
    drop(resolver);
    drop(rejecter);
}

#[test]
fn dropping_a_pending_chain_keeps_held_dependents() {
    let (root, resolver, rejecter) = new();
    let middle = root.then(Ok, None);
    let tail = middle.then(Ok, None);

    drop(middle);
    drop(root);
    drop(resolver);
    drop(rejecter);

    // the chain is gone but `tail` is still a usable pending task
    assert!(!tail.is_done());
    let after = tail.then(Ok, None);
    tail.cancel_with(None);
    assert!(after.wait(None).is_canceled());
}

#[test]
fn then_races_settle() {
    let _trace = trace_init();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 32;

    let (task, resolver, _rejecter) = new();
    let calls = Arc::new(core::sync::atomic::AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let task = task.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|_| {
                        let calls = calls.clone();
                        task.then(
                            move |v| {
                                calls.fetch_add(1, Ordering::Relaxed);
                                Ok(v)
                            },
                            None,
                        )
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    barrier.wait();
    resolver.resolve(Value::new(5_u32));

    let dependents: Vec<Task> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(dependents.len(), THREADS * PER_THREAD);
    for dependent in &dependents {
        assert_eq!(as_u32(dependent.result()), 5);
    }
    // every continuation ran exactly once, whether drained by the settle or dispatched on
    // registration
    assert_eq!(calls.load(Ordering::Relaxed), THREADS * PER_THREAD);
}

#[test]
fn await_flavours_run_inline() {
    let caller = thread::current().id();
    let upstream = delay(Duration::from_millis(5), None);

    let task = upstream.then_await(
        move |_| Ok(Some(Value::new(thread::current().id() == caller))),
        None,
    );
    assert!(task.is_done());
    assert!(*task.result().unwrap().downcast_ref::<bool>().unwrap());

    let task = reject(Error::msg("bad")).catch_await(|_| Ok(None), None);
    assert!(task.is_completed());

    let task = cancel(None).continue_await(|t| Ok(Some(Value::new(t.is_canceled()))), None);
    assert!(*task.result().unwrap().downcast_ref::<bool>().unwrap());
}

#[test]
fn await_gives_up_on_cancel() {
    let (upstream, _resolver, _rejecter) = new();
    let token = CancelToken::with_timeout(Duration::from_millis(10));

    let task = upstream.then_await(|_| -> Output { unreachable!() }, Some(&token));
    assert!(task.is_canceled());
    assert!(task.error().unwrap().is::<error::DeadlineExceeded>());
}

#[test]
fn cancel_while_queued_skips_continuation() {
    let (upstream, resolver, _rejecter) = new();
    let token = CancelToken::new();
    let dependent = upstream.then(|_| -> Output { unreachable!() }, Some(&token));

    token.cancel(None);
    resolver.resolve(None);
    assert!(dependent.wait(None).is_canceled());
    assert!(dependent.error().unwrap().is::<error::Canceled>());
}
