use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rewind_core::{ChainState, ChainStatus, Driver, DriverError, ResultHandler, Scope, Task};

/// Async task whose handlers are kept until the test completes them.
fn parked_task<A, R>(parked: &Arc<Mutex<Vec<(A, ResultHandler<R>)>>>) -> Task<A, R>
where
    A: Send + 'static,
    R: 'static,
{
    let parked = Arc::clone(parked);
    Task::new_async(move |arg: A, handler: ResultHandler<R>| {
        parked.lock().unwrap().push((arg, handler));
    })
}

fn counting_sync(count: &Arc<AtomicUsize>) -> Task<(), ()> {
    let count = Arc::clone(count);
    Task::new_sync(move |_: ()| {
        count.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn async_task_receives_argument_and_returns_result() {
    let parked = Arc::new(Mutex::new(Vec::new()));
    let greet: Task<String, String> = parked_task(&parked);
    let reply = Arc::new(Mutex::new(None));
    let driver = Driver::new();

    let out = Arc::clone(&reply);
    let status = driver
        .launch(move |scope: &Scope| {
            let answer = scope.execute(&greet, "ping".to_string())?;
            *out.lock().unwrap() = Some(answer);
            Ok(())
        })
        .unwrap();
    assert_eq!(status, ChainStatus::Suspended);

    let (arg, handler) = parked.lock().unwrap().pop().unwrap();
    assert_eq!(arg, "ping");
    assert_eq!(handler.complete(format!("{arg}/pong")).unwrap(), ChainStatus::Completed);
    assert_eq!(reply.lock().unwrap().as_deref(), Some("ping/pong"));
}

#[test]
fn async_task_without_value_resumes_the_chain() {
    let notify = Task::new_async(|_: (), handler: ResultHandler<()>| {
        let _ = handler.complete_empty();
    });
    let after = Arc::new(AtomicUsize::new(0));
    let tail = counting_sync(&after);
    let driver = Driver::new();

    let status = driver
        .launch(move |scope: &Scope| {
            scope.call(&notify)?;
            scope.call(&tail)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(status, ChainStatus::Completed);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[test]
fn each_step_runs_once_across_suspensions() {
    let a_runs = Arc::new(AtomicUsize::new(0));
    let b_runs = Arc::new(AtomicUsize::new(0));
    let a = counting_sync(&a_runs);
    let b = counting_sync(&b_runs);
    let parked = Arc::new(Mutex::new(Vec::new()));
    let first: Task<(), u8> = parked_task(&parked);
    let second: Task<(), u8> = parked_task(&parked);
    let driver = Driver::new();

    driver
        .launch(move |scope: &Scope| {
            scope.call(&a)?;
            scope.call(&first)?;
            scope.call(&b)?;
            scope.call(&second)?;
            Ok(())
        })
        .unwrap();

    let (_, h) = parked.lock().unwrap().remove(0);
    assert_eq!(h.complete(1).unwrap(), ChainStatus::Suspended);
    let (_, h) = parked.lock().unwrap().remove(0);
    assert_eq!(h.complete(2).unwrap(), ChainStatus::Completed);

    assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    assert_eq!(b_runs.load(Ordering::SeqCst), 1);
    assert!(parked.lock().unwrap().is_empty());

    let stats = driver.stats();
    assert_eq!(stats.invocations, 3);
    assert_eq!(stats.executed_steps, 4);
    assert_eq!(stats.suspensions, 2);
    // invocation 2 replays a + first, invocation 3 replays all four
    assert_eq!(stats.replayed_steps, 6);
}

#[test]
fn reused_task_records_one_entry_per_step() {
    let counter = Arc::new(AtomicU32::new(0));
    let next = {
        let counter = Arc::clone(&counter);
        Task::new_async(move |_: (), handler: ResultHandler<u32>| {
            let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = handler.complete(value);
        })
        .named("next")
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let driver = Driver::new();

    let out = Arc::clone(&seen);
    let status = driver
        .launch(move |scope: &Scope| {
            let first = scope.call(&next)?;
            let second = scope.call(&next)?;
            let third = scope.call(&next)?;
            out.lock().unwrap().extend([first, second, third]);
            Ok(())
        })
        .unwrap();

    assert_eq!(status, ChainStatus::Completed);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn branching_on_unwrapped_state_drifts() {
    let external = Arc::new(Mutex::new("ready"));
    let modify = {
        let external = Arc::clone(&external);
        Task::new_async(move |_: (), handler: ResultHandler<()>| {
            *external.lock().unwrap() = "processed";
            let _ = handler.complete(());
        })
        .named("modify")
    };
    let failures = Arc::new(AtomicUsize::new(0));
    let handle_failure = counting_sync(&failures).named("handle_failure");
    let driver = Driver::new();

    let status = Arc::clone(&external);
    let err = driver
        .launch(move |scope: &Scope| {
            let current = *status.lock().unwrap();
            if current == "ready" {
                scope.call(&modify)?;
            } else {
                scope.call(&handle_failure)?;
            }
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, DriverError::Drift { step: 1, .. }));
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(driver.state(), ChainState::Failed);
}

#[test]
fn branching_on_state_read_through_a_task_is_stable() {
    let external = Arc::new(Mutex::new("ready"));
    let read_status = {
        let external = Arc::clone(&external);
        Task::new_sync(move |_: ()| *external.lock().unwrap())
    };
    let modified = Arc::new(AtomicUsize::new(0));
    let modify = {
        let external = Arc::clone(&external);
        let modified = Arc::clone(&modified);
        Task::new_async(move |_: (), handler: ResultHandler<()>| {
            modified.fetch_add(1, Ordering::SeqCst);
            *external.lock().unwrap() = "processed";
            let _ = handler.complete(());
        })
    };
    let failures = Arc::new(AtomicUsize::new(0));
    let handle_failure = counting_sync(&failures);
    let branches = Arc::new(Mutex::new(Vec::new()));
    let driver = Driver::new();

    let seen = Arc::clone(&branches);
    let status = driver
        .launch(move |scope: &Scope| {
            let current = scope.call(&read_status)?;
            seen.lock().unwrap().push(current);
            if current == "ready" {
                scope.call(&modify)?;
            } else {
                scope.call(&handle_failure)?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(status, ChainStatus::Completed);
    assert_eq!(*external.lock().unwrap(), "processed");
    assert_eq!(modified.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    // the replay saw the recorded value, not the changed one
    assert_eq!(*branches.lock().unwrap(), vec!["ready", "ready"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_chain_keeps_program_order_across_threads() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = {
        let log = Arc::clone(&log);
        Task::new_async(move |n: u32, handler: ResultHandler<u32>| {
            log.lock().unwrap().push(format!("A({n})"));
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = handler.complete(n * 10);
            });
        })
    };
    let b = {
        let log = Arc::clone(&log);
        Task::new_sync(move |n: u32| {
            log.lock().unwrap().push(format!("B({n})"));
            n + 1
        })
    };
    let c = {
        let log = Arc::clone(&log);
        Task::new_async(move |n: u32, handler: ResultHandler<u32>| {
            log.lock().unwrap().push(format!("C({n})"));
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = handler.complete(n * 2);
            });
        })
    };
    let d = {
        let log = Arc::clone(&log);
        Task::new_sync(move |n: u32| {
            log.lock().unwrap().push(format!("D({n})"));
        })
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    let driver = Driver::new();
    let status = driver
        .launch_with(
            move |scope: &Scope| {
                let x = scope.execute(&a, 4)?;
                let y = scope.execute(&b, x)?;
                let z = scope.execute(&c, y)?;
                scope.execute(&d, z)?;
                Ok(())
            },
            move || {
                let _ = tx.send(());
            },
        )
        .unwrap();
    assert_eq!(status, ChainStatus::Suspended);

    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("chain did not complete")
        .unwrap();

    assert_eq!(driver.state(), ChainState::Completed);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["A(4)", "B(40)", "C(41)", "D(82)"]
    );
}

#[test]
fn nested_chain_runs_between_outer_steps() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let step = |label: &'static str| {
        let log = Arc::clone(&log);
        Task::new_sync(move |_: ()| log.lock().unwrap().push(label))
    };
    let before = step("before");
    let after = step("after");
    let inner_parked = Arc::new(Mutex::new(Vec::new()));
    let inner_wait: Task<(), ()> = parked_task(&inner_parked);
    let inner_work = step("inner");

    let wrapper = Task::nested(rewind_core::DriverConfig::new("inner"), move |_: ()| {
        let inner_wait = inner_wait.clone();
        let inner_work = inner_work.clone();
        move |scope: &Scope| -> rewind_core::Step<()> {
            scope.call(&inner_wait)?;
            scope.call(&inner_work)?;
            Ok(())
        }
    });

    let driver = Driver::new();
    let status = driver
        .launch(move |scope: &Scope| {
            scope.call(&before)?;
            scope.call(&wrapper)?;
            scope.call(&after)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(status, ChainStatus::Suspended);
    assert_eq!(*log.lock().unwrap(), vec!["before"]);

    // completing the inner step finishes both chains
    let (_, handler) = inner_parked.lock().unwrap().pop().unwrap();
    assert_eq!(handler.complete(()).unwrap(), ChainStatus::Completed);
    assert_eq!(driver.state(), ChainState::Completed);
    assert_eq!(*log.lock().unwrap(), vec!["before", "inner", "after"]);
}

#[test]
fn drift_inside_a_nested_chain_fails_the_outer_chain() {
    let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mark_ready = {
        let ready = Arc::clone(&ready);
        Task::new_async(move |_: (), handler: ResultHandler<()>| {
            ready.store(true, Ordering::SeqCst);
            let _ = handler.complete(());
        })
    };
    let when_ready = Task::new_sync(|_: ()| ());

    let flag = Arc::clone(&ready);
    let wrapper = Task::nested(rewind_core::DriverConfig::new("inner"), move |_: ()| {
        let (mark_ready, when_ready) = (mark_ready.clone(), when_ready.clone());
        let flag = Arc::clone(&flag);
        move |scope: &Scope| -> rewind_core::Step<()> {
            // reads state the inner chain's own task changes
            if flag.load(Ordering::SeqCst) {
                scope.call(&when_ready)?;
            } else {
                scope.call(&mark_ready)?;
            }
            Ok(())
        }
    });

    let driver = Driver::new();
    let err = driver
        .launch(move |scope: &Scope| {
            scope.call(&wrapper)?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, DriverError::Drift { step: 1, .. }));
    assert_eq!(driver.state(), ChainState::Failed);
}
