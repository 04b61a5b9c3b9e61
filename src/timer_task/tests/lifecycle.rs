//! Task and timer lifecycle, handle validation, and teardown
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, sleep},
    time::Duration,
};
use timer_task::{
    CreateTaskError, CreateTimerError, DeleteTaskError, DeleteTimerError, FindTaskError,
    GetTimerError, Registry, RegistryConfig, Repetitions, ResultCode, StartTimerError,
    StopTimerError, TaskMode, Timestamp,
};

fn init_logger() {
    let _ = env_logger::try_init();
}

#[test]
fn stale_timer_handle_is_rejected() {
    init_logger();
    let registry = Registry::default();
    let task = registry.create_task("stale", TaskMode::EventDriven).unwrap();
    let old = registry.create_timer(task, "old").unwrap();
    registry.delete_timer(old).unwrap();

    // Likely reuses the arena slot of `old`
    let new = registry.create_timer(task, "new").unwrap();

    assert_eq!(
        registry.start_timer(old, Timestamp::from_millis(1), Repetitions::Times(1), || {}),
        Err(StartTimerError::InvalidArgument)
    );
    assert_eq!(registry.stop_timer(old), Err(StopTimerError::InvalidArgument));
    assert_eq!(registry.delete_timer(old), Err(DeleteTimerError::InvalidArgument));
    assert_eq!(
        registry.get_timer_state(old),
        Err(GetTimerError::InvalidArgument)
    );
    assert_eq!(registry.get_timer_parameters(new).unwrap().name, "new");
    assert_eq!(registry.get_task_parameters(task).unwrap().timers, 1);
}

#[test]
fn bad_timer_arguments_are_rejected() {
    init_logger();
    let registry = Registry::default();
    let task = registry.create_task("args", TaskMode::EventDriven).unwrap();
    assert_eq!(
        registry.create_timer(task, ""),
        Err(CreateTimerError::InvalidArgument)
    );

    let timer = registry.create_timer(task, "t").unwrap();
    for (timeout, reps) in [
        (Timestamp::ZERO, Repetitions::Times(1)),
        (Timestamp::from_millis(-5), Repetitions::Forever),
        (Timestamp::from_millis(5), Repetitions::Times(0)),
    ] {
        assert_eq!(
            registry.start_timer(timer, timeout, reps, || {}),
            Err(StartTimerError::InvalidArgument)
        );
    }
    assert!(!registry.get_timer_state(timer).unwrap().running);

    // Never started
    let params = registry.get_timer_parameters(timer).unwrap();
    assert_eq!(params.timeout, Timestamp::ZERO);
}

#[test]
fn deleting_a_task_stops_its_timers() {
    init_logger();
    let registry = Registry::default();
    let task = registry.create_task("doomed", TaskMode::EventDriven).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let timers: Vec<_> = (0..8)
        .map(|i| {
            let timer = registry.create_timer(task, &format!("t{i}")).unwrap();
            let count = Arc::clone(&count);
            registry
                .start_timer(
                    timer,
                    Timestamp::from_millis(1 + i),
                    Repetitions::Forever,
                    move || {
                        count.fetch_add(1, Ordering::Relaxed);
                    },
                )
                .unwrap();
            timer
        })
        .collect();

    sleep(Duration::from_millis(30));
    registry.delete_task(task).unwrap();

    // The worker has been joined, so no callback can run anymore
    let fired = count.load(Ordering::Relaxed);
    assert!(fired > 0);
    sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::Relaxed), fired);

    for timer in timers {
        assert_eq!(
            registry.get_timer_state(timer),
            Err(GetTimerError::InvalidArgument)
        );
    }
    assert_eq!(
        registry.create_timer(task, "late"),
        Err(CreateTimerError::InvalidArgument)
    );
    assert_eq!(registry.task_count(), 0);
}

#[test]
fn concurrent_callers() {
    init_logger();
    let registry = Arc::new(Registry::default());
    let task = registry.create_task("shared", TaskMode::EventDriven).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..4)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let count = Arc::clone(&count);
            thread::spawn(move || {
                for k in 0..10 {
                    let timer = registry.create_timer(task, &format!("c{i}-{k}")).unwrap();
                    let count = Arc::clone(&count);
                    registry
                        .start_timer(
                            timer,
                            Timestamp::from_millis(1 + (k % 3)),
                            Repetitions::Times(2),
                            move || {
                                count.fetch_add(1, Ordering::Relaxed);
                            },
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::Relaxed), 80);
    let params = registry.get_task_parameters(task).unwrap();
    assert_eq!(params.timers, 40);
    assert_eq!(params.active_timers, 0);
}

#[test]
fn callback_knows_its_task() {
    init_logger();
    let registry = Arc::new(Registry::default());
    let task = registry.create_task("self", TaskMode::EventDriven).unwrap();
    let timer = registry.create_timer(task, "t").unwrap();
    let (send, recv) = mpsc::channel();
    let send = Mutex::new(send);

    {
        let registry2 = Arc::clone(&registry);
        registry
            .start_timer(timer, Timestamp::from_millis(1), Repetitions::Times(1), move || {
                let current = registry2.current_task();
                let deleted = current.map(|task| registry2.delete_task(task));
                let found = current.map(|task| registry2.find_task(task.thread_id()));
                let _ = send.lock().unwrap().send((current, deleted, found));
            })
            .unwrap();
    }

    let (current, deleted, found) = recv.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(current, Some(task));
    assert_eq!(deleted, Some(Err(DeleteTaskError::WouldDeadlock)));
    assert_eq!(found, Some(Ok(task)));

    registry.delete_task(task).unwrap();
    assert_eq!(
        registry.find_task(task.thread_id()),
        Err(FindTaskError::NotFound)
    );
}

#[test]
fn capacity_and_shutdown() {
    init_logger();
    let registry = Registry::new(RegistryConfig::new().max_tasks(3).worker_stack_size(256 * 1024));
    let tasks: Vec<_> = (0..3)
        .map(|i| {
            registry
                .create_task(&format!("t{i}"), TaskMode::EventDriven)
                .unwrap()
        })
        .collect();
    let err = registry
        .create_task("one too many", TaskMode::EventDriven)
        .unwrap_err();
    assert_eq!(err, CreateTaskError::NoFreeResources);
    assert_eq!(ResultCode::from(err), ResultCode::NoFreeResources);

    let timer = registry.create_timer(tasks[0], "t").unwrap();
    registry
        .start_timer(timer, Timestamp::from_secs(60), Repetitions::Forever, || {})
        .unwrap();

    registry.shutdown();
    assert_eq!(registry.task_count(), 0);
    assert_eq!(
        registry.start_timer(timer, Timestamp::from_millis(1), Repetitions::Times(1), || {}),
        Err(StartTimerError::Uninitialized)
    );
    assert_eq!(registry.stop_timer(timer), Err(StopTimerError::Uninitialized));
    assert_eq!(
        registry.get_task_parameters(tasks[1]),
        Err(FindTaskError::Uninitialized)
    );
    assert_eq!(registry.dump_all_timers(false), "0 timer task(s)\n");
}

#[test]
fn worker_threads_carry_task_names() {
    init_logger();
    let registry = Registry::default();
    let task = registry.create_task("named worker", TaskMode::EventDriven).unwrap();
    let timer = registry.create_timer(task, "t").unwrap();
    let (send, recv) = mpsc::channel();
    let send = Mutex::new(send);

    registry
        .start_timer(timer, Timestamp::from_millis(1), Repetitions::Times(1), move || {
            let name = thread::current().name().map(str::to_owned);
            let _ = send.lock().unwrap().send(name);
        })
        .unwrap();

    let name = recv.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("named worker"));
}

#[test]
fn unrepresentable_deadline_is_rejected() {
    init_logger();
    let registry = Registry::default();
    let task = registry.create_task("far", TaskMode::EventDriven).unwrap();
    let timer = registry.create_timer(task, "t").unwrap();
    registry
        .start_timer(timer, Timestamp::from_secs(60), Repetitions::Times(1), || {})
        .unwrap();

    assert_eq!(
        registry.start_timer(
            timer,
            Timestamp::from_secs(i64::MAX),
            Repetitions::Times(1),
            || {}
        ),
        Err(StartTimerError::InvalidArgument)
    );

    // The rejected restart left the timer and the task alone
    let state = registry.get_timer_state(timer).unwrap();
    assert!(state.running);
    assert!(state.time_remaining > Timestamp::from_secs(50));
    assert_eq!(
        registry.get_timer_parameters(timer).unwrap().timeout,
        Timestamp::from_secs(60)
    );
    registry.create_timer(task, "u").unwrap();
    registry.stop_timer(timer).unwrap();
}

#[test]
fn panicking_callback_does_not_stop_the_task() {
    init_logger();
    for mode in [
        TaskMode::EventDriven,
        TaskMode::Periodic {
            period: Some(Timestamp::from_millis(2)),
        },
    ] {
        let registry = Registry::default();
        let task = registry.create_task("fragile", mode).unwrap();
        let bad = registry.create_timer(task, "bad").unwrap();
        let good = registry.create_timer(task, "good").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        registry
            .start_timer(bad, Timestamp::from_millis(5), Repetitions::Times(2), || {
                panic!("callback failure")
            })
            .unwrap();
        sleep(Duration::from_millis(50));

        // Both repetitions were consumed even though each one panicked
        let state = registry.get_timer_state(bad).unwrap();
        assert!(!state.running, "{mode:?}");
        assert_eq!(state.repetitions_done, 2, "{mode:?}");

        {
            let count = Arc::clone(&count);
            registry
                .start_timer(good, Timestamp::from_millis(5), Repetitions::Times(1), move || {
                    count.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        sleep(Duration::from_millis(50));

        assert_eq!(count.load(Ordering::Relaxed), 1, "{mode:?}");
        assert!(!registry.get_timer_state(good).unwrap().running, "{mode:?}");
        registry.delete_task(task).unwrap();
    }
}
