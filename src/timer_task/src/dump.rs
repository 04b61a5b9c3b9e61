//! Human-readable dump of every task and timer
use core::fmt::Write;

use crate::{
    registry::Registry,
    task::{TaskMode, TaskState},
    timer::{Repetitions, TimerCb},
};

impl Registry {
    /// Describe every live task and its timers, one line per entry.
    ///
    /// With `active_only`, only running timers are listed, in the order they
    /// will expire. Otherwise every timer is listed in creation order.
    ///
    /// Each line is also emitted through `log::info!`. Never fails; a task
    /// whose lock is poisoned is reported as such.
    pub fn dump_all_timers(&self, active_only: bool) -> String {
        let mut out = String::new();
        let tasks = self.live_tasks();

        emit(&mut out, format_args!("{} timer task(s)", tasks.len()));

        for (handle, task_cb) in tasks {
            let mode = match task_cb.mode {
                TaskMode::Periodic {
                    period: Some(period),
                } => format!("periodic {period}"),
                TaskMode::Periodic { period: None } => "periodic".to_owned(),
                TaskMode::EventDriven => "event-driven".to_owned(),
            };

            let state = match task_cb.lock_state() {
                Ok(state) => state,
                Err(_) => {
                    emit(
                        &mut out,
                        format_args!(
                            "task {:?} ({mode}, {:?}): lock poisoned",
                            task_cb.name,
                            handle.thread_id()
                        ),
                    );
                    continue;
                }
            };

            emit(
                &mut out,
                format_args!(
                    "task {:?} ({mode}, {:?}): {} timer(s), {} active",
                    task_cb.name,
                    handle.thread_id(),
                    state.instantiated.len(),
                    state.active.len(),
                ),
            );

            let keys: Vec<usize> = if active_only {
                state.active.iter().collect()
            } else {
                state.instantiated.clone()
            };
            for key in keys {
                dump_timer(&mut out, &state, key);
            }
        }

        out
    }
}

fn dump_timer(out: &mut String, state: &TaskState, key: usize) {
    let TimerCb {
        name,
        running,
        timeout,
        end,
        repetitions,
        repetitions_done,
        ..
    } = &state.timers[key];

    let budget = match repetitions {
        Repetitions::Times(total) => total.to_string(),
        Repetitions::Forever => "forever".to_owned(),
    };

    if *running {
        emit(
            out,
            format_args!(
                "  timer {name:?}: running, timeout {timeout}, next at {end}, fired {repetitions_done}/{budget}"
            ),
        );
    } else {
        emit(
            out,
            format_args!(
                "  timer {name:?}: stopped, timeout {timeout}, fired {repetitions_done}/{budget}"
            ),
        );
    }
}

fn emit(out: &mut String, line: core::fmt::Arguments<'_>) {
    log::info!("{line}");
    // Writing to a `String` can't fail
    let _ = writeln!(out, "{line}");
}

#[cfg(test)]
mod tests {
    use crate::{Registry, Repetitions, TaskMode, Timestamp};

    #[test]
    fn lists_tasks_and_timers() {
        let _ = env_logger::try_init();
        let registry = Registry::default();
        let task = registry.create_task("dumped", TaskMode::EventDriven).unwrap();
        let idle = registry.create_timer(task, "idle").unwrap();
        let busy = registry.create_timer(task, "busy").unwrap();
        registry
            .start_timer(busy, Timestamp::from_secs(60), Repetitions::Times(4), || {})
            .unwrap();

        let all = registry.dump_all_timers(false);
        let lines: Vec<&str> = all.lines().collect();
        assert_eq!(lines[0], "1 timer task(s)");
        assert!(lines[1].starts_with("task \"dumped\" (event-driven"), "{all}");
        assert!(lines[1].ends_with("2 timer(s), 1 active"), "{all}");
        assert!(lines[2].starts_with("  timer \"idle\": stopped"), "{all}");
        assert!(lines[3].starts_with("  timer \"busy\": running"), "{all}");
        assert!(lines[3].ends_with("fired 0/4"), "{all}");
        assert_eq!(lines.len(), 4);

        let active = registry.dump_all_timers(true);
        assert_eq!(active.lines().count(), 3);
        assert!(!active.contains("idle"));

        registry.delete_timer(idle).unwrap();
        registry.delete_task(task).unwrap();
        assert_eq!(registry.dump_all_timers(false), "0 timer task(s)\n");
    }

    #[test]
    fn periodic_task_shows_period() {
        let registry = Registry::default();
        registry
            .create_task(
                "p",
                TaskMode::Periodic {
                    period: Some(Timestamp::from_millis(20)),
                },
            )
            .unwrap();
        let out = registry.dump_all_timers(false);
        assert!(out.contains("(periodic 0.020000s,"), "{out}");
    }
}
