//! Timers
use core::fmt;
use std::sync::Arc;

use crate::{
    clock,
    error::{CreateTimerError, DeleteTimerError, GetTimerError, StartTimerError, StopTimerError},
    registry::{Registry, TaskHandle},
    time::Timestamp,
};

/// A timer callback. Shared so that the worker thread can invoke it after
/// releasing the task lock, even if the timer is restarted or deleted
/// meanwhile.
pub(crate) type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

/// How many times a timer fires before it stops by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repetitions {
    /// Fire the specified number of times. Must be positive when starting a
    /// timer.
    Times(u32),
    /// Fire until stopped.
    Forever,
}

impl Repetitions {
    /// Return `true` if a timer that has fired `done` times must stop.
    #[inline]
    pub fn is_exhausted_by(self, done: u32) -> bool {
        match self {
            Self::Times(total) => done >= total,
            Self::Forever => false,
        }
    }
}

/// Refers to a timer created by [`Registry::create_timer`].
///
/// A handle outlives the timer it refers to, but it's detected as stale (and
/// rejected with `InvalidArgument`) once the timer or its task has been
/// deleted. It never aliases a timer created later.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    task: TaskHandle,
    key: usize,
    generation: u64,
}

impl TimerHandle {
    /// The task the timer belongs to.
    #[inline]
    pub fn task(self) -> TaskHandle {
        self.task
    }

    #[inline]
    pub(crate) fn key(self) -> usize {
        self.key
    }

    #[inline]
    pub(crate) fn generation(self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TimerHandle({:?}, {}#{})",
            self.task.thread_id(),
            self.key,
            self.generation
        )
    }
}

/// A snapshot of a timer's progress, returned by [`Registry::get_timer_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub running: bool,
    /// The time since the current repetition started.
    pub elapsed: Timestamp,
    /// The number of times the timer fired since it was last started.
    pub repetitions_done: u32,
    /// The time until the next expiration. Zero if the timer is not running.
    pub time_remaining: Timestamp,
    /// The number of expirations left. `None` for [`Repetitions::Forever`].
    pub repetitions_remaining: Option<u32>,
}

/// The properties of a timer, returned by [`Registry::get_timer_parameters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerParameters {
    pub name: String,
    pub task: TaskHandle,
    /// The most recently configured timeout. Zero if never started.
    pub timeout: Timestamp,
    pub repetitions: Repetitions,
}

/// *Timer control block* - the state of a timer. Owned by its task's
/// [`TaskState`](crate::task::TaskState) and only accessed under the task lock.
pub(crate) struct TimerCb {
    pub(crate) name: String,

    /// Distinguishes this timer from other timers that occupied the same arena
    /// slot.
    pub(crate) generation: u64,

    /// `true` iff the timer is linked into the task's active list.
    pub(crate) running: bool,

    /// The period between expirations.
    pub(crate) timeout: Timestamp,

    /// The start of the current repetition.
    pub(crate) start: Timestamp,

    /// The deadline of the current repetition (`start + timeout`).
    pub(crate) end: Timestamp,

    pub(crate) repetitions: Repetitions,
    pub(crate) repetitions_done: u32,
    pub(crate) callback: Callback,
}

impl TimerCb {
    pub(crate) fn new(name: String, generation: u64) -> Self {
        Self {
            name,
            generation,
            running: false,
            timeout: Timestamp::ZERO,
            start: Timestamp::ZERO,
            end: Timestamp::ZERO,
            repetitions: Repetitions::Times(0),
            repetitions_done: 0,
            callback: Arc::new(|| {}),
        }
    }

    fn state(&self, now: Timestamp) -> TimerState {
        TimerState {
            running: self.running,
            elapsed: now.saturating_sub(self.start),
            repetitions_done: self.repetitions_done,
            time_remaining: if self.running {
                self.end.saturating_sub(now)
            } else {
                Timestamp::ZERO
            },
            repetitions_remaining: match self.repetitions {
                Repetitions::Times(total) => Some(total.saturating_sub(self.repetitions_done)),
                Repetitions::Forever => None,
            },
        }
    }
}

impl fmt::Debug for TimerCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("running", &self.running)
            .field("timeout", &self.timeout)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("repetitions", &self.repetitions)
            .field("repetitions_done", &self.repetitions_done)
            .finish()
    }
}

impl Registry {
    /// Create a stopped timer on `task`.
    pub fn create_timer(&self, task: TaskHandle, name: &str) -> Result<TimerHandle, CreateTimerError> {
        log::trace!("create_timer({task:?}, {name:?})");
        if name.is_empty() {
            return Err(CreateTimerError::InvalidArgument);
        }

        let task_cb = self.task_cb(task)?;
        let (key, generation) = task_cb.lock_state()?.add_timer(name.to_owned())?;

        Ok(TimerHandle {
            task,
            key,
            generation,
        })
    }

    /// Stop (if running) and delete a timer. `timer` becomes stale.
    ///
    /// An invocation of the callback that is already in progress is not
    /// interrupted.
    pub fn delete_timer(&self, timer: TimerHandle) -> Result<(), DeleteTimerError> {
        log::trace!("delete_timer({timer:?})");
        let task_cb = self.task_cb(timer.task)?;

        let mut state = task_cb.lock_state()?;
        state.timer(timer)?;
        let was_head = state.disarm_timer(timer.key);
        state.remove_timer(timer.key);
        drop(state);

        if was_head {
            task_cb.wake();
        }
        Ok(())
    }

    /// Start a timer. It fires `timeout` from now, then every `timeout` until
    /// `repetitions` is exhausted. A `timeout` so large that the deadline
    /// can't be represented is rejected with `InvalidArgument`.
    ///
    /// A running timer is restarted: its repetition count is reset, and it's
    /// rescheduled from now with the new parameters.
    ///
    /// If the task's worker thread hasn't finished start-up yet, this method
    /// blocks until it has.
    pub fn start_timer(
        &self,
        timer: TimerHandle,
        timeout: Timestamp,
        repetitions: Repetitions,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), StartTimerError> {
        log::trace!("start_timer({timer:?}, {timeout:?}, {repetitions:?})");
        if !timeout.is_positive() || repetitions == Repetitions::Times(0) {
            return Err(StartTimerError::InvalidArgument);
        }

        let task_cb = self.task_cb(timer.task)?;
        task_cb.start_gate.wait();

        let callback: Callback = Arc::new(callback);

        let mut state = task_cb.lock_state()?;
        state.timer(timer)?;
        if !state.initialized {
            return Err(StartTimerError::Uninitialized);
        }

        // Fail before touching the timer
        let now = clock::now()?;
        if now.checked_add(timeout).is_none() {
            return Err(StartTimerError::InvalidArgument);
        }

        state.disarm_timer(timer.key);
        state.arm_timer(timer.key, now, timeout, repetitions, callback);
        let is_head = state.active.first() == Some(timer.key);
        drop(state);

        if is_head {
            task_cb.wake();
        }
        Ok(())
    }

    /// Stop a timer. No-op if it's not running.
    ///
    /// An invocation of the callback that is already in progress is not
    /// interrupted.
    pub fn stop_timer(&self, timer: TimerHandle) -> Result<(), StopTimerError> {
        log::trace!("stop_timer({timer:?})");
        let task_cb = self.task_cb(timer.task)?;

        let mut state = task_cb.lock_state()?;
        state.timer(timer)?;
        let was_head = state.disarm_timer(timer.key);
        drop(state);

        if was_head {
            task_cb.wake();
        }
        Ok(())
    }

    /// Get a snapshot of a timer's progress.
    pub fn get_timer_state(&self, timer: TimerHandle) -> Result<TimerState, GetTimerError> {
        let task_cb = self.task_cb(timer.task)?;

        let state = task_cb.lock_state()?;
        let timer_cb = state.timer(timer)?;
        let now = clock::now()?;
        Ok(timer_cb.state(now))
    }

    /// Get the properties of a timer.
    pub fn get_timer_parameters(
        &self,
        timer: TimerHandle,
    ) -> Result<TimerParameters, GetTimerError> {
        let task_cb = self.task_cb(timer.task)?;

        let state = task_cb.lock_state()?;
        let timer_cb = state.timer(timer)?;
        Ok(TimerParameters {
            name: timer_cb.name.clone(),
            task: timer.task,
            timeout: timer_cb.timeout,
            repetitions: timer_cb.repetitions,
        })
    }
}
