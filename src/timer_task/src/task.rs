//! Timer tasks and their worker loops
use slab::Slab;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    clock,
    error::{LookupError, WorkerError},
    gate::StartGate,
    time::Timestamp,
    timer::{Callback, Repetitions, TimerCb, TimerHandle},
};

mod active;
pub(crate) use self::active::ActiveList;

/// Specifies how a timer task's worker thread waits for expirations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMode {
    /// Wake up every `period` and fire every timer that expired by then.
    ///
    /// `None` selects the resolution of the monotonic clock.
    Periodic { period: Option<Timestamp> },
    /// Sleep until the earliest deadline, waking up early only when the
    /// earliest deadline changes.
    EventDriven,
}

/// A snapshot of a timer task's properties, returned by
/// [`Registry::get_task_parameters`].
///
/// [`Registry::get_task_parameters`]: crate::Registry::get_task_parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskParameters {
    pub name: String,
    /// The scheduling mode. A periodic task always reports its effective
    /// period.
    pub mode: TaskMode,
    /// The number of timers created on the task and not yet deleted.
    pub timers: usize,
    /// The number of running timers.
    pub active_timers: usize,
    /// How many times the worker thread was explicitly woken up (the earliest
    /// deadline changed, or the task is being deleted). Always zero for
    /// periodic tasks.
    pub wakeups: u64,
}

/// *Task control block* - the state shared by a timer task's worker thread
/// and the API callers.
pub(crate) struct TaskCb {
    pub(crate) name: String,

    /// The scheduling mode. For a periodic task, `period` is always `Some(_)`.
    pub(crate) mode: TaskMode,

    /// The task lock.
    state: Mutex<TaskState>,

    /// Present iff `mode` is [`TaskMode::EventDriven`].
    wake: Option<Condvar>,

    /// Opened by the worker thread once it has finished start-up.
    pub(crate) start_gate: StartGate,

    wakeups: AtomicU64,
}

/// The part of [`TaskCb`] protected by the task lock.
pub(crate) struct TaskState {
    /// `true` while the worker thread is running its loop. The worker exits
    /// when it observes `false`.
    pub(crate) initialized: bool,

    /// Set by [`TaskCb::shut_down`]. Prevents a worker that hasn't started
    /// yet from entering its loop.
    pub(crate) deleted: bool,

    /// Every timer created on the task and not deleted yet.
    pub(crate) timers: Slab<TimerCb>,

    /// Keys of `timers` in creation order.
    pub(crate) instantiated: Vec<usize>,

    /// Keys of the running timers, sorted by `TimerCb::end`.
    pub(crate) active: ActiveList,

    next_generation: u64,
}

impl fmt::Debug for TaskCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("self", &(self as *const _))
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("started", &self.start_gate.is_open())
            .finish()
    }
}

impl TaskCb {
    /// Construct a task control block. `mode` must already have its period
    /// resolved.
    pub(crate) fn new(name: String, mode: TaskMode) -> Self {
        debug_assert!(!matches!(mode, TaskMode::Periodic { period: None }));
        Self {
            name,
            mode,
            state: Mutex::new(TaskState::new()),
            wake: match mode {
                TaskMode::EventDriven => Some(Condvar::new()),
                TaskMode::Periodic { .. } => None,
            },
            start_gate: StartGate::new(),
            wakeups: AtomicU64::new(0),
        }
    }

    /// Acquire the task lock on behalf of an API caller.
    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, TaskState>, LookupError> {
        self.state.lock().map_err(|_| {
            log::error!("the lock of timer task {:?} is poisoned", self.name);
            LookupError::LockFailed
        })
    }

    /// Acquire the task lock on behalf of the worker thread.
    fn lock_state_worker(&self) -> Result<MutexGuard<'_, TaskState>, WorkerError> {
        self.state.lock().map_err(|_| WorkerError::LockFailed)
    }

    /// Tell an event-driven worker that the earliest deadline has changed.
    /// No-op for a periodic task, which re-evaluates its timers on every tick
    /// anyway.
    pub(crate) fn wake(&self) {
        if let Some(wake) = &self.wake {
            log::trace!("waking timer task {:?}", self.name);
            self.wakeups.fetch_add(1, Ordering::Relaxed);
            wake.notify_one();
        }
    }

    pub(crate) fn parameters(&self) -> Result<TaskParameters, LookupError> {
        let state = self.lock_state()?;
        Ok(TaskParameters {
            name: self.name.clone(),
            mode: self.mode,
            timers: state.instantiated.len(),
            active_timers: state.active.len(),
            wakeups: self.wakeups.load(Ordering::Relaxed),
        })
    }

    /// Purge every timer and tell the worker thread to exit. Doesn't wait for
    /// the exit.
    pub(crate) fn shut_down(&self) {
        log::debug!("shutting down timer task {:?}", self.name);
        {
            // Teardown proceeds even if the lock is poisoned; the purge below
            // leaves the state consistent regardless
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.purge_timers();
            state.initialized = false;
            state.deleted = true;
        }

        // A periodic worker notices on its next tick
        self.wake();
    }

    /// The body of the worker thread.
    pub(crate) fn run(self: Arc<Self>) -> Result<(), WorkerError> {
        log::debug!("timer task {:?} is now running", self.name);

        let result = match (self.mode, &self.wake) {
            (TaskMode::Periodic { period: Some(period) }, _) => self.run_periodic(period),
            (TaskMode::EventDriven, Some(wake)) => self.run_event_driven(wake),
            _ => unreachable!(),
        };

        if let Err(e) = result {
            log::error!("timer task {:?} stopped: {e:?}", self.name);
            if let Ok(mut state) = self.state.lock() {
                state.initialized = false;
            }
        }

        // A worker that failed during start-up hasn't opened the gate yet.
        // Waiters will find `initialized == false`.
        self.start_gate.open();

        log::debug!("timer task {:?} is exiting", self.name);
        result
    }

    /// The loop of a [`TaskMode::Periodic`] task. Wakes up at absolute points
    /// in time so that the schedule doesn't drift.
    fn run_periodic(&self, period: Timestamp) -> Result<(), WorkerError> {
        let mut next = clock::now()?.saturating_add(period);

        let mut state = self.lock_state_worker()?;
        state.initialized = !state.deleted;
        self.start_gate.open();

        while state.initialized {
            drop(state);
            clock::sleep_until(next)?;

            state = self.expire_timers(self.lock_state_worker()?, next)?;
            next = next.saturating_add(period);
        }

        Ok(())
    }

    /// The loop of a [`TaskMode::EventDriven`] task.
    ///
    /// The task lock is held by this thread except while it waits on `wake`
    /// or runs a callback.
    fn run_event_driven(&self, wake: &Condvar) -> Result<(), WorkerError> {
        let mut state = self.lock_state_worker()?;
        state.initialized = !state.deleted;
        self.start_gate.open();

        let mut deadline: Option<Timestamp> = None;

        while state.initialized {
            // Both a notification and a timeout are ordinary wake-ups
            state = match deadline {
                None => wake.wait(state).map_err(|_| WorkerError::CondWaitFailed)?,
                Some(deadline) => {
                    let timeout = deadline.saturating_sub(clock::now()?).as_duration();
                    wake.wait_timeout(state, timeout)
                        .map_err(|_| WorkerError::CondWaitFailed)?
                        .0
                }
            };

            let now = clock::now()?;

            // If the deadline hasn't passed, something changed at the head of
            // the active list. Just pick up the new deadline.
            if deadline.map_or(false, |deadline| now >= deadline) {
                state = self.expire_timers(state, now)?;
            }

            deadline = state.next_deadline();
        }

        Ok(())
    }

    /// Fire every running timer whose deadline is at or before `now`.
    ///
    /// Callbacks are invoked with the task lock released, so they may call
    /// back into this task. A panicking callback is logged and doesn't take
    /// the worker down.
    fn expire_timers<'a>(
        &'a self,
        mut state: MutexGuard<'a, TaskState>,
        now: Timestamp,
    ) -> Result<MutexGuard<'a, TaskState>, WorkerError> {
        while let Some((key, callback)) = state.expire_first(now) {
            drop(state);

            log::trace!("timer task {:?}: firing timer {key}", self.name);
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                // The timer's bookkeeping was done before the call, so the
                // task stays consistent
                log::error!(
                    "timer task {:?}: the callback of timer {key} panicked",
                    self.name
                );
            }

            state = self.lock_state_worker()?;
        }
        Ok(state)
    }
}

impl TaskState {
    fn new() -> Self {
        Self {
            initialized: false,
            deleted: false,
            timers: Slab::new(),
            instantiated: Vec::new(),
            active: ActiveList::new(),
            next_generation: 1,
        }
    }

    /// Get the timer `handle` refers to.
    pub(crate) fn timer(&self, handle: TimerHandle) -> Result<&TimerCb, LookupError> {
        self.timers
            .get(handle.key())
            .filter(|timer| timer.generation == handle.generation())
            .ok_or(LookupError::Stale)
    }

    /// Create a timer. Returns its arena key and generation.
    pub(crate) fn add_timer(&mut self, name: String) -> Result<(usize, u64), LookupError> {
        if self.deleted {
            return Err(LookupError::Stale);
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let key = self.timers.insert(TimerCb::new(name, generation));
        self.instantiated.push(key);
        Ok((key, generation))
    }

    /// Delete a stopped timer.
    pub(crate) fn remove_timer(&mut self, key: usize) {
        debug_assert!(!self.active.contains(key));
        self.instantiated.retain(|&other| other != key);
        self.timers.remove(key);
    }

    /// Stop and delete every timer.
    fn purge_timers(&mut self) {
        self.active.clear();
        self.instantiated.clear();
        self.timers.clear();
    }

    /// Arm timer `key` and link it into the active list. The timer must be
    /// stopped.
    pub(crate) fn arm_timer(
        &mut self,
        key: usize,
        now: Timestamp,
        timeout: Timestamp,
        repetitions: Repetitions,
        callback: Callback,
    ) {
        let timer = &mut self.timers[key];
        debug_assert!(!timer.running);
        timer.timeout = timeout;
        timer.start = now;
        timer.end = now.saturating_add(timeout);
        timer.repetitions = repetitions;
        timer.repetitions_done = 0;
        timer.callback = callback;
        timer.running = true;
        self.insert_active(key);
    }

    /// Stop timer `key` if it's running. Returns `true` if it was at the head
    /// of the active list.
    pub(crate) fn disarm_timer(&mut self, key: usize) -> bool {
        let timer = &mut self.timers[key];
        if !timer.running {
            return false;
        }
        timer.running = false;
        let was_head = self.active.first() == Some(key);
        self.remove_active(key);
        was_head
    }

    fn insert_active(&mut self, key: usize) {
        let timers = &self.timers;
        self.active.insert(key, |k| timers[k].end);
    }

    fn remove_active(&mut self, key: usize) {
        self.active.remove(key);
    }

    /// The deadline of the head of the active list.
    pub(crate) fn next_deadline(&self) -> Option<Timestamp> {
        self.active.first().map(|key| self.timers[key].end)
    }

    /// If the head of the active list is due by `now`, unlink it, count the
    /// repetition, and either retire it or schedule its next repetition.
    /// Returns the timer's key and the callback to invoke.
    fn expire_first(&mut self, now: Timestamp) -> Option<(usize, Callback)> {
        let key = self.active.first()?;
        if self.timers[key].end > now {
            return None;
        }
        self.active.pop_first();

        let timer = &mut self.timers[key];
        timer.repetitions_done = timer.repetitions_done.saturating_add(1);
        let callback = Arc::clone(&timer.callback);

        if timer.repetitions.is_exhausted_by(timer.repetitions_done) {
            timer.running = false;
        } else {
            timer.start = timer.end;
            timer.end = timer.start.saturating_add(timer.timeout);
            self.insert_active(key);
        }

        Some((key, callback))
    }
}
