//! The table of timer tasks
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use crate::{
    clock,
    error::{CreateTaskError, DeleteTaskError, FindTaskError, LookupError, WorkerError},
    task::{TaskCb, TaskMode, TaskParameters},
};

/// The default value of [`RegistryConfig::max_tasks`].
pub const DEFAULT_MAX_TASKS: usize = 32;

/// Construction-time settings of a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    max_tasks: usize,
    worker_stack_size: Option<usize>,
}

impl RegistryConfig {
    pub const fn new() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            worker_stack_size: None,
        }
    }

    /// Set the maximum number of timer tasks that can exist at the same time.
    pub const fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Set the stack size of worker threads. Callbacks run on these threads.
    /// Uses the platform default if unset.
    pub const fn worker_stack_size(mut self, size: usize) -> Self {
        self.worker_stack_size = Some(size);
        self
    }

    pub const fn get_max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub const fn get_worker_stack_size(&self) -> Option<usize> {
        self.worker_stack_size
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Refers to a timer task created by [`Registry::create_task`]. Identified by
/// the task's worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    thread: ThreadId,
}

impl TaskHandle {
    /// The identity of the task's worker thread.
    #[inline]
    pub fn thread_id(self) -> ThreadId {
        self.thread
    }
}

/// Owns a bounded set of timer tasks and is the entry point of every
/// operation.
///
/// Dropping a `Registry` deletes all of its tasks (see [`Self::shutdown`]).
/// Callbacks that need to call back into the registry can capture an
/// `Arc<Registry>`; in that case call [`Self::shutdown`] explicitly, because
/// the callbacks keep the registry alive.
pub struct Registry {
    config: RegistryConfig,

    /// The registry lock. Only held while scanning or updating `slots`, never
    /// together with a task lock.
    inner: SpinMutex<RegistryInner>,
}

struct RegistryInner {
    /// `false` after [`Registry::shutdown`].
    initialized: bool,
    slots: Slab<TaskSlot>,
    /// The number of `TaskSlot::Live` slots.
    live: usize,
}

enum TaskSlot {
    /// Claimed by an in-progress `create_task`.
    Reserved,
    Live(LiveTask),
}

struct LiveTask {
    task: Arc<TaskCb>,
    thread: ThreadId,
    /// Taken by whoever deletes the task. `None` while a deletion is in
    /// progress, during which the task can't be looked up anymore.
    join: Option<JoinHandle<Result<(), WorkerError>>>,
}

/// A claimed slot, released on drop unless [`Self::commit`]ted.
struct SlotReservation<'a> {
    registry: &'a Registry,
    key: usize,
    committed: bool,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("initialized", &inner.initialized)
            .field("live", &inner.live)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            inner: SpinMutex::new(RegistryInner {
                initialized: true,
                slots: Slab::with_capacity(config.max_tasks),
                live: 0,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The number of live timer tasks.
    pub fn task_count(&self) -> usize {
        self.inner.lock().live
    }

    /// Create a timer task and spawn its worker thread.
    ///
    /// Returns as soon as the thread is spawned; operations that need the
    /// worker to be ready wait for it.
    pub fn create_task(&self, name: &str, mode: TaskMode) -> Result<TaskHandle, CreateTaskError> {
        log::trace!("create_task({name:?}, {mode:?})");
        if name.is_empty() || name.contains('\0') {
            return Err(CreateTaskError::InvalidArgument);
        }

        let mode = match mode {
            TaskMode::Periodic {
                period: Some(period),
            } => {
                // The worker's first tick is `now + period`
                if !period.is_positive() || clock::now()?.checked_add(period).is_none() {
                    return Err(CreateTaskError::InvalidArgument);
                }
                mode
            }
            TaskMode::Periodic { period: None } => TaskMode::Periodic {
                period: Some(clock::resolution()?),
            },
            TaskMode::EventDriven => mode,
        };

        let reservation = self.reserve_slot()?;

        let task = Arc::new(TaskCb::new(name.to_owned(), mode));

        let mut builder = thread::Builder::new().name(name.to_owned());
        if let Some(size) = self.config.worker_stack_size {
            builder = builder.stack_size(size);
        }
        let worker = Arc::clone(&task);
        let join = builder.spawn(move || worker.run()).map_err(|e| {
            log::error!("failed to spawn the worker thread of timer task {name:?}: {e}");
            CreateTaskError::NoMem
        })?;
        let thread = join.thread().id();
        log::debug!("spawned worker thread {thread:?} for timer task {name:?}");

        let live = LiveTask {
            task,
            thread,
            join: Some(join),
        };
        if let Err(live) = reservation.commit(live) {
            // `shutdown` ran while we were spawning the thread
            log::debug!("registry was shut down while creating timer task {name:?}");
            if let LiveTask {
                task,
                join: Some(join),
                ..
            } = live
            {
                task.shut_down();
                report_exit(&task, join);
            }
            return Err(CreateTaskError::Uninitialized);
        }

        Ok(TaskHandle { thread })
    }

    /// Delete a timer task. Its timers are purged, and this method blocks
    /// until its worker thread has exited.
    ///
    /// Fails with `WouldDeadlock` if called by the task's own worker thread
    /// (e.g., from one of its callbacks).
    pub fn delete_task(&self, task: TaskHandle) -> Result<(), DeleteTaskError> {
        log::trace!("delete_task({task:?})");
        if thread::current().id() == task.thread {
            return Err(DeleteTaskError::WouldDeadlock);
        }

        let (key, task_cb, join) = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return Err(DeleteTaskError::Uninitialized);
            }
            inner
                .slots
                .iter_mut()
                .find_map(|(key, slot)| match slot {
                    TaskSlot::Live(live) if live.thread == task.thread => live
                        .join
                        .take()
                        .map(|join| (key, Arc::clone(&live.task), join)),
                    _ => None,
                })
                .ok_or(DeleteTaskError::NotFound)?
        };

        task_cb.shut_down();
        report_exit(&task_cb, join);

        // The worker has exited; nothing can touch the task's synchronization
        // objects anymore except through our `Arc`
        self.release_slot(key);
        log::debug!("deleted timer task {:?}", task_cb.name);
        Ok(())
    }

    /// Find the timer task whose worker thread is `identity`.
    pub fn find_task(&self, identity: ThreadId) -> Result<TaskHandle, FindTaskError> {
        self.task_cb(TaskHandle { thread: identity })?;
        Ok(TaskHandle { thread: identity })
    }

    /// Find the timer task whose worker thread is the calling thread. Returns
    /// `Some(_)` only when called from a timer callback.
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.find_task(thread::current().id()).ok()
    }

    /// Get a snapshot of a timer task's properties.
    pub fn get_task_parameters(&self, task: TaskHandle) -> Result<TaskParameters, FindTaskError> {
        Ok(self.task_cb(task)?.parameters()?)
    }

    /// Delete every timer task and reject all further operations with
    /// `Uninitialized`. Does nothing if already shut down.
    ///
    /// Blocks until every worker thread has exited, except the calling thread
    /// itself if it's a worker thread.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return;
            }
            inner.initialized = false;
            inner
                .slots
                .iter_mut()
                .filter_map(|(key, slot)| match slot {
                    TaskSlot::Live(live) => live
                        .join
                        .take()
                        .map(|join| (key, Arc::clone(&live.task), live.thread, join)),
                    TaskSlot::Reserved => None,
                })
                .collect()
        };

        log::debug!("shutting down the registry ({} tasks)", tasks.len());

        for (key, task_cb, thread, join) in tasks {
            task_cb.shut_down();
            if thread == thread::current().id() {
                // Can't join ourselves. The loop exits once the current
                // callback returns.
                log::debug!("detaching the worker of timer task {:?}", task_cb.name);
            } else {
                report_exit(&task_cb, join);
            }
            self.release_slot(key);
        }
    }

    /// Get the task control block `task` refers to. The registry lock is
    /// released before returning.
    pub(crate) fn task_cb(&self, task: TaskHandle) -> Result<Arc<TaskCb>, LookupError> {
        let inner = self.inner.lock();
        if !inner.initialized {
            return Err(LookupError::Uninitialized);
        }
        inner
            .slots
            .iter()
            .find_map(|(_, slot)| match slot {
                TaskSlot::Live(live) if live.thread == task.thread && live.join.is_some() => {
                    Some(Arc::clone(&live.task))
                }
                _ => None,
            })
            .ok_or(LookupError::Stale)
    }

    /// Get every live task, in slot order.
    pub(crate) fn live_tasks(&self) -> Vec<(TaskHandle, Arc<TaskCb>)> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter_map(|(_, slot)| match slot {
                TaskSlot::Live(live) if live.join.is_some() => Some((
                    TaskHandle {
                        thread: live.thread,
                    },
                    Arc::clone(&live.task),
                )),
                _ => None,
            })
            .collect()
    }

    fn reserve_slot(&self) -> Result<SlotReservation<'_>, CreateTaskError> {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return Err(CreateTaskError::Uninitialized);
        }
        if inner.slots.len() >= self.config.max_tasks {
            log::debug!(
                "cannot create a timer task: all {} slots are in use",
                self.config.max_tasks
            );
            return Err(CreateTaskError::NoFreeResources);
        }
        let key = inner.slots.insert(TaskSlot::Reserved);
        Ok(SlotReservation {
            registry: self,
            key,
            committed: false,
        })
    }

    fn release_slot(&self, key: usize) {
        let mut inner = self.inner.lock();
        if inner.slots.contains(key) {
            if let TaskSlot::Live(_) = inner.slots.remove(key) {
                inner.live -= 1;
            }
        }
    }
}

impl SlotReservation<'_> {
    /// Turn the reserved slot into a live one. Hands `live` back if the
    /// registry was shut down in the meantime.
    fn commit(mut self, live: LiveTask) -> Result<(), LiveTask> {
        let mut inner = self.registry.inner.lock();
        if !inner.initialized {
            // Released by `drop`
            return Err(live);
        }
        inner.slots[self.key] = TaskSlot::Live(live);
        inner.live += 1;
        self.committed = true;
        Ok(())
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.inner.lock().slots.remove(self.key);
        }
    }
}

/// Wait for a worker thread to exit and log how it went.
fn report_exit(task: &TaskCb, join: JoinHandle<Result<(), WorkerError>>) {
    match join.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("the worker of timer task {:?} failed: {e:?}", task.name),
        Err(_) => log::error!("the worker of timer task {:?} panicked", task.name),
    }
}
