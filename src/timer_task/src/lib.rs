#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
pub mod clock;
mod dump;
mod error;
mod gate;
mod registry;
mod task;
mod time;
mod timer;

pub use self::{
    error::{
        ClockError, CreateTaskError, CreateTimerError, DeleteTaskError, DeleteTimerError,
        FindTaskError, GetTimerError, ResultCode, StartTimerError, StopTimerError, WorkerError,
    },
    registry::{Registry, RegistryConfig, TaskHandle, DEFAULT_MAX_TASKS},
    task::{TaskMode, TaskParameters},
    time::Timestamp,
    timer::{Repetitions, TimerHandle, TimerParameters, TimerState},
};
