//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// Defines [`ResultCode`] along with its name table.
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$vname => stringify!($vname), )*
                }
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the operations of this crate
    /// can produce.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is malformed, or a handle does not refer to a live
        /// object (e.g., the timer was deleted).
        InvalidArgument = -1,
        /// The registry was shut down, or the timer task failed to start up.
        Uninitialized = -2,
        /// A resource (e.g., a worker thread) could not be allocated.
        NoMem = -3,
        /// The registry is already holding as many timer tasks as it was
        /// configured for.
        NoFreeResources = -4,
        /// No timer task matched the lookup.
        NotFound = -5,
        /// The monotonic clock could not be read.
        ClockFailure = -6,
        /// A task lock was poisoned by a panic while it was held.
        LockFailed = -7,
        /// Waiting on a task's condition variable failed.
        CondWaitFailed = -8,
        /// The operation would block the calling thread on itself.
        WouldDeadlock = -9,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ResultCode {}

/// Defines an operation's error type as a subset of [`ResultCode`].
macro_rules! define_error {
    (
        $( #[$meta:meta] )*
        pub enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        pub enum $name {
            $(
                $( #[$vmeta] )*
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl $name {
            #[cfg(test)]
            const ALL: &'static [Self] = &[$( Self::$vname ),*];
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `$name` is `repr(i8)`, and each of its variants has
                //         the discriminant of the `ResultCode` variant of the
                //         same name
                unsafe { transmute(x) }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(ResultCode::from(*self).as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }

        impl std::error::Error for $name {}
    };
}

/// Implements `From<$src> for $dst` for error types whose variants are a
/// subset of `$dst`'s.
macro_rules! impl_error_subset {
    (impl From<$src:ident> for $dst:ident { $( $vname:ident ),* $(,)* }) => {
        impl From<$src> for $dst {
            #[inline]
            fn from(x: $src) -> Self {
                match x {
                    $( $src::$vname => Self::$vname, )*
                }
            }
        }
    };
}

define_error! {
    /// Error type for [`clock::now`] and [`clock::resolution`].
    ///
    /// [`clock::now`]: crate::clock::now
    /// [`clock::resolution`]: crate::clock::resolution
    pub enum ClockError {
        /// The operating system refused to report the monotonic clock.
        ClockFailure,
    }
}

define_error! {
    /// Error type for [`Registry::create_task`].
    ///
    /// [`Registry::create_task`]: crate::Registry::create_task
    pub enum CreateTaskError {
        /// The name is empty or contains a NUL character, or the specified
        /// period is not positive or too large to schedule.
        InvalidArgument,
        /// The registry was shut down.
        Uninitialized,
        /// The worker thread could not be spawned.
        NoMem,
        /// The registry is full.
        NoFreeResources,
        /// The clock resolution (the default period) could not be read.
        ClockFailure,
    }
}

define_error! {
    /// Error type for [`Registry::delete_task`].
    ///
    /// [`Registry::delete_task`]: crate::Registry::delete_task
    pub enum DeleteTaskError {
        /// The registry was shut down.
        Uninitialized,
        /// The task does not exist or is already being deleted.
        NotFound,
        /// The caller is the task's own worker thread.
        WouldDeadlock,
    }
}

define_error! {
    /// Error type for [`Registry::find_task`] and
    /// [`Registry::get_task_parameters`].
    ///
    /// [`Registry::find_task`]: crate::Registry::find_task
    /// [`Registry::get_task_parameters`]: crate::Registry::get_task_parameters
    pub enum FindTaskError {
        /// The registry was shut down.
        Uninitialized,
        /// No live task matched.
        NotFound,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// Error type for [`Registry::create_timer`].
    ///
    /// [`Registry::create_timer`]: crate::Registry::create_timer
    pub enum CreateTimerError {
        /// The name is empty, or the task handle is stale.
        InvalidArgument,
        /// The registry was shut down.
        Uninitialized,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// Error type for [`Registry::delete_timer`].
    ///
    /// [`Registry::delete_timer`]: crate::Registry::delete_timer
    pub enum DeleteTimerError {
        /// The timer handle is stale.
        InvalidArgument,
        /// The registry was shut down.
        Uninitialized,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// Error type for [`Registry::start_timer`].
    ///
    /// [`Registry::start_timer`]: crate::Registry::start_timer
    pub enum StartTimerError {
        /// The timer handle is stale, the timeout is not positive or too
        /// large to schedule, or the repetition count is zero.
        InvalidArgument,
        /// The registry was shut down, or the task's worker thread failed to
        /// start up.
        Uninitialized,
        /// The monotonic clock could not be read.
        ClockFailure,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// Error type for [`Registry::stop_timer`].
    ///
    /// [`Registry::stop_timer`]: crate::Registry::stop_timer
    pub enum StopTimerError {
        /// The timer handle is stale.
        InvalidArgument,
        /// The registry was shut down.
        Uninitialized,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// Error type for [`Registry::get_timer_state`] and
    /// [`Registry::get_timer_parameters`].
    ///
    /// [`Registry::get_timer_state`]: crate::Registry::get_timer_state
    /// [`Registry::get_timer_parameters`]: crate::Registry::get_timer_parameters
    pub enum GetTimerError {
        /// The timer handle is stale.
        InvalidArgument,
        /// The registry was shut down.
        Uninitialized,
        /// The monotonic clock could not be read.
        ClockFailure,
        /// The task's lock was poisoned.
        LockFailed,
    }
}

define_error! {
    /// The reason a worker thread gave up. Returned through the thread's join
    /// handle and logged by [`Registry::delete_task`].
    ///
    /// [`Registry::delete_task`]: crate::Registry::delete_task
    pub enum WorkerError {
        /// The monotonic clock could not be read.
        ClockFailure,
        /// The task's lock was poisoned.
        LockFailed,
        /// Waiting on the task's condition variable failed.
        CondWaitFailed,
    }
}

impl_error_subset!(impl From<ClockError> for CreateTaskError { ClockFailure });
impl_error_subset!(impl From<ClockError> for StartTimerError { ClockFailure });
impl_error_subset!(impl From<ClockError> for GetTimerError { ClockFailure });
impl_error_subset!(impl From<ClockError> for WorkerError { ClockFailure });

/// Lookup failures shared by every operation that takes a handle. Converted
/// into each operation's own error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LookupError {
    /// The registry was shut down.
    Uninitialized,
    /// The handle does not refer to a live object.
    Stale,
    /// The task's lock was poisoned.
    LockFailed,
}

macro_rules! impl_from_lookup_error {
    ($( $name:ident { stale: $stale:ident } ),* $(,)*) => {$(
        impl From<LookupError> for $name {
            #[inline]
            fn from(x: LookupError) -> Self {
                match x {
                    LookupError::Uninitialized => Self::Uninitialized,
                    LookupError::Stale => Self::$stale,
                    LookupError::LockFailed => Self::LockFailed,
                }
            }
        }
    )*};
}

impl_from_lookup_error!(
    FindTaskError { stale: NotFound },
    CreateTimerError { stale: InvalidArgument },
    DeleteTimerError { stale: InvalidArgument },
    StartTimerError { stale: InvalidArgument },
    StopTimerError { stale: InvalidArgument },
    GetTimerError { stale: InvalidArgument },
);
