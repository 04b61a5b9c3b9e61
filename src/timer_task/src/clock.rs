//! The monotonic clock
//!
//! All timer deadlines are points on this clock's time line. It's never
//! affected by changes to the wall-clock time.
use once_cell::sync::OnceCell;

use crate::{error::ClockError, time::Timestamp};

#[cfg(unix)]
#[path = "clock_unix.rs"]
mod sys;
#[cfg(not(unix))]
#[path = "clock_std.rs"]
mod sys;

/// The finest resolution we report. Timer arithmetic is done in microseconds,
/// so a finer clock doesn't help.
const MIN_RESOLUTION: Timestamp = Timestamp::from_micros(1);

/// Get the current point on the monotonic time line.
pub fn now() -> Result<Timestamp, ClockError> {
    sys::monotonic_now().map_err(|e| {
        log::error!("failed to read the monotonic clock: {e}");
        ClockError::ClockFailure
    })
}

/// Get the granularity of the monotonic clock, rounded up to a whole
/// microsecond.
///
/// The value is read once and cached for the rest of the process's lifetime.
pub fn resolution() -> Result<Timestamp, ClockError> {
    static RESOLUTION: OnceCell<Timestamp> = OnceCell::new();

    RESOLUTION
        .get_or_try_init(|| {
            let res = sys::monotonic_resolution().map_err(|e| {
                log::error!("failed to read the monotonic clock resolution: {e}");
                ClockError::ClockFailure
            })?;
            Ok(res.max(MIN_RESOLUTION))
        })
        .copied()
}

/// Block the calling thread until the monotonic clock reaches `deadline`.
///
/// Returns immediately if `deadline` is already in the past.
pub(crate) fn sleep_until(deadline: Timestamp) -> Result<(), ClockError> {
    sys::sleep_until(deadline).map_err(|e| {
        log::error!("failed to sleep until {deadline:?}: {e}");
        ClockError::ClockFailure
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let mut last = now().unwrap();
        for _ in 0..1000 {
            let t = now().unwrap();
            assert!(t >= last, "{t:?} < {last:?}");
            last = t;
        }
    }

    #[test]
    fn resolution_is_at_least_a_microsecond() {
        let res = resolution().unwrap();
        assert!(res >= MIN_RESOLUTION);
        assert!(res < Timestamp::from_secs(1));
    }

    #[test]
    fn sleep_until_reaches_deadline() {
        let deadline = now().unwrap() + Timestamp::from_millis(30);
        sleep_until(deadline).unwrap();
        assert!(now().unwrap() >= deadline);
    }

    #[test]
    fn sleep_until_past_deadline_returns() {
        let deadline = now().unwrap();
        sleep_until(Timestamp::ZERO).unwrap();
        sleep_until(deadline).unwrap();
    }
}
