//! Monotonic clock backed by `clock_gettime(CLOCK_MONOTONIC)`
use std::{mem::MaybeUninit, os::raw::c_int};

use crate::time::Timestamp;

pub(super) type Error = errno::Errno;

pub(super) fn monotonic_now() -> Result<Timestamp, Error> {
    let ts = unsafe {
        let mut ts = MaybeUninit::<libc::timespec>::uninit();
        ok_or_errno(libc::clock_gettime(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()))?;
        ts.assume_init()
    };

    // Truncate to microseconds
    Ok(Timestamp::new(ts.tv_sec as i64, ts.tv_nsec as i64 / 1_000))
}

pub(super) fn monotonic_resolution() -> Result<Timestamp, Error> {
    let ts = unsafe {
        let mut ts = MaybeUninit::<libc::timespec>::uninit();
        ok_or_errno(libc::clock_getres(libc::CLOCK_MONOTONIC, ts.as_mut_ptr()))?;
        ts.assume_init()
    };

    // Round up to microseconds
    Ok(Timestamp::new(
        ts.tv_sec as i64,
        (ts.tv_nsec as i64 + 999) / 1_000,
    ))
}

#[cfg(target_os = "linux")]
pub(super) fn sleep_until(deadline: Timestamp) -> Result<(), Error> {
    if deadline.secs() < 0 {
        return Ok(());
    }

    // `timespec` has private padding fields on some targets, so it can't be
    // built with a struct expression
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    ts.tv_sec = deadline.secs() as libc::time_t;
    ts.tv_nsec = (deadline.subsec_micros() * 1_000) as _;

    loop {
        // `clock_nanosleep` returns an error number instead of setting `errno`
        match unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &ts,
                std::ptr::null_mut(),
            )
        } {
            0 => return Ok(()),
            libc::EINTR => {
                // Interrupted by a signal handler. Try again.
                continue;
            }
            e => return Err(errno::Errno(e)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub(super) fn sleep_until(deadline: Timestamp) -> Result<(), Error> {
    let now = monotonic_now()?;
    if deadline > now {
        std::thread::sleep((deadline - now).as_duration());
    }
    Ok(())
}

fn ok_or_errno(x: c_int) -> Result<c_int, Error> {
    if x >= 0 {
        Ok(x)
    } else {
        Err(errno::errno())
    }
}
