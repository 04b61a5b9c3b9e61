//! Monotonic clock backed by [`std::time::Instant`]
use once_cell::sync::Lazy;
use std::{convert::Infallible, time::Instant};

use crate::time::Timestamp;

pub(super) type Error = Infallible;

/// The point `Timestamp::ZERO` corresponds to.
static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

pub(super) fn monotonic_now() -> Result<Timestamp, Error> {
    Ok(Timestamp::from(ORIGIN.elapsed()))
}

pub(super) fn monotonic_resolution() -> Result<Timestamp, Error> {
    // `Instant` doesn't expose its resolution
    Ok(Timestamp::from_micros(1))
}

pub(super) fn sleep_until(deadline: Timestamp) -> Result<(), Error> {
    let now = monotonic_now()?;
    if deadline > now {
        std::thread::sleep((deadline - now).as_duration());
    }
    Ok(())
}
