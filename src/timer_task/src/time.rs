//! Timestamps on the monotonic time line
use core::{fmt, ops};
use std::time::Duration;

const MICROS_PER_SEC: i64 = 1_000_000;

/// A point on (or a span of) the monotonic time line with microsecond
/// precision.
///
/// `micros` is always normalized to `0..1_000_000`, so the derived ordering,
/// which compares `secs` first, is the chronological order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: i64,
    micros: i64,
}

impl Timestamp {
    /// The origin of the time line. Also the empty span.
    pub const ZERO: Self = Self { secs: 0, micros: 0 };

    /// The latest representable point.
    pub const MAX: Self = Self {
        secs: i64::MAX,
        micros: MICROS_PER_SEC - 1,
    };

    /// The earliest representable point.
    pub const MIN: Self = Self {
        secs: i64::MIN,
        micros: 0,
    };

    /// Construct a `Timestamp`, carrying excess microseconds into `secs`.
    #[inline]
    pub const fn new(secs: i64, micros: i64) -> Self {
        Self {
            secs: secs + micros.div_euclid(MICROS_PER_SEC),
            micros: micros.rem_euclid(MICROS_PER_SEC),
        }
    }

    /// Construct a `Timestamp` from the specified number of microseconds.
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self::new(0, micros)
    }

    /// Construct a `Timestamp` from the specified number of milliseconds.
    ///
    /// Panics if `millis` overflows the representable range.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        match millis.checked_mul(1_000) {
            Some(micros) => Self::new(0, micros),
            None => panic!("timestamp overflow"),
        }
    }

    /// Construct a `Timestamp` from the specified number of seconds.
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self { secs, micros: 0 }
    }

    /// The whole-seconds part.
    #[inline]
    pub const fn secs(self) -> i64 {
        self.secs
    }

    /// The sub-second part in microseconds, always in `0..1_000_000`.
    #[inline]
    pub const fn subsec_micros(self) -> i64 {
        self.micros
    }

    /// Get the total number of microseconds. Saturates on overflow.
    #[inline]
    pub fn as_micros(self) -> i64 {
        self.secs
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(self.micros)
    }

    /// Return `true` if and only if `self` lies after [`Self::ZERO`].
    #[inline]
    pub fn is_positive(self) -> bool {
        self > Self::ZERO
    }

    /// Convert a span to a [`Duration`]. Spans before the origin become
    /// [`Duration::ZERO`].
    #[inline]
    pub fn as_duration(self) -> Duration {
        if self.secs < 0 {
            Duration::ZERO
        } else {
            Duration::new(self.secs as u64, self.micros as u32 * 1_000)
        }
    }

    /// Compute `self + rhs`, returning `None` on overflow.
    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let mut secs = self.secs.checked_add(rhs.secs)?;
        let mut micros = self.micros + rhs.micros;
        if micros >= MICROS_PER_SEC {
            secs = secs.checked_add(1)?;
            micros -= MICROS_PER_SEC;
        }
        Some(Self { secs, micros })
    }

    /// Compute `self - rhs`, returning `None` on overflow.
    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let mut secs = self.secs.checked_sub(rhs.secs)?;
        let mut micros = self.micros - rhs.micros;
        if micros < 0 {
            secs = secs.checked_sub(1)?;
            micros += MICROS_PER_SEC;
        }
        Some(Self { secs, micros })
    }

    /// Compute `self + rhs`, clamping to [`Self::MAX`] or [`Self::MIN`] on
    /// overflow.
    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        match self.checked_add(rhs) {
            Some(x) => x,
            None if rhs.secs < 0 => Self::MIN,
            None => Self::MAX,
        }
    }

    /// Compute `self - other`, or [`Self::ZERO`] if `other` is later than
    /// `self`.
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        if self <= other {
            Self::ZERO
        } else {
            self.checked_sub(other).unwrap_or(Self::MAX)
        }
    }
}

impl From<Duration> for Timestamp {
    /// Sub-microsecond precision is truncated.
    #[inline]
    fn from(x: Duration) -> Self {
        Self {
            secs: x.as_secs() as i64,
            micros: i64::from(x.subsec_micros()),
        }
    }
}

impl ops::Add for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(rhs).expect("overflow when adding timestamps")
    }
}

impl ops::AddAssign for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl ops::Sub for Timestamp {
    type Output = Self;

    /// The result is meaningful as a span only if `self >= rhs`.
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(rhs)
            .expect("overflow when subtracting timestamps")
    }
}

impl ops::SubAssign for Timestamp {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}s", self.secs, self.micros)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
