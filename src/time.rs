//! Monotonic time for timeouts, keep-alive and credential refresh.
//!
//! Every temporal decision in the client (message deadlines, resend windows,
//! SAS token renewal, retry spacing) is expressed with [`Instant`] and
//! [`Deadline`] and read from an injected [`Clock`]. Each transport owns its
//! own clock, so several clients can live in one process without sharing
//! tick state.

use alloc::rc::Rc;
use core::cell::Cell;
use core::ops::Add;
use core::time::Duration;

/// A point on a monotonic millisecond time line.
///
/// The origin is arbitrary (boot, process start, the first tick of a test);
/// only differences between instants from the same clock are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant {
    millis: u64,
}

impl Instant {
    /// The origin of the time line.
    pub const ZERO: Instant = Instant { millis: 0 };

    /// Creates an instant `millis` milliseconds after the origin.
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Milliseconds since the origin.
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Adds a duration, returning `None` on overflow.
    pub fn checked_add(self, duration: Duration) -> Option<Instant> {
        let ms = u64::try_from(duration.as_millis()).ok()?;
        self.millis.checked_add(ms).map(Instant::from_millis)
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    /// Saturates at the end of the time line.
    fn add(self, rhs: Duration) -> Instant {
        self.checked_add(rhs)
            .unwrap_or(Instant::from_millis(u64::MAX))
    }
}

/// An optional absolute expiry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    /// Never expires.
    #[default]
    Never,
    /// Expires once the clock moves past this instant.
    At(Instant),
}

impl Deadline {
    /// A deadline `timeout` after `now`; a zero timeout never expires.
    pub fn after(now: Instant, timeout: Duration) -> Self {
        if timeout.is_zero() {
            Deadline::Never
        } else {
            Deadline::At(now + timeout)
        }
    }

    /// `true` once `now` is strictly past the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Deadline::Never => false,
            Deadline::At(at) => now > *at,
        }
    }
}

/// A source of monotonic and (optionally) wall-clock time.
pub trait Clock {
    /// The current monotonic instant.
    fn now(&self) -> Instant;

    /// Seconds since the Unix epoch, if the device knows the wall time.
    ///
    /// SAS tokens carry an absolute expiry, so a device without wall time
    /// can only authenticate with an externally supplied token or X.509.
    fn unix_time(&self) -> Option<u64> {
        None
    }
}

/// A clock advanced by hand.
///
/// Useful on targets where the application already keeps a tick counter,
/// and in tests. Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Rc<Cell<u64>>,
    unix: Rc<Cell<Option<u64>>>,
}

impl ManualClock {
    /// A clock at the origin with no wall time.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock at the origin whose wall time starts at `unix_seconds`.
    pub fn with_unix_time(unix_seconds: u64) -> Self {
        let clock = Self::default();
        clock.unix.set(Some(unix_seconds));
        clock
    }

    /// Moves monotonic time, and wall time if known, forward.
    pub fn advance(&self, duration: Duration) {
        let before = self.millis.get();
        let after = before.saturating_add(duration.as_millis() as u64);
        self.millis.set(after);
        if let Some(unix) = self.unix.get() {
            // Whole seconds crossed, so sub-second advances accumulate.
            let crossed = after / 1000 - before / 1000;
            self.unix.set(Some(unix + crossed));
        }
    }

    /// Overrides the wall time.
    pub fn set_unix_time(&self, unix_seconds: Option<u64>) {
        self.unix.set(unix_seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis.get())
    }

    fn unix_time(&self) -> Option<u64> {
        self.unix.get()
    }
}

/// A clock backed by `std::time`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    /// A clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.origin.elapsed().as_millis() as u64)
    }

    fn unix_time(&self) -> Option<u64> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
    }
}
