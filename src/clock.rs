//! Clocks and timestamps.
//!
//! Sinks synchronize on the pipeline clock by waiting for
//! `base_time + running_time` with a [`ClockId`]. A flush or shutdown
//! cancels the wait with [`ClockId::unschedule`].
//!
//! [`SystemClock`] is the default pipeline clock; [`ManualClock`] only moves
//! when advanced and is meant for tests and offline processing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// ============================================================================
// ClockTime
// ============================================================================

const NONE_NANOS: u64 = u64::MAX;

/// A point or span in time, in nanoseconds.
///
/// `ClockTime::NONE` stands for "no timestamp". Arithmetic with `NONE`
/// yields `NONE`; everything else saturates, so `a - b` is zero when `b` is
/// later than `a` and sums never wrap into `NONE`.
///
/// ```rust
/// use mediaflow::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(500);
/// assert_eq!(t.millis(), 1500);
/// assert_eq!(t.to_string(), "1.500s");
/// assert!((t + ClockTime::NONE).is_none());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// No timestamp.
    pub const NONE: Self = Self(NONE_NANOS);

    /// From nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// From milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self::from_nanos(ms.saturating_mul(1_000_000))
    }

    /// From seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self::from_nanos(s.saturating_mul(1_000_000_000))
    }

    /// Raw nanoseconds. `NONE` is `u64::MAX`.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Whole milliseconds.
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Whole seconds.
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Check for [`ClockTime::NONE`].
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == NONE_NANOS
    }

    /// Check for a real timestamp.
    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }

    /// `None` for [`ClockTime::NONE`].
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Sum, clamped just below `NONE`.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        match self.0.checked_add(rhs.0) {
            Some(sum) if sum != NONE_NANOS => Self(sum),
            _ => Self(NONE_NANOS - 1),
        }
    }

    /// Difference, clamped at zero.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for ClockTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(NONE_NANOS);
        Self(nanos.min(NONE_NANOS - 1))
    }
}

/// `NONE` converts to a zero duration.
impl From<ClockTime> for Duration {
    fn from(t: ClockTime) -> Self {
        match t.to_option() {
            Some(t) => Duration::from_nanos(t.0),
            None => Duration::ZERO,
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_option() {
            Some(t) => write!(f, "{}.{:03}s", t.secs(), t.millis() % 1000),
            None => f.write_str("NONE"),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// A monotonic time source.
///
/// Elements may offer a clock through `ElementImpl::provide_clock`. On
/// PAUSED→PLAYING the pipeline picks the offered clock with the highest
/// `ElementImpl::clock_priority`, or a [`SystemClock`] when nobody offers
/// one, and hands it to every element.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> ClockTime;

    /// Name for logs.
    fn name(&self) -> &str {
        "clock"
    }
}

impl std::fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Clock").field(&self.name()).finish()
    }
}

// ============================================================================
// SystemClock
// ============================================================================

/// Monotonic wall clock counting from its creation.
pub struct SystemClock {
    start: Instant,
    name: String,
}

impl SystemClock {
    /// Create a clock named "system".
    pub fn new() -> Self {
        Self::with_name("system")
    }

    /// Create a named clock.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTime {
        self.start.elapsed().into()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// A clock whose time only moves when told to.
///
/// ```rust
/// use mediaflow::clock::{Clock, ClockTime, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.advance(ClockTime::from_millis(40));
/// assert_eq!(clock.now(), ClockTime::from_millis(40));
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time. Time never goes backwards.
    pub fn set_time(&self, time: ClockTime) {
        if time.is_some() {
            self.now.fetch_max(time.nanos(), Ordering::AcqRel);
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: ClockTime) {
        let next = self.now() + delta;
        self.set_time(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockTime {
        ClockTime::from_nanos(self.now.load(Ordering::Acquire))
    }

    fn name(&self) -> &str {
        "manual"
    }
}

// ============================================================================
// ClockId
// ============================================================================

/// Outcome of a [`ClockId::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReturn {
    /// The target time was reached.
    Ok,
    /// The target time had already passed when the wait started.
    Early,
    /// The wait was cancelled with [`ClockId::unschedule`].
    Unscheduled,
}

#[derive(Debug, Default)]
struct ClockIdState {
    unscheduled: bool,
}

/// A single-shot wait for a clock to reach a time.
///
/// Waiting blocks the calling thread. Any other thread may cancel the wait
/// with [`unschedule`](Self::unschedule); once unscheduled the id stays
/// unscheduled.
pub struct ClockId {
    clock: Arc<dyn Clock>,
    time: ClockTime,
    state: Mutex<ClockIdState>,
    cond: Condvar,
}

/// Longest single sleep while waiting. Bounds how late a wait notices a
/// clock that is not driven by wall time (e.g. [`ManualClock`]).
const WAIT_SLICE: Duration = Duration::from_millis(5);

impl ClockId {
    /// Create a wait for `time` on `clock`.
    pub fn new(clock: Arc<dyn Clock>, time: ClockTime) -> Arc<Self> {
        Arc::new(Self {
            clock,
            time,
            state: Mutex::new(ClockIdState::default()),
            cond: Condvar::new(),
        })
    }

    /// The time this id waits for.
    pub fn time(&self) -> ClockTime {
        self.time
    }

    /// Block until the clock reaches the target time or the id is unscheduled.
    pub fn wait(&self) -> ClockReturn {
        let mut state = self.state.lock();
        if state.unscheduled {
            return ClockReturn::Unscheduled;
        }
        if self.time.is_none() || self.clock.now() >= self.time {
            return ClockReturn::Early;
        }

        loop {
            if state.unscheduled {
                return ClockReturn::Unscheduled;
            }
            let now = self.clock.now();
            if now >= self.time {
                return ClockReturn::Ok;
            }
            let remaining = Duration::from(self.time - now).min(WAIT_SLICE);
            self.cond.wait_for(&mut state, remaining);
        }
    }

    /// Cancel the wait; a blocked [`wait`](Self::wait) returns
    /// [`ClockReturn::Unscheduled`].
    pub fn unschedule(&self) {
        let mut state = self.state.lock();
        state.unscheduled = true;
        self.cond.notify_all();
    }
}

impl std::fmt::Debug for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockId")
            .field("clock", &self.clock.name())
            .field("time", &self.time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_creation() {
        assert_eq!(ClockTime::from_nanos(1_000).nanos(), 1_000);
        assert_eq!(ClockTime::from_millis(1_000).nanos(), 1_000_000_000);
        assert_eq!(ClockTime::from_secs(1).nanos(), 1_000_000_000);
    }

    #[test]
    fn test_clock_time_none_arithmetic() {
        let t = ClockTime::from_secs(1);
        assert!((t + ClockTime::NONE).is_none());
        assert!((ClockTime::NONE - t).is_none());
        assert_eq!(ClockTime::from_millis(100) - t, ClockTime::ZERO);
        let last = ClockTime::from_nanos(u64::MAX - 1);
        assert_eq!(last + t, last);
        assert!((last + t).is_some());
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(format!("{}", ClockTime::from_millis(1500)), "1.500s");
        assert_eq!(format!("{}", ClockTime::NONE), "NONE");
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > t1);
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new();
        clock.set_time(ClockTime::from_secs(2));
        clock.set_time(ClockTime::from_secs(1));
        assert_eq!(clock.now(), ClockTime::from_secs(2));
    }

    #[test]
    fn test_clock_id_early() {
        let clock = Arc::new(ManualClock::new());
        clock.set_time(ClockTime::from_secs(5));
        let id = ClockId::new(clock, ClockTime::from_secs(1));
        assert_eq!(id.wait(), ClockReturn::Early);
    }

    #[test]
    fn test_clock_id_reaches_target() {
        let clock = Arc::new(ManualClock::new());
        let id = ClockId::new(clock.clone(), ClockTime::from_millis(10));

        let waiter = {
            let id = id.clone();
            std::thread::spawn(move || id.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        clock.advance(ClockTime::from_millis(10));
        assert_eq!(waiter.join().unwrap(), ClockReturn::Ok);
    }

    #[test]
    fn test_clock_id_unschedule() {
        let clock = Arc::new(SystemClock::new());
        let id = ClockId::new(clock, ClockTime::from_secs(3600));

        let waiter = {
            let id = id.clone();
            std::thread::spawn(move || id.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        id.unschedule();
        assert_eq!(waiter.join().unwrap(), ClockReturn::Unscheduled);
        assert_eq!(id.wait(), ClockReturn::Unscheduled);
    }
}
