//! Time sources for the session engine.
//!
//! Elapsed time combines two clocks:
//! - the wall clock, which keeps advancing while the process or the machine
//!   is suspended, and
//! - the monotonic clock, which never steps backwards.
//!
//! The larger of the two readings wins, so suspension still counts and a
//! wall clock stepped backwards cannot give time back.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::{Duration, Instant};

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Current monotonic instant.
    fn monotonic(&self) -> Instant;
}

/// Clock backed by the operating system.
///
/// The monotonic reading comes from `tokio::time::Instant`, so paused test
/// runtimes can drive it with `tokio::time::advance`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX),
            // Wall clock set before 1970
            Err(before_epoch) => {
                -i64::try_from(before_epoch.duration().as_millis()).unwrap_or(i64::MAX)
            }
        }
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

// ============================================================================
// MockClock
// ============================================================================

/// Manually driven clock for tests.
///
/// `advance` moves both readings, `suspend` moves only the wall clock (the
/// way a sleeping laptop looks to a process), and `set_wall_ms` steps the
/// wall clock to an arbitrary value.
#[derive(Debug)]
pub struct MockClock {
    wall_ms: AtomicI64,
    base: Instant,
    monotonic_offset_ms: AtomicU64,
}

impl MockClock {
    /// Creates a mock clock reading `wall_ms` on the wall clock.
    pub fn new(wall_ms: i64) -> Self {
        Self {
            wall_ms: AtomicI64::new(wall_ms),
            base: Instant::now(),
            monotonic_offset_ms: AtomicU64::new(0),
        }
    }

    /// Advances both clocks.
    pub fn advance(&self, duration: Duration) {
        let millis = duration_ms(duration);
        self.wall_ms.fetch_add(millis as i64, Ordering::SeqCst);
        self.monotonic_offset_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Advances only the wall clock.
    pub fn suspend(&self, duration: Duration) {
        self.wall_ms
            .fetch_add(duration_ms(duration) as i64, Ordering::SeqCst);
    }

    /// Steps the wall clock to `wall_ms`; the monotonic clock is unaffected.
    pub fn set_wall_ms(&self, wall_ms: i64) {
        self.wall_ms.store(wall_ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.wall_ms.load(Ordering::SeqCst)
    }

    fn monotonic(&self) -> Instant {
        self.base + Duration::from_millis(self.monotonic_offset_ms.load(Ordering::SeqCst))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Elapsed time
// ============================================================================

/// Start point of a session on both clocks.
#[derive(Debug, Clone, Copy)]
pub struct ClockAnchor {
    /// Wall-clock start in epoch milliseconds
    pub start_ts_ms: i64,
    /// Monotonic start
    pub started_at: Instant,
}

impl ClockAnchor {
    /// Captures the current time of `clock`.
    pub fn capture(clock: &dyn Clock) -> Self {
        Self {
            start_ts_ms: clock.now_ms(),
            started_at: clock.monotonic(),
        }
    }

    /// Milliseconds elapsed since the anchor, never negative.
    pub fn elapsed_ms(&self, clock: &dyn Clock) -> u64 {
        let wall = clock.now_ms().saturating_sub(self.start_ts_ms).max(0) as u64;
        let monotonic = duration_ms(clock.monotonic().saturating_duration_since(self.started_at));
        wall.max(monotonic)
    }
}

/// Whole seconds left of `planned_duration_sec` after `elapsed_ms`.
pub fn remaining_sec(planned_duration_sec: u64, elapsed_ms: u64) -> u64 {
    planned_duration_sec.saturating_sub(elapsed_ms / 1000)
}

// ============================================================================
// Tests
// ============================================================================
