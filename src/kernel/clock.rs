//! Monotonic time sources.
//!
//! The kernel only ever needs whole seconds since boot,
//! both for the `timemonotonic` syscall and for `waitpid` deadlines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A source of monotonic time.
pub trait Clock {
    /// Whole seconds elapsed since the clock started.
    fn now_secs(&self) -> u32;
}

/// A clock backed by the host's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant
}
impl SystemClock {
    /// Creates a clock starting at the current instant.
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        u32::try_from(self.start.elapsed().as_secs()).unwrap_or(u32::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time, so a host can hold one copy
/// while the kernel holds another.
///
/// ```
/// use bytekernel::kernel::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let view = clock.clone();
/// clock.advance(3);
/// assert_eq!(view.now_secs(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU32>);
impl ManualClock {
    /// Creates a clock at time 0.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the current time.
    pub fn set(&self, secs: u32) {
        self.0.store(secs, Ordering::Relaxed);
    }
    /// Moves the current time forward.
    pub fn advance(&self, secs: u32) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}
impl Clock for ManualClock {
    fn now_secs(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}
