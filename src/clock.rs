//! Session clocks.
//!
//! Records carry milliseconds elapsed since the session started, read from a
//! monotonic source. Wall-clock time appears once, in the session header.

use std::time::Instant;

use chrono::Utc;

use crate::error_handling::types::ClockError;

/// A millisecond counter that never jumps with wall-clock adjustments.
pub trait MonotonicSource {
    fn now_ms(&self) -> Result<u64, ClockError>;
}

/// Monotonic source backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemMonotonic {
    origin: Instant,
}

impl SystemMonotonic {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemMonotonic {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicSource for SystemMonotonic {
    fn now_ms(&self) -> Result<u64, ClockError> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_millis())
            .map_err(|_| ClockError::Unavailable("monotonic clock overflow".to_string()))
    }
}

impl<T: MonotonicSource + ?Sized> MonotonicSource for &T {
    fn now_ms(&self) -> Result<u64, ClockError> {
        (**self).now_ms()
    }
}

/// Elapsed-time clock anchored at session start.
#[derive(Debug)]
pub struct RelativeClock<S: MonotonicSource> {
    source: S,
    reference_ms: u64,
}

impl<S: MonotonicSource> RelativeClock<S> {
    /// Fixes the reference point. Fails if the source cannot be read.
    pub fn start(source: S) -> Result<Self, ClockError> {
        let reference_ms = source.now_ms()?;
        Ok(Self {
            source,
            reference_ms,
        })
    }

    pub fn reference_ms(&self) -> u64 {
        self.reference_ms
    }

    /// Milliseconds since [`RelativeClock::start`]. A source that steps
    /// backwards past the reference reads as zero.
    pub fn elapsed(&self) -> Result<u64, ClockError> {
        Ok(self.source.now_ms()?.saturating_sub(self.reference_ms))
    }
}

/// Seconds since the Unix epoch, recorded in the session header.
pub fn wall_clock_now_secs() -> Result<u64, ClockError> {
    let secs = Utc::now().timestamp();
    u64::try_from(secs).map_err(|_| {
        ClockError::Unavailable(format!("system time {} precedes the Unix epoch", secs))
    })
}
