//! Transport Clock
//!
//! Position is derived, never accumulated:
//!
//! ```text
//! playing: position = offset + (now - started_at) * rate
//! stopped: position = offset
//! ```
//!
//! Every transition that changes the meaning of `offset` (pause, seek, rate
//! change) goes through [`TransportClock::rebase`] first, so the position
//! function stays continuous across it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Slowest supported playback rate
pub const MIN_RATE: f64 = 0.25;

/// Fastest supported playback rate
pub const MAX_RATE: f64 = 4.0;

/// Clamp a playback rate into `[MIN_RATE, MAX_RATE]`
pub fn clamp_rate(rate: f64) -> f64 {
    rate.clamp(MIN_RATE, MAX_RATE)
}

/// Monotonic time in seconds
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds since construction, on tokio's clock
///
/// Follows `tokio::time::pause`/`advance` in tests.
#[derive(Debug)]
pub struct RuntimeClock {
    origin: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for RuntimeClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for deterministic tests and offline hosts
#[derive(Debug, Default)]
pub struct ManualClock {
    // f64 bits
    now_bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.now_bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }
}

/// Offset/rate position arithmetic for one loaded source
#[derive(Debug, Clone, PartialEq)]
pub struct TransportClock {
    offset: f64,
    started_at: f64,
    rate: f64,
    playing: bool,
    duration: f64,
}

impl TransportClock {
    pub fn new(duration: f64, rate: f64) -> Self {
        Self {
            offset: 0.0,
            started_at: 0.0,
            rate: clamp_rate(rate),
            playing: false,
            duration: duration.max(0.0),
        }
    }

    /// Derived position at `now`, clamped to `[0, duration]`
    pub fn position_at(&self, now: f64) -> f64 {
        let position = if self.playing {
            self.offset + (now - self.started_at).max(0.0) * self.rate
        } else {
            self.offset
        };
        position.clamp(0.0, self.duration)
    }

    /// Fold elapsed time into `offset` and restart the reference at `now`
    pub fn rebase(&mut self, now: f64) {
        self.offset = self.position_at(now);
        self.started_at = now;
    }

    pub fn start(&mut self, now: f64) {
        self.started_at = now;
        self.playing = true;
    }

    /// Stop and keep the position reached at `now`
    pub fn stop(&mut self, now: f64) {
        if self.playing {
            self.rebase(now);
            self.playing = false;
        }
    }

    /// Jump to `position`; keeps running if playing
    pub fn set_offset(&mut self, now: f64, position: f64) {
        self.offset = position.clamp(0.0, self.duration);
        self.started_at = now;
    }

    /// Change rate without a position discontinuity
    pub fn set_rate(&mut self, now: f64, rate: f64) {
        if self.playing {
            self.rebase(now);
        }
        self.rate = clamp_rate(rate);
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stopped_position_is_offset() {
        let mut clock = TransportClock::new(30.0, 1.0);
        clock.set_offset(5.0, 12.0);
        assert_eq!(clock.position_at(100.0), 12.0);
    }

    #[test]
    fn test_playing_position_advances_with_rate() {
        let mut clock = TransportClock::new(30.0, 2.0);
        clock.set_offset(10.0, 1.0);
        clock.start(10.0);
        assert_relative_eq!(clock.position_at(12.5), 6.0);
    }

    #[test]
    fn test_position_clamped_to_duration() {
        let mut clock = TransportClock::new(30.0, 1.0);
        clock.start(0.0);
        assert_eq!(clock.position_at(45.0), 30.0);

        clock.set_offset(0.0, -3.0);
        assert_eq!(clock.offset(), 0.0);
    }

    #[test]
    fn test_rate_change_is_continuous() {
        let mut clock = TransportClock::new(60.0, 1.0);
        clock.start(0.0);
        let before = clock.position_at(7.0);
        clock.set_rate(7.0, 3.0);
        let after = clock.position_at(7.0);
        assert_relative_eq!(before, after);
        assert_relative_eq!(clock.position_at(8.0), 10.0);
    }

    #[test]
    fn test_rate_is_clamped() {
        let mut clock = TransportClock::new(10.0, 10.0);
        assert_eq!(clock.rate(), MAX_RATE);
        clock.set_rate(0.0, 0.01);
        assert_eq!(clock.rate(), MIN_RATE);
    }

    #[test]
    fn test_stop_captures_position() {
        let mut clock = TransportClock::new(30.0, 1.0);
        clock.start(1.0);
        clock.stop(4.0);
        assert!(!clock.is_playing());
        assert_relative_eq!(clock.position_at(100.0), 3.0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance(1.5);
        clock.advance(0.25);
        assert_relative_eq!(clock.now(), 1.75);
        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_clock_follows_tokio_time() {
        let clock = RuntimeClock::new();
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert_relative_eq!(clock.now(), 1.5, epsilon = 1e-6);
    }
}
