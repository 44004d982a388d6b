//! # Frame Clock
//!
//! Fixed-timestep controller for the application frame loop. Networking
//! `tick()` calls happen once per frame.
//!
//! ## Design
//!
//! - Time accumulates between calls; each due frame consumes one period
//! - Late frames are counted, never skipped
//! - Waiting sleeps most of the gap and spins the last half millisecond

use std::time::{Duration, Instant};

use crate::config::DEFAULT_FRAME_RATE;

/// Tail of each wait that is spun instead of slept.
const SPIN_MARGIN: Duration = Duration::from_micros(500);

/// Fixed-timestep frame loop controller.
#[derive(Debug)]
pub struct FrameClock {
    /// Target frame period.
    frame_duration: Duration,
    /// Time of the last accumulation.
    last_frame: Instant,
    /// Time owed to pending frames.
    accumulator: Duration,
    /// Frames started.
    frame_count: u64,
    /// Frame timing statistics.
    stats: FrameStats,
}

/// Frame timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameStats {
    /// Shortest frame observed.
    pub min_frame_us: u64,
    /// Longest frame observed.
    pub max_frame_us: u64,
    /// Rolling average frame time.
    pub avg_frame_us: u64,
    /// Frames that overran the period.
    pub late_frames: u64,
    /// Frames measured.
    pub total_frames: u64,
}

impl FrameStats {
    fn fresh(frame_duration: Duration) -> Self {
        Self {
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            avg_frame_us: micros(frame_duration),
            late_frames: 0,
            total_frames: 0,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl FrameClock {
    /// Creates a clock running at `frame_rate` Hz. Zero is treated as one.
    #[must_use]
    pub fn new(frame_rate: u32) -> Self {
        let frame_duration = Duration::from_micros(1_000_000 / u64::from(frame_rate.max(1)));
        Self {
            frame_duration,
            last_frame: Instant::now(),
            accumulator: Duration::ZERO,
            frame_count: 0,
            stats: FrameStats::fresh(frame_duration),
        }
    }

    /// Returns true if a frame is due.
    ///
    /// Call in a loop until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_frame);
        self.last_frame = now;
        self.accumulator >= self.frame_duration
    }

    /// Marks the start of a frame and returns its start time.
    #[must_use]
    pub fn begin_frame(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.frame_duration);
        self.frame_count += 1;
        Instant::now()
    }

    /// Marks the end of a frame started at `start`.
    pub fn end_frame(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = micros(duration);

        self.stats.total_frames += 1;
        self.stats.min_frame_us = self.stats.min_frame_us.min(duration_us);
        self.stats.max_frame_us = self.stats.max_frame_us.max(duration_us);
        self.stats.avg_frame_us = (self.stats.avg_frame_us * 15 + duration_us) / 16;

        if duration > self.frame_duration {
            self.stats.late_frames += 1;
        }
    }

    /// Blocks until the next frame is due.
    pub fn wait_for_next_frame(&self) {
        let elapsed = self.last_frame.elapsed();
        if elapsed >= self.frame_duration {
            return;
        }

        let remaining = self.frame_duration - elapsed;
        if remaining > SPIN_MARGIN * 2 {
            std::thread::sleep(remaining - SPIN_MARGIN);
        }
        while self.last_frame.elapsed() < self.frame_duration {
            std::hint::spin_loop();
        }
    }

    /// Returns the number of frames started.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Returns the timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Returns the target frame period.
    #[must_use]
    pub const fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = FrameStats::fresh(self.frame_duration);
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_creation() {
        let clock = FrameClock::default();
        assert_eq!(clock.frame_count(), 0);
        assert_eq!(clock.frame_duration(), Duration::from_micros(16666));
        assert_eq!(FrameClock::new(0).frame_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_frame_execution() {
        let mut clock = FrameClock::new(1000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.should_tick());

        let start = clock.begin_frame();
        clock.end_frame(start);
        assert_eq!(clock.frame_count(), 1);
        assert_eq!(clock.stats().total_frames, 1);
    }

    #[test]
    fn test_wait_reaches_next_frame() {
        let mut clock = FrameClock::new(200);
        let _ = clock.should_tick();
        clock.wait_for_next_frame();
        assert!(clock.should_tick());
    }

    #[test]
    fn test_stats_tracking() {
        let mut clock = FrameClock::new(1000);
        for _ in 0..10 {
            std::thread::sleep(Duration::from_micros(100));
            while clock.should_tick() {
                let start = clock.begin_frame();
                std::thread::sleep(Duration::from_micros(50));
                clock.end_frame(start);
            }
        }

        let stats = *clock.stats();
        assert!(stats.total_frames > 0);
        assert!(stats.min_frame_us > 0);
        assert!(stats.min_frame_us <= stats.max_frame_us);

        clock.reset_stats();
        assert_eq!(clock.stats().total_frames, 0);
    }
}
