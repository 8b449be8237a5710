// SPDX-License-Identifier: GPL-3.0-only

//! Presented-frame rate counter

use crate::constants::FRAME_RATE_WINDOW;
use std::time::{Duration, Instant};

/// Counts presented frames and reports a rate once per window
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    window: Duration,
    total_frames: u64,
    frames_at_window_start: u64,
    window_start: Instant,
    frame_rate: f64,
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self::with_window(FRAME_RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            total_frames: 0,
            frames_at_window_start: 0,
            window_start: Instant::now(),
            frame_rate: 0.0,
        }
    }

    /// Record one presented frame
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record one presented frame at a given time
    pub fn tick_at(&mut self, now: Instant) {
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            let frames = self.total_frames - self.frames_at_window_start;
            self.frame_rate = frames as f64 / elapsed.as_secs_f64();
            self.frames_at_window_start = self.total_frames;
            self.window_start = now;
        }
    }

    /// Frames per second over the last completed window
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn reset(&mut self) {
        *self = Self::with_window(self.window);
    }
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_reported_after_window() {
        let mut counter = FrameRateCounter::with_window(Duration::from_secs(1));
        let start = counter.window_start;

        for i in 1..=29 {
            counter.tick_at(start + Duration::from_millis(i * 33));
        }
        assert_eq!(counter.frame_rate(), 0.0);

        counter.tick_at(start + Duration::from_secs(1));
        assert!((counter.frame_rate() - 30.0).abs() < 0.01);
        assert_eq!(counter.total_frames(), 30);
    }

    #[test]
    fn test_reset_clears_counts() {
        let mut counter = FrameRateCounter::new();
        counter.tick();
        counter.tick();
        counter.reset();
        assert_eq!(counter.total_frames(), 0);
        assert_eq!(counter.frame_rate(), 0.0);
    }
}
