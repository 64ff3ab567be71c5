use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of recent frame durations; the adaptive budget reads its fps.
#[derive(Debug)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    /// Push one frame, dropping the oldest once the window is full.
    pub fn record(&mut self, dt: Duration) {
        if self.window.len() == self.capacity
            && let Some(oldest) = self.window.pop_front()
        {
            self.total = self.total.saturating_sub(oldest);
        }
        self.window.push_back(dt);
        self.total += dt;
    }

    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    pub fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window.iter().copied().min().unwrap_or_default()
    }

    /// Most recent frame, if any.
    pub fn last(&self) -> Option<Duration> {
        self.window.back().copied()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    /// Frames per second over the window; `0.0` until something is measured.
    pub fn fps(&self) -> f32 {
        let avg = self.average().as_secs_f32();
        if avg > 0.0 { 1.0 / avg } else { 0.0 }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.total = Duration::ZERO;
    }
}

impl Default for FrameTimer {
    /// Two seconds of frames at 60 fps.
    fn default() -> Self {
        Self::new(120)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn window_statistics() {
        let mut timer = FrameTimer::new(3);
        for v in [10, 20, 30] {
            timer.record(ms(v));
        }
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), ms(20));
        assert_eq!(timer.max(), ms(30));
        assert_eq!(timer.min(), ms(10));
        assert_eq!(timer.last(), Some(ms(30)));
    }

    #[test]
    fn oldest_frame_leaves_the_window() {
        let mut timer = FrameTimer::new(2);
        for v in [10, 20, 30] {
            timer.record(ms(v));
        }
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), ms(25));
        assert_eq!(timer.min(), ms(20));
    }

    #[test]
    fn fps_is_zero_until_measured() {
        let mut timer = FrameTimer::new(4);
        assert_eq!(timer.fps(), 0.0);
        timer.record(ms(20));
        assert!((timer.fps() - 50.0).abs() < 0.01);
        timer.reset();
        assert_eq!(timer.count(), 0);
        assert_eq!(timer.last(), None);
    }
}
