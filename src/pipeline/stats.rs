//! Throughput statistics aggregated over a fixed wall-clock window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

/// Read-only snapshot published once per sampling window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub frames_per_second: f64,
    pub average_processing_time_ms: f64,
}

/// Lock-free publication point for the latest snapshot. Written by the
/// processing thread, read by whichever thread renders the UI.
pub struct StatsPublisher {
    snapshot: ArcSwap<StatsSnapshot>,
}

impl Default for StatsPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsPublisher {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(StatsSnapshot::default()),
        }
    }

    pub fn publish(&self, snapshot: StatsSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn load(&self) -> StatsSnapshot {
        **self.snapshot.load()
    }
}

/// Windowed frame statistics. Mutated only by the processing thread; the
/// clock is passed in so the window arithmetic is testable.
pub struct WindowStats {
    window: Duration,
    window_start: Instant,
    frames: u32,
    accumulated: Duration,
}

impl WindowStats {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            window_start: now,
            frames: 0,
            accumulated: Duration::ZERO,
        }
    }

    /// Record one processed frame. Returns the published snapshot when this
    /// frame closes the sampling window; counters are reset for the next
    /// window before returning.
    pub fn record(&mut self, processing_time: Duration, now: Instant) -> Option<StatsSnapshot> {
        self.frames += 1;
        self.accumulated += processing_time;

        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let snapshot = StatsSnapshot {
            frames_per_second: self.frames as f64 * 1000.0 / elapsed_ms,
            average_processing_time_ms: self.accumulated.as_secs_f64() * 1000.0
                / self.frames as f64,
        };

        self.frames = 0;
        self.accumulated = Duration::ZERO;
        self.window_start = now;
        Some(snapshot)
    }

    pub fn window_frames(&self) -> u32 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_uniform_frames_over_one_second() {
        let t0 = Instant::now();
        let mut stats = WindowStats::new(Duration::from_millis(1000), t0);
        let per_frame = Duration::from_millis(4);

        let mut published = None;
        for i in 1..=30u64 {
            let at = t0 + Duration::from_millis(i * 1000 / 30);
            published = stats.record(per_frame, at);
            if i < 30 {
                assert!(published.is_none(), "window closed early at frame {}", i);
            }
        }

        let snapshot = published.expect("window must close on frame 30");
        assert!((snapshot.frames_per_second - 30.0).abs() < 1e-9);
        assert!((snapshot.average_processing_time_ms - 4.0).abs() < 1e-9);
        // Counters reset immediately after the window publishes.
        assert_eq!(stats.window_frames(), 0);
    }

    #[test]
    fn average_is_mean_of_recorded_durations() {
        let t0 = Instant::now();
        let mut stats = WindowStats::new(Duration::from_millis(100), t0);

        stats.record(Duration::from_millis(2), t0 + Duration::from_millis(30));
        stats.record(Duration::from_millis(4), t0 + Duration::from_millis(60));
        let snapshot = stats
            .record(Duration::from_millis(6), t0 + Duration::from_millis(100))
            .expect("window closes");

        assert!((snapshot.average_processing_time_ms - 4.0).abs() < 1e-9);
    }

    #[test]
    fn late_window_uses_actual_elapsed_time() {
        let t0 = Instant::now();
        let mut stats = WindowStats::new(Duration::from_millis(1000), t0);

        // 10 frames, but the window closes after 2000ms of wall clock.
        for i in 1..=9u64 {
            assert!(stats
                .record(Duration::from_millis(1), t0 + Duration::from_millis(i * 100))
                .is_none());
        }
        let snapshot = stats
            .record(Duration::from_millis(1), t0 + Duration::from_millis(2000))
            .expect("window closes");
        assert!((snapshot.frames_per_second - 5.0).abs() < 1e-9);
    }

    #[test]
    fn publisher_roundtrip() {
        let publisher = StatsPublisher::new();
        assert_eq!(publisher.load(), StatsSnapshot::default());

        let snapshot = StatsSnapshot {
            frames_per_second: 29.5,
            average_processing_time_ms: 3.2,
        };
        publisher.publish(snapshot);
        assert_eq!(publisher.load(), snapshot);
    }
}
