//! Single-slot frame handoff between the processing thread and the render
//! thread.
//!
//! Latest wins: a publish replaces whatever is queued, and the displaced
//! frame is handed back to the publisher so its buffer can be recycled. A
//! frame crosses the boundary as an owned value, never as a shared
//! reference, so the render side can upload without tearing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;

use crate::capture::PackedFrame;

pub struct FrameSlot {
    slot: Mutex<Option<PackedFrame>>,
    stats: CachePadded<SlotStats>,
}

#[derive(Default)]
struct SlotStats {
    published: AtomicU64,
    taken: AtomicU64,
    displaced: AtomicU64,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            stats: CachePadded::new(SlotStats::default()),
        }
    }

    /// Publish a processed frame, transferring ownership to the render side.
    /// Returns the displaced frame, if one was still queued, so the caller
    /// can recycle its buffer. The displaced frame is never rendered.
    pub fn publish(&self, frame: PackedFrame) -> Option<PackedFrame> {
        let displaced = self
            .slot
            .lock()
            .expect("frame slot poisoned")
            .replace(frame);
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        if displaced.is_some() {
            self.stats.displaced.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("frames_displaced").increment(1);
        }
        displaced
    }

    /// Take the latest frame, if any. Called by the render side at the start
    /// of each draw tick.
    pub fn take(&self) -> Option<PackedFrame> {
        let frame = self.slot.lock().expect("frame slot poisoned").take();
        if frame.is_some() {
            self.stats.taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// (published, taken, displaced) counters.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.stats.published.load(Ordering::Relaxed),
            self.stats.taken.load(Ordering::Relaxed),
            self.stats.displaced.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(sequence: u64) -> PackedFrame {
        PackedFrame {
            data: vec![sequence as u8; 8],
            width: 4,
            height: 2,
            sequence,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn take_returns_latest_published() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        assert_eq!(slot.take().unwrap().sequence, 1);
        assert!(slot.take().is_none());
    }

    #[test]
    fn intermediate_frame_is_never_observable() {
        let slot = FrameSlot::new();
        slot.publish(frame(10));
        // Frame 11 arrives and is superseded by 12 before any draw tick.
        let displaced = slot.publish(frame(11));
        assert_eq!(displaced.unwrap().sequence, 10);
        let displaced = slot.publish(frame(12));
        assert_eq!(displaced.unwrap().sequence, 11);

        // The consumer can only ever observe the newest frame.
        assert_eq!(slot.take().unwrap().sequence, 12);
        assert!(slot.take().is_none());
    }

    #[test]
    fn counters_track_displacement() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.publish(frame(2));
        slot.take();
        let (published, taken, displaced) = slot.counters();
        assert_eq!((published, taken, displaced), (2, 1, 1));
    }
}
