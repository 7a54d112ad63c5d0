//! Capture-to-render orchestration.
//!
//! Runs on the dedicated processing thread: converts each raw frame,
//! optionally routes it through the filter gateway, publishes the result to
//! the render handoff slot, and aggregates throughput statistics. Every
//! per-frame error is contained here; nothing below this loop can take the
//! pipeline down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::arena::BufferArena;
use crate::capture::{PackedFrame, RawFrame};
use crate::convert::convert;
use crate::filter::FilterGateway;
use crate::pipeline::{FrameSlot, PipelineControls, StatsPublisher, WindowStats};

/// How long the run loop waits for a frame before re-checking the stop flag.
const RECV_TICK: Duration = Duration::from_millis(50);

pub struct Orchestrator {
    arena: BufferArena,
    gateway: FilterGateway,
    slot: Arc<FrameSlot>,
    controls: Arc<PipelineControls>,
    stats: WindowStats,
    publisher: Arc<StatsPublisher>,
}

impl Orchestrator {
    pub fn new(
        gateway: FilterGateway,
        slot: Arc<FrameSlot>,
        controls: Arc<PipelineControls>,
        publisher: Arc<StatsPublisher>,
        stats_window: Duration,
    ) -> Self {
        Self {
            arena: BufferArena::default(),
            gateway,
            slot,
            controls,
            stats: WindowStats::new(stats_window, Instant::now()),
            publisher,
        }
    }

    /// Per-frame procedure. The raw frame is released on every exit path:
    /// it is dropped (and its planes reclaimed) when this function returns,
    /// whichever branch ran.
    pub fn process(&mut self, raw: RawFrame) {
        let started = Instant::now();

        let packed = match convert(&raw, &mut self.arena) {
            Ok(packed) => packed,
            Err(e) => {
                warn!("dropping frame {}: {}", raw.sequence(), e);
                metrics::counter!("convert_errors").increment(1);
                return;
            }
        };

        let packed = if self.controls.edge_enabled() {
            match self.gateway.apply(&packed.data, packed.width, packed.height) {
                Ok(filtered) => {
                    // The filtered buffer replaces the packed one; recycle
                    // the original so the next convert reuses it.
                    let PackedFrame {
                        data,
                        width,
                        height,
                        sequence,
                        timestamp,
                    } = packed;
                    self.arena.recycle(data);
                    PackedFrame {
                        data: filtered,
                        width,
                        height,
                        sequence,
                        timestamp,
                    }
                }
                Err(e) => {
                    // Fall back to the unfiltered frame for this tick.
                    debug!("filter fallback for frame {}: {}", packed.sequence, e);
                    metrics::counter!("filter_fallbacks").increment(1);
                    packed
                }
            }
        } else {
            packed
        };

        if let Some(displaced) = self.slot.publish(packed) {
            self.arena.recycle(displaced.data);
        }
        drop(raw);

        let elapsed = started.elapsed();
        metrics::histogram!("process_time_us").record(elapsed.as_micros() as f64);
        if let Some(snapshot) = self.stats.record(elapsed, Instant::now()) {
            metrics::gauge!("capture_fps").set(snapshot.frames_per_second);
            info!(
                "pipeline: {:.1} fps, {:.2} ms avg processing",
                snapshot.frames_per_second, snapshot.average_processing_time_ms
            );
            self.publisher.publish(snapshot);
        }
    }

    /// Blocking run loop. Drains the channel to the newest queued frame
    /// before each processing pass; superseded frames are released
    /// immediately (keep-only-latest).
    pub fn run(mut self, rx: Receiver<RawFrame>) {
        info!("processing loop started");
        while self.controls.is_running() {
            let mut raw = match rx.recv_timeout(RECV_TICK) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            while let Ok(newer) = rx.try_recv() {
                metrics::counter!("frames_superseded").increment(1);
                raw = newer;
            }
            self.process(raw);
        }
        info!("processing loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use crate::capture::{FrameReclaim, Plane};
    use crate::error::FilterError;
    use crate::filter::Filter;
    use crate::render::RenderMode;

    struct CountingReclaim(AtomicUsize);

    impl FrameReclaim for CountingReclaim {
        fn reclaim(&self, _planes: [Bytes; 3]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct IdentityFilter;

    impl Filter for IdentityFilter {
        fn is_ready(&self) -> bool {
            true
        }
        fn apply(&self, frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            Ok(frame.to_vec())
        }
    }

    struct PanickingFilter;

    impl Filter for PanickingFilter {
        fn is_ready(&self) -> bool {
            true
        }
        fn apply(&self, _frame: &[u8], _w: u32, _h: u32) -> Result<Vec<u8>, FilterError> {
            panic!("filter backend crashed");
        }
    }

    fn orchestrator(filter: Box<dyn Filter + Send>, slot: Arc<FrameSlot>) -> Orchestrator {
        Orchestrator::new(
            FilterGateway::new(filter),
            slot,
            Arc::new(PipelineControls::new(RenderMode::Normal, true)),
            Arc::new(StatsPublisher::new()),
            Duration::from_millis(1000),
        )
    }

    fn good_frame(sequence: u64, reclaim: &Arc<CountingReclaim>) -> RawFrame {
        let (w, h) = (8u32, 4u32);
        let luma = vec![sequence as u8; (w * h) as usize];
        let chroma = vec![128u8; (w / 2 * (h / 2)) as usize];
        RawFrame::new(
            [
                Plane::new(Bytes::from(luma), w),
                Plane::new(Bytes::from(chroma.clone()), w / 2),
                Plane::new(Bytes::from(chroma), w / 2),
            ],
            w,
            h,
            sequence,
        )
        .with_reclaim(reclaim.clone())
    }

    fn bad_frame(reclaim: &Arc<CountingReclaim>) -> RawFrame {
        RawFrame::new(
            [
                Plane::new(Bytes::new(), 8),
                Plane::new(Bytes::from(vec![0u8; 8]), 4),
                Plane::new(Bytes::from(vec![0u8; 8]), 4),
            ],
            8,
            4,
            99,
        )
        .with_reclaim(reclaim.clone())
    }

    #[test]
    fn successful_frame_is_published_and_released() {
        let slot = Arc::new(FrameSlot::new());
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let mut orch = orchestrator(Box::new(IdentityFilter), slot.clone());

        orch.process(good_frame(1, &reclaim));

        assert_eq!(reclaim.0.load(Ordering::SeqCst), 1);
        let published = slot.take().expect("frame published");
        assert_eq!(published.sequence, 1);
        assert_eq!(published.data.len(), 8 * 4 + 2 * 8);
    }

    #[test]
    fn malformed_frame_is_dropped_but_still_released() {
        let slot = Arc::new(FrameSlot::new());
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let mut orch = orchestrator(Box::new(IdentityFilter), slot.clone());

        orch.process(bad_frame(&reclaim));

        assert_eq!(reclaim.0.load(Ordering::SeqCst), 1);
        assert!(slot.take().is_none());

        // The loop keeps going: the next good frame flows through.
        orch.process(good_frame(2, &reclaim));
        assert_eq!(slot.take().unwrap().sequence, 2);
        assert_eq!(reclaim.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn filter_panic_falls_back_to_unfiltered_frame() {
        let slot = Arc::new(FrameSlot::new());
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let mut orch = orchestrator(Box::new(PanickingFilter), slot.clone());

        orch.process(good_frame(7, &reclaim));

        // The unfiltered packed frame reaches the slot and stats advance.
        let published = slot.take().expect("fallback frame published");
        assert_eq!(published.sequence, 7);
        assert_eq!(published.luma(), &[7u8; 32][..]);
        assert_eq!(orch.stats.window_frames(), 1);
        assert_eq!(reclaim.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_filter_passes_frames_through() {
        let slot = Arc::new(FrameSlot::new());
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let mut orch = orchestrator(Box::new(PanickingFilter), slot.clone());
        orch.controls.set_edge_enabled(false);

        orch.process(good_frame(3, &reclaim));
        assert_eq!(slot.take().unwrap().luma(), &[3u8; 32][..]);
    }

    #[test]
    fn displaced_frame_buffer_returns_to_arena() {
        let slot = Arc::new(FrameSlot::new());
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let mut orch = orchestrator(Box::new(IdentityFilter), slot.clone());

        orch.process(good_frame(1, &reclaim));
        orch.process(good_frame(2, &reclaim));

        // Frame 1 was displaced before any draw tick; its buffer is pooled
        // and only frame 2 is observable.
        assert!(orch.arena.pooled_buffers() >= 1);
        assert_eq!(slot.take().unwrap().sequence, 2);
        assert!(slot.take().is_none());
    }
}
