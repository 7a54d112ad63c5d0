//! Frame types crossing the capture -> processing -> render boundaries.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

/// One plane of a raw camera frame.
#[derive(Debug, Clone, Default)]
pub struct Plane {
    /// Plane bytes. May include per-row padding when `stride > width`.
    pub data: Bytes,
    /// Distance in bytes between the starts of consecutive rows.
    pub stride: u32,
}

impl Plane {
    pub fn new(data: Bytes, stride: u32) -> Self {
        Self { data, stride }
    }
}

/// Returns plane storage to the owning capture source once a frame has been
/// fully processed. Invoked exactly once, from [`RawFrame`]'s `Drop`.
pub trait FrameReclaim: Send + Sync {
    fn reclaim(&self, planes: [Bytes; 3]);
}

/// Immutable view over one planar camera frame: luma plane plus two chroma
/// planes, I420-style. Owned by the capture source; plane storage flows back
/// to it through the reclaim hook when the frame is dropped, so release is
/// exactly-once on every exit path by construction.
pub struct RawFrame {
    planes: [Plane; 3],
    width: u32,
    height: u32,
    sequence: u64,
    timestamp: Instant,
    reclaim: Option<Arc<dyn FrameReclaim>>,
}

impl RawFrame {
    /// Planes ordered luma, chroma-U, chroma-V.
    pub fn new(planes: [Plane; 3], width: u32, height: u32, sequence: u64) -> Self {
        Self {
            planes,
            width,
            height,
            sequence,
            timestamp: Instant::now(),
            reclaim: None,
        }
    }

    pub fn with_reclaim(mut self, reclaim: Arc<dyn FrameReclaim>) -> Self {
        self.reclaim = Some(reclaim);
        self
    }

    pub fn planes(&self) -> &[Plane; 3] {
        &self.planes
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn chroma_u(&self) -> &Plane {
        &self.planes[1]
    }

    pub fn chroma_v(&self) -> &Plane {
        &self.planes[2]
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(reclaim) = self.reclaim.take() {
            let planes = std::mem::replace(
                &mut self.planes,
                [Plane::default(), Plane::default(), Plane::default()],
            );
            reclaim.reclaim(planes.map(|p| p.data));
        }
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// A single contiguous buffer in the layout the filter and GPU consume:
/// luma bytes first, then chroma-V bytes, then chroma-U bytes. Ownership
/// moves to whichever stage consumes it next; never shared concurrently.
#[derive(Debug)]
pub struct PackedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    /// Capture timestamp, carried through for end-to-end latency tracking.
    pub timestamp: Instant,
}

impl PackedFrame {
    /// The luma-plane prefix of the packed buffer, uploaded to the GPU.
    pub fn luma(&self) -> &[u8] {
        let len = (self.width as usize * self.height as usize).min(self.data.len());
        &self.data[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReclaim(AtomicUsize);

    impl FrameReclaim for CountingReclaim {
        fn reclaim(&self, _planes: [Bytes; 3]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn plane(len: usize, stride: u32) -> Plane {
        Plane::new(Bytes::from(vec![0u8; len]), stride)
    }

    #[test]
    fn drop_reclaims_exactly_once() {
        let reclaim = Arc::new(CountingReclaim(AtomicUsize::new(0)));
        let frame = RawFrame::new([plane(16, 4), plane(4, 2), plane(4, 2)], 4, 4, 1)
            .with_reclaim(reclaim.clone());
        drop(frame);
        assert_eq!(reclaim.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_without_reclaim_drops_cleanly() {
        let frame = RawFrame::new([plane(16, 4), plane(4, 2), plane(4, 2)], 4, 4, 1);
        drop(frame);
    }

    #[test]
    fn packed_luma_is_width_times_height_prefix() {
        let frame = PackedFrame {
            data: vec![7u8; 24],
            width: 4,
            height: 4,
            sequence: 0,
            timestamp: Instant::now(),
        };
        assert_eq!(frame.luma().len(), 16);
    }
}
