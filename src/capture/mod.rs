pub mod detect;
pub mod frame;
pub mod synthetic;
pub mod v4l2;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::CaptureError;
use crate::pipeline::PipelineControls;

pub use frame::{FrameReclaim, PackedFrame, Plane, RawFrame};
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// Pixel formats a capture device may deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Yuyv,
    Mjpeg,
}

/// A collaborator that produces raw planar frames on demand.
#[allow(async_fn_in_trait)]
pub trait CaptureSource {
    fn start(&mut self) -> Result<(), CaptureError>;

    async fn next_frame(&mut self) -> Result<RawFrame, CaptureError>;

    fn stop(&mut self) {}
}

/// Reusable plane storage shared between a source and its in-flight frames.
///
/// Frames freeze `BytesMut` planes into `Bytes`; once every downstream
/// reference is gone the reclaim hook recovers the unique allocation and
/// parks it here, so steady-state capture does not allocate per frame.
pub struct PlanePool {
    free: Mutex<Vec<[BytesMut; 3]>>,
    capacity: usize,
}

impl PlanePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    /// Hand out a cleared plane triple, reusing a parked one when available.
    pub fn acquire(&self) -> [BytesMut; 3] {
        let reused = self.free.lock().expect("plane pool poisoned").pop();
        match reused {
            Some(mut planes) => {
                for plane in &mut planes {
                    plane.clear();
                }
                planes
            }
            None => [BytesMut::new(), BytesMut::new(), BytesMut::new()],
        }
    }

    pub fn parked(&self) -> usize {
        self.free.lock().expect("plane pool poisoned").len()
    }
}

impl FrameReclaim for PlanePool {
    fn reclaim(&self, planes: [Bytes; 3]) {
        let [y, u, v] = planes;
        // Recover the allocations only if no other reference is alive.
        if let (Ok(y), Ok(u), Ok(v)) = (y.try_into_mut(), u.try_into_mut(), v.try_into_mut()) {
            let mut free = self.free.lock().expect("plane pool poisoned");
            if free.len() < self.capacity {
                free.push([y, u, v]);
            }
        }
    }
}

/// Capture loop: pull frames from the source and feed the processing channel.
///
/// The channel is small and bounded; if processing falls behind, this task
/// blocks on `send_async` and the device's own buffering drops frames. The
/// processing side additionally drains to the newest queued frame, so the
/// combined policy is keep-only-latest.
pub async fn run_capture<S: CaptureSource>(
    mut source: S,
    tx: flume::Sender<RawFrame>,
    controls: Arc<PipelineControls>,
) {
    while controls.is_running() {
        match source.next_frame().await {
            Ok(frame) => {
                if tx.send_async(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!("capture error: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
    source.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_pool_reuses_unique_planes() {
        let pool = PlanePool::new(2);
        let [mut y, mut u, mut v] = pool.acquire();
        y.extend_from_slice(&[1, 2, 3, 4]);
        u.extend_from_slice(&[5]);
        v.extend_from_slice(&[6]);

        pool.reclaim([y.freeze(), u.freeze(), v.freeze()]);
        assert_eq!(pool.parked(), 1);

        let [y, _, _] = pool.acquire();
        assert!(y.is_empty());
        assert!(y.capacity() >= 4);
        assert_eq!(pool.parked(), 0);
    }

    #[test]
    fn plane_pool_skips_shared_planes() {
        let pool = PlanePool::new(2);
        let [mut y, u, v] = pool.acquire();
        y.extend_from_slice(&[1, 2]);
        let y = y.freeze();
        let held = y.clone(); // still referenced elsewhere

        pool.reclaim([y, u.freeze(), v.freeze()]);
        assert_eq!(pool.parked(), 0);
        drop(held);
    }

    #[test]
    fn plane_pool_is_bounded() {
        let pool = PlanePool::new(1);
        for _ in 0..3 {
            let [y, u, v] = pool.acquire();
            pool.reclaim([y.freeze(), u.freeze(), v.freeze()]);
        }
        assert!(pool.parked() <= 1);
    }
}
