//! Device-free capture source emitting a deterministic moving test pattern.
//!
//! Used when no camera is present and by the integration tests: frame
//! contents are a pure function of the sequence number, so two sources with
//! the same geometry produce byte-identical streams.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capture::{CaptureSource, Plane, PlanePool, RawFrame};
use crate::error::CaptureError;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    pool: Arc<PlanePool>,
    sequence: u64,
    started: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        let fps = fps.max(1);
        Self {
            width,
            height,
            interval: Duration::from_micros(1_000_000 / fps as u64),
            pool: PlanePool::new(4),
            sequence: 0,
            started: false,
        }
    }

    /// Build the next frame without pacing. Diagonal gradient plus a bright
    /// square sweeping horizontally, so edge filters have real structure to
    /// find; chroma is neutral gray.
    pub fn make_frame(&mut self) -> RawFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let seq = self.sequence;
        self.sequence += 1;

        let [mut y, mut u, mut v] = self.pool.acquire();
        y.reserve(w * h);

        let square = 40.min(w / 4).max(1);
        let sweep = ((seq as usize * 3) % w.max(1), h / 3);
        for row in 0..h {
            for col in 0..w {
                let in_square = col >= sweep.0
                    && col < (sweep.0 + square).min(w)
                    && row >= sweep.1
                    && row < (sweep.1 + square).min(h);
                let value = if in_square {
                    230
                } else {
                    ((col + row + seq as usize) % 256) as u8
                };
                y.extend_from_slice(&[value]);
            }
        }

        let chroma_len = w.div_ceil(2) * h.div_ceil(2);
        u.resize(chroma_len, 128);
        v.resize(chroma_len, 128);

        let chroma_stride = self.width.div_ceil(2);
        RawFrame::new(
            [
                Plane::new(y.freeze(), self.width),
                Plane::new(u.freeze(), chroma_stride),
                Plane::new(v.freeze(), chroma_stride),
            ],
            self.width,
            self.height,
            seq,
        )
        .with_reclaim(self.pool.clone())
    }
}

impl CaptureSource for SyntheticSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        info!(
            "Synthetic source started: {}x{} test pattern",
            self.width, self.height
        );
        self.started = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.started {
            return Err(CaptureError::StreamNotStarted);
        }
        tokio::time::sleep(self.interval).await;
        Ok(self.make_frame())
    }

    fn stop(&mut self) {
        self.started = false;
    }
}
