//! V4L2 capture source producing planar I420 raw frames.

use std::sync::Arc;

use bytes::BytesMut;
use tracing::info;
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{CaptureSource, Plane, PlanePool, RawFrame, SourceFormat};
use crate::error::CaptureError;
use crate::CaptureConfig;

/// V4L2 capture with memory-mapped streaming. The device delivers YUYV or
/// MJPEG; both are normalized to three I420 planes so the rest of the
/// pipeline sees one raw-frame shape.
pub struct V4l2Source {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    pool: Arc<PlanePool>,
    sequence: u64,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotACaptureDevice);
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            SourceFormat::Yuyv => FourCC::new(b"YUYV"),
            SourceFormat::Mjpeg => FourCC::new(b"MJPG"),
        };
        device.set_format(&fmt)?;

        let pool = PlanePool::new(config.buffer_count as usize);

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            pool,
            sequence: 0,
        })
    }

    fn build_frame(&mut self, device_bytes: &[u8]) -> Result<RawFrame, CaptureError> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;

        let [mut y, mut u, mut v] = self.pool.acquire();
        match self.config.format {
            SourceFormat::Yuyv => {
                yuyv_to_i420(device_bytes, width, height, &mut y, &mut u, &mut v)?
            }
            SourceFormat::Mjpeg => {
                let mut decoder = zune_jpeg::JpegDecoder::new(device_bytes);
                let rgb = decoder
                    .decode()
                    .map_err(|e| CaptureError::JpegDecode(e.to_string()))?;
                rgb_to_i420(&rgb, width, height, &mut y, &mut u, &mut v)?;
            }
        }

        self.sequence += 1;
        let chroma_stride = (width / 2) as u32;
        let frame = RawFrame::new(
            [
                Plane::new(y.freeze(), width as u32),
                Plane::new(u.freeze(), chroma_stride),
                Plane::new(v.freeze(), chroma_stride),
            ],
            self.config.width,
            self.config.height,
            self.sequence,
        )
        .with_reclaim(self.pool.clone());
        Ok(frame)
    }
}

impl CaptureSource for V4l2Source {
    fn start(&mut self) -> Result<(), CaptureError> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;
        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::StreamNotStarted)?;
        let (buf, _meta) = stream.next()?;

        // The mmap'd buffer is only valid until the next dequeue.
        let frame_bytes = buf.to_vec();
        self.build_frame(&frame_bytes)
    }

    fn stop(&mut self) {
        self.stream = None;
    }
}

/// Split packed YUYV (4:2:2) into I420 planes, subsampling chroma
/// vertically by taking even rows.
fn yuyv_to_i420(
    src: &[u8],
    width: usize,
    height: usize,
    y: &mut BytesMut,
    u: &mut BytesMut,
    v: &mut BytesMut,
) -> Result<(), CaptureError> {
    let expected = width * height * 2;
    if src.len() < expected {
        return Err(CaptureError::ShortFrame {
            expected,
            got: src.len(),
        });
    }

    y.reserve(width * height);
    u.reserve(width * height / 4);
    v.reserve(width * height / 4);

    for row in 0..height {
        let line = &src[row * width * 2..(row + 1) * width * 2];
        let take_chroma = row % 2 == 0;
        for quad in line.chunks_exact(4) {
            y.extend_from_slice(&[quad[0], quad[2]]);
            if take_chroma {
                u.extend_from_slice(&[quad[1]]);
                v.extend_from_slice(&[quad[3]]);
            }
        }
    }
    Ok(())
}

/// Convert interleaved RGB to I420 planes (BT.601 full range, integer
/// approximation). Chroma is sampled at the top-left pixel of each 2x2 block.
fn rgb_to_i420(
    src: &[u8],
    width: usize,
    height: usize,
    y: &mut BytesMut,
    u: &mut BytesMut,
    v: &mut BytesMut,
) -> Result<(), CaptureError> {
    let expected = width * height * 3;
    if src.len() < expected {
        return Err(CaptureError::ShortFrame {
            expected,
            got: src.len(),
        });
    }

    y.reserve(width * height);
    u.reserve(width * height / 4);
    v.reserve(width * height / 4);

    for row in 0..height {
        for col in 0..width {
            let i = (row * width + col) * 3;
            let (r, g, b) = (src[i] as i32, src[i + 1] as i32, src[i + 2] as i32);
            let luma = (77 * r + 150 * g + 29 * b) >> 8;
            y.extend_from_slice(&[luma.clamp(0, 255) as u8]);
            if row % 2 == 0 && col % 2 == 0 {
                let cb = ((-43 * r - 84 * g + 127 * b) >> 8) + 128;
                let cr = ((127 * r - 106 * g - 21 * b) >> 8) + 128;
                u.extend_from_slice(&[cb.clamp(0, 255) as u8]);
                v.extend_from_slice(&[cr.clamp(0, 255) as u8]);
            }
        }
    }
    Ok(())
}
