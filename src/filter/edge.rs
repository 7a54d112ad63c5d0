//! Built-in edge-detection backend.
//!
//! Stand-in for an external imaging library: 3x3 Gaussian smoothing of the
//! luma plane, Sobel gradient magnitude, then a double threshold (strong
//! edges white, weak edges gray). Border handling clamps to the nearest
//! edge pixel. Chroma bytes in the packed tail are written as neutral gray
//! so the output keeps the input's byte layout.

use crate::error::FilterError;
use crate::filter::Filter;
use crate::FilterConfig;

const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

pub struct SobelEdgeFilter {
    low_threshold: f32,
    high_threshold: f32,
}

impl SobelEdgeFilter {
    pub fn new(config: &FilterConfig) -> Self {
        let low = config.low_threshold.max(0.0);
        Self {
            low_threshold: low,
            high_threshold: config.high_threshold.max(low),
        }
    }
}

impl Filter for SobelEdgeFilter {
    fn is_ready(&self) -> bool {
        true
    }

    fn apply(&self, frame: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FilterError> {
        let w = width as usize;
        let h = height as usize;
        let luma_len = w * h;
        if w == 0 || h == 0 || frame.len() < luma_len {
            return Err(FilterError::Failed(format!(
                "frame holds {} bytes, need {} luma bytes for {}x{}",
                frame.len(),
                luma_len,
                width,
                height
            )));
        }

        let smoothed = gaussian3(&frame[..luma_len], w, h);

        let mut out = vec![0u8; frame.len()];
        for row in 0..h {
            for col in 0..w {
                let mut gx = 0i32;
                let mut gy = 0i32;
                for ky in 0..3 {
                    for kx in 0..3 {
                        let sy = clamp_index(row as isize + ky as isize - 1, h);
                        let sx = clamp_index(col as isize + kx as isize - 1, w);
                        let sample = smoothed[sy * w + sx] as i32;
                        gx += SOBEL_X[ky][kx] * sample;
                        gy += SOBEL_Y[ky][kx] * sample;
                    }
                }
                let magnitude = ((gx * gx + gy * gy) as f32).sqrt();
                out[row * w + col] = if magnitude >= self.high_threshold {
                    255
                } else if magnitude >= self.low_threshold {
                    128
                } else {
                    0
                };
            }
        }

        for byte in &mut out[luma_len..] {
            *byte = 128;
        }
        Ok(out)
    }
}

/// Separable 3x3 Gaussian ([1, 2, 1] / 4 per axis), clamp-to-edge borders.
fn gaussian3(luma: &[u8], w: usize, h: usize) -> Vec<u8> {
    let mut rows = vec![0u16; w * h];
    for y in 0..h {
        for x in 0..w {
            let left = luma[y * w + clamp_index(x as isize - 1, w)] as u16;
            let mid = luma[y * w + x] as u16;
            let right = luma[y * w + clamp_index(x as isize + 1, w)] as u16;
            rows[y * w + x] = left + 2 * mid + right;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let up = rows[clamp_index(y as isize - 1, h) * w + x] as u32;
            let mid = rows[y * w + x] as u32;
            let down = rows[clamp_index(y as isize + 1, h) * w + x] as u32;
            out[y * w + x] = ((up + 2 * mid + down + 8) / 16) as u8;
        }
    }
    out
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}
