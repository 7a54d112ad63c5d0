//! Pixel format conversion: planar I420 raw frames into the single packed
//! buffer the filter stage and the GPU upload path consume.
//!
//! Output layout is luma bytes first, then the chroma-V plane, then the
//! chroma-U plane. The V-before-U ordering is what the downstream filter
//! expects for its NV21-family input; see DESIGN.md.

use crate::arena::BufferArena;
use crate::capture::{PackedFrame, Plane, RawFrame};
use crate::error::ConvertError;

/// Pack a planar raw frame into one contiguous buffer.
///
/// The output is exactly `lumaSize + chromaVSize + chromaUSize` bytes. Rows
/// are copied individually when a plane carries stride padding, and no read
/// ever goes past a plane's length. Deterministic: the same input produces
/// byte-identical output.
pub fn convert(raw: &RawFrame, arena: &mut BufferArena) -> Result<PackedFrame, ConvertError> {
    let width = raw.width() as usize;
    let height = raw.height() as usize;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);

    let [luma, chroma_u, chroma_v] = raw.planes();
    check_plane(luma, 0, width, height, raw.width(), raw.height())?;
    check_plane(chroma_u, 1, chroma_width, chroma_height, raw.width(), raw.height())?;
    check_plane(chroma_v, 2, chroma_width, chroma_height, raw.width(), raw.height())?;

    let luma_size = width * height;
    let chroma_size = chroma_width * chroma_height;
    let mut out = arena.acquire(luma_size + 2 * chroma_size);

    copy_plane(&mut out, luma, width, height);
    copy_plane(&mut out, chroma_v, chroma_width, chroma_height);
    copy_plane(&mut out, chroma_u, chroma_width, chroma_height);

    Ok(PackedFrame {
        data: out,
        width: raw.width(),
        height: raw.height(),
        sequence: raw.sequence(),
        timestamp: raw.timestamp(),
    })
}

fn check_plane(
    plane: &Plane,
    index: usize,
    row_bytes: usize,
    rows: usize,
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    if plane.data.is_empty() {
        return Err(ConvertError::EmptyPlane { plane: index });
    }
    let stride = (plane.stride as usize).max(row_bytes);
    // The final row does not need trailing stride padding.
    let need = stride * rows.saturating_sub(1) + row_bytes;
    if plane.data.len() < need {
        return Err(ConvertError::PlaneTooShort {
            plane: index,
            got: plane.data.len(),
            need,
            width,
            height,
        });
    }
    Ok(())
}

fn copy_plane(out: &mut Vec<u8>, plane: &Plane, row_bytes: usize, rows: usize) {
    let stride = (plane.stride as usize).max(row_bytes);
    if stride == row_bytes {
        out.extend_from_slice(&plane.data[..row_bytes * rows]);
        return;
    }
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&plane.data[start..start + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn raw(width: u32, height: u32, planes: [Vec<u8>; 3], strides: [u32; 3]) -> RawFrame {
        let [y, u, v] = planes;
        RawFrame::new(
            [
                Plane::new(Bytes::from(y), strides[0]),
                Plane::new(Bytes::from(u), strides[1]),
                Plane::new(Bytes::from(v), strides[2]),
            ],
            width,
            height,
            0,
        )
    }

    fn tight_raw(width: u32, height: u32) -> RawFrame {
        let luma: Vec<u8> = (0..width * height).map(|i| i as u8).collect();
        let chroma = (width / 2) * (height / 2);
        let u: Vec<u8> = (0..chroma).map(|i| 100 + (i % 50) as u8).collect();
        let v: Vec<u8> = (0..chroma).map(|i| 200 - (i % 50) as u8).collect();
        raw(width, height, [luma, u, v], [width, width / 2, width / 2])
    }

    #[test]
    fn output_size_is_luma_plus_two_chroma() {
        let mut arena = BufferArena::default();
        let packed = convert(&tight_raw(8, 4), &mut arena).unwrap();
        assert_eq!(packed.data.len(), 8 * 4 + 2 * (4 * 2));
    }

    #[test]
    fn output_order_is_luma_then_v_then_u() {
        let mut arena = BufferArena::default();
        let y = vec![1u8; 16];
        let u = vec![2u8; 4];
        let v = vec![3u8; 4];
        let packed = convert(&raw(4, 4, [y, u, v], [4, 2, 2]), &mut arena).unwrap();
        assert_eq!(&packed.data[..16], &[1u8; 16][..]);
        assert_eq!(&packed.data[16..20], &[3u8; 4][..]);
        assert_eq!(&packed.data[20..24], &[2u8; 4][..]);
    }

    #[test]
    fn conversion_is_deterministic() {
        let mut arena = BufferArena::default();
        let frame = tight_raw(16, 8);
        let first = convert(&frame, &mut arena).unwrap();
        let second = convert(&frame, &mut arena).unwrap();
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn stride_padding_is_skipped() {
        let mut arena = BufferArena::default();
        // 4x2 luma with stride 6: rows [0..4] valid, [4..6] padding.
        let mut y = Vec::new();
        y.extend_from_slice(&[1, 2, 3, 4, 0xAA, 0xAA]);
        y.extend_from_slice(&[5, 6, 7, 8]);
        let packed = convert(&raw(4, 2, [y, vec![9; 2], vec![9; 2]], [6, 2, 2]), &mut arena)
            .unwrap();
        assert_eq!(&packed.data[..8], &[1, 2, 3, 4, 5, 6, 7, 8][..]);
    }

    #[test]
    fn empty_plane_is_rejected() {
        let mut arena = BufferArena::default();
        let err = convert(&raw(4, 4, [vec![], vec![0; 4], vec![0; 4]], [4, 2, 2]), &mut arena)
            .unwrap_err();
        assert_eq!(err, ConvertError::EmptyPlane { plane: 0 });
    }

    #[test]
    fn short_luma_plane_is_rejected() {
        let mut arena = BufferArena::default();
        let err = convert(&raw(4, 4, [vec![0; 10], vec![0; 4], vec![0; 4]], [4, 2, 2]), &mut arena)
            .unwrap_err();
        assert!(matches!(err, ConvertError::PlaneTooShort { plane: 0, .. }));
    }

    #[test]
    fn short_chroma_plane_is_rejected() {
        let mut arena = BufferArena::default();
        let err = convert(&raw(4, 4, [vec![0; 16], vec![0; 1], vec![0; 4]], [4, 2, 2]), &mut arena)
            .unwrap_err();
        assert!(matches!(err, ConvertError::PlaneTooShort { plane: 1, .. }));
    }
}
