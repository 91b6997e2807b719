//! Semi-planar (NV12) to fully planar 4:2:0 conversion.
//!
//! A decoded surface holds a full-resolution luma plane and one
//! half-resolution chroma plane with U/V samples interleaved (`UVUV...`).
//! Surfaces are usually larger than the picture because of hardware
//! alignment, so the visible region is taken from the crop rectangle.
//!
//! The output is tightly packed with no row padding:
//!
//! ```text
//! +----------------------+  width * height bytes
//! | Y                    |
//! +----------+-----------+
//! | chroma 1 |              (width/2) * (height/2) bytes
//! +----------+
//! | chroma 2 |              (width/2) * (height/2) bytes
//! +----------+
//! ```
//!
//! With [`PlanarLayout::Yv12`] the first chroma plane is V (the odd bytes of
//! each interleaved pair), which is the byte order the reference decoder
//! produced. [`PlanarLayout::I420`] puts U first.

use vd_common::{CropRect, DecodeError, OutputDescriptor, PlanarLayout};

use crate::output::OutputBuffer;
use crate::pool::Surface;

/// Check that the visible region of `surface` can be converted.
fn validate(surface: &Surface<'_>, rect: &CropRect) -> Result<(), DecodeError> {
    let (x, y) = (rect.x as usize, rect.y as usize);
    let (w, h) = (rect.width as usize, rect.height as usize);

    if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
        return Err(DecodeError::InvalidGeometry(format!(
            "4:2:0 output needs even, non-zero dimensions, got {w}x{h}"
        )));
    }
    if x % 2 != 0 || y % 2 != 0 {
        return Err(DecodeError::InvalidGeometry(format!(
            "crop origin ({x}, {y}) splits a chroma sample"
        )));
    }
    if surface.pitch < x + w {
        return Err(DecodeError::InvalidGeometry(format!(
            "crop {}..{} exceeds pitch {}",
            x,
            x + w,
            surface.pitch
        )));
    }

    let luma_end = (y + h - 1) * surface.pitch + x + w;
    if surface.luma.len() < luma_end {
        return Err(DecodeError::InvalidGeometry(format!(
            "luma plane too small: need {luma_end}, got {}",
            surface.luma.len()
        )));
    }

    let chroma_end = (y / 2 + h / 2 - 1) * surface.pitch + x + w;
    if surface.chroma.len() < chroma_end {
        return Err(DecodeError::InvalidGeometry(format!(
            "chroma plane too small: need {chroma_end}, got {}",
            surface.chroma.len()
        )));
    }

    Ok(())
}

/// Convert the visible region of `surface` into `output`.
///
/// Returns the descriptor of the produced frame. On error the output buffer
/// is left untouched.
pub fn to_planar(
    surface: &Surface<'_>,
    layout: PlanarLayout,
    output: &mut OutputBuffer,
) -> Result<OutputDescriptor, DecodeError> {
    if surface.info.fourcc.is_packed_rgb() {
        return Err(DecodeError::UnsupportedFormat(surface.info.fourcc));
    }

    let rect = surface.info.visible_rect();
    validate(surface, &rect)?;

    let descriptor = OutputDescriptor::yuv420(rect.width, rect.height);
    let (w, h) = (rect.width as usize, rect.height as usize);
    let (cw, ch) = (w / 2, h / 2);

    let out = output.prepare(descriptor.byte_size as usize);
    let (luma_out, chroma_out) = out.split_at_mut(w * h);
    let (first, second) = chroma_out.split_at_mut(cw * ch);

    copy_luma(surface, &rect, luma_out);

    let (u_out, v_out) = match layout {
        PlanarLayout::Yv12 => (second, first),
        PlanarLayout::I420 => (first, second),
    };
    split_chroma(surface, &rect, u_out, v_out);

    Ok(descriptor)
}

/// Copy `rect.height` luma rows of `rect.width` bytes, skipping the pitch padding.
fn copy_luma(surface: &Surface<'_>, rect: &CropRect, dst: &mut [u8]) {
    let (x, y, w) = (rect.x as usize, rect.y as usize, rect.width as usize);
    for (row, out_row) in dst.chunks_exact_mut(w).enumerate() {
        let start = (y + row) * surface.pitch + x;
        out_row.copy_from_slice(&surface.luma[start..start + w]);
    }
}

/// Deinterleave `UVUV...` rows into separate U and V planes.
fn split_chroma(surface: &Surface<'_>, rect: &CropRect, u_out: &mut [u8], v_out: &mut [u8]) {
    let (x, w) = (rect.x as usize, rect.width as usize);
    let base_row = rect.y as usize / 2;
    let cw = w / 2;

    let rows = u_out.chunks_exact_mut(cw).zip(v_out.chunks_exact_mut(cw));
    for (row, (u_row, v_row)) in rows.enumerate() {
        let start = (base_row + row) * surface.pitch + x;
        let src = &surface.chroma[start..start + w];
        for ((pair, u), v) in src.chunks_exact(2).zip(u_row.iter_mut()).zip(v_row.iter_mut()) {
            *u = pair[0];
            *v = pair[1];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vd_common::{CapacityPolicy, FourCc, FrameInfo};

    /// NV12 surface whose luma byte at (row, col) is `row * pitch + col`
    /// (wrapping) and whose chroma pairs are `(u, v)`.
    fn make_surface(pitch: usize, height: usize, u: u8, v: u8) -> (Vec<u8>, Vec<u8>) {
        let luma = (0..pitch * height).map(|i| i as u8).collect();
        let mut chroma = vec![0u8; pitch * height / 2];
        for pair in chroma.chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        (luma, chroma)
    }

    fn info(width: u32, height: u32, crop: CropRect) -> FrameInfo {
        FrameInfo {
            width,
            height,
            crop,
            ..FrameInfo::default()
        }
    }

    #[test]
    fn crop_reports_true_picture_size() {
        let (luma, chroma) = make_surface(1920, 1088, 128, 128);
        let surface = Surface {
            info: info(1920, 1088, CropRect::new(0, 0, 1920, 1080)),
            pitch: 1920,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::new(CapacityPolicy::Exact);
        let desc = to_planar(&surface, PlanarLayout::Yv12, &mut out).unwrap();
        assert_eq!((desc.width, desc.height), (1920, 1080));
        assert_eq!(desc.byte_size, 1920 * 1080 * 3 / 2);
        assert_eq!(out.len(), desc.byte_size as usize);
    }

    #[test]
    fn yv12_puts_v_plane_first() {
        let (luma, chroma) = make_surface(8, 4, 0x40, 0xC0);
        let surface = Surface {
            info: info(8, 4, CropRect::new(0, 0, 8, 4)),
            pitch: 8,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        to_planar(&surface, PlanarLayout::Yv12, &mut out).unwrap();

        let bytes = out.as_slice();
        assert_eq!(&bytes[..32], &luma[..]);
        assert!(bytes[32..40].iter().all(|&b| b == 0xC0), "V plane");
        assert!(bytes[40..48].iter().all(|&b| b == 0x40), "U plane");
    }

    #[test]
    fn i420_puts_u_plane_first() {
        let (luma, chroma) = make_surface(8, 4, 0x40, 0xC0);
        let surface = Surface {
            info: info(8, 4, CropRect::new(0, 0, 8, 4)),
            pitch: 8,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        to_planar(&surface, PlanarLayout::I420, &mut out).unwrap();

        let bytes = out.as_slice();
        assert!(bytes[32..40].iter().all(|&b| b == 0x40));
        assert!(bytes[40..48].iter().all(|&b| b == 0xC0));
    }

    #[test]
    fn offset_crop_skips_padding_and_origin() {
        // 16x8 surface, visible 8x4 window at (2, 2).
        let pitch = 16;
        let luma: Vec<u8> = (0..pitch * 8).map(|i| i as u8).collect();
        let mut chroma = vec![0u8; pitch * 4];
        for (row, line) in chroma.chunks_exact_mut(pitch).enumerate() {
            for (col, byte) in line.iter_mut().enumerate() {
                *byte = (row * 100 + col) as u8;
            }
        }
        let surface = Surface {
            info: info(16, 8, CropRect::new(2, 2, 8, 4)),
            pitch,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        let desc = to_planar(&surface, PlanarLayout::I420, &mut out).unwrap();
        assert_eq!((desc.width, desc.height), (8, 4));

        let bytes = out.as_slice();
        for row in 0..4 {
            let expected: Vec<u8> = (0..8).map(|col| ((row + 2) * pitch + col + 2) as u8).collect();
            assert_eq!(&bytes[row * 8..row * 8 + 8], &expected[..], "luma row {row}");
        }

        // Chroma rows start at y/2 = 1, columns at x = 2.
        let u_plane = &bytes[32..40];
        let v_plane = &bytes[40..48];
        for row in 0..2 {
            for i in 0..4 {
                let src_row = row + 1;
                let src_col = 2 + i * 2;
                assert_eq!(u_plane[row * 4 + i], (src_row * 100 + src_col) as u8);
                assert_eq!(v_plane[row * 4 + i], (src_row * 100 + src_col + 1) as u8);
            }
        }
    }

    #[test]
    fn missing_crop_uses_full_surface() {
        let (luma, chroma) = make_surface(32, 32, 1, 2);
        let surface = Surface {
            info: info(32, 32, CropRect::default()),
            pitch: 32,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        let desc = to_planar(&surface, PlanarLayout::Yv12, &mut out).unwrap();
        assert_eq!(desc, OutputDescriptor::yuv420(32, 32));
    }

    #[test]
    fn packed_rgb_is_rejected() {
        let luma = vec![0u8; 64 * 4 * 2];
        let surface = Surface {
            info: FrameInfo {
                fourcc: FourCc::Rgb4,
                width: 64,
                height: 2,
                ..FrameInfo::default()
            },
            pitch: 256,
            luma: &luma,
            chroma: &[],
        };
        let mut out = OutputBuffer::default();
        let err = to_planar(&surface, PlanarLayout::Yv12, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(FourCc::Rgb4)));
        assert!(out.is_empty());
    }

    #[test]
    fn odd_crop_is_rejected_without_touching_output() {
        let (luma, chroma) = make_surface(16, 8, 0, 0);
        let surface = Surface {
            info: info(16, 8, CropRect::new(1, 0, 8, 4)),
            pitch: 16,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        out.prepare(6).copy_from_slice(&[9; 6]);
        let err = to_planar(&surface, PlanarLayout::Yv12, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidGeometry(_)));
        assert_eq!(out.as_slice(), &[9; 6]);
    }

    #[test]
    fn crop_past_pitch_is_rejected() {
        let (luma, chroma) = make_surface(16, 8, 0, 0);
        let surface = Surface {
            info: info(16, 8, CropRect::new(10, 0, 8, 4)),
            pitch: 16,
            luma: &luma,
            chroma: &chroma,
        };
        let mut out = OutputBuffer::default();
        assert!(to_planar(&surface, PlanarLayout::Yv12, &mut out).is_err());
    }
}
