//! # Image rectification
//!
//! This module applies a precomputed remap field to a raw distorted image, producing a
//! corrected image at the field's destination resolution.
//!
//! Out-of-bounds source lookups are recovered locally with a constant border fill; nothing
//! here fails a frame.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::{GrayImage, Luma};

use crate::calibration::{CalibrationGrid, RemapField};
use crate::frame::RawImage;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Fill value for destination pixels whose source lookup falls out of bounds.
const BORDER_FILL: u8 = 0;

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Rectify a raw image with a precomputed remap field.
///
/// Every destination pixel whose source coordinate lies within the source image is sampled
/// with bilinear interpolation; everything else is filled with the constant border value.
pub fn rectify(raw: &RawImage, map: &RemapField) -> GrayImage {
    let mut dest = GrayImage::new(map.width() as u32, map.height() as u32);

    let src_w = raw.width() as f32;
    let src_h = raw.height() as f32;

    for dy in 0..map.height() {
        for dx in 0..map.width() {
            let (sx, sy) = map.lookup(dx, dy);

            let val = if sx >= 0.0 && sx < src_w && sy >= 0.0 && sy < src_h {
                sample_bilinear(raw, sx, sy)
            } else {
                BORDER_FILL
            };

            dest.put_pixel(dx as u32, dy as u32, Luma([val]));
        }
    }

    dest
}

/// Rectify directly from the calibration grid, without a cached remap field.
///
/// Interpolates the coarse grid per destination pixel and nearest-samples the source, which
/// is slower per pixel and less accurate than [`rectify`] but needs no precomputation.
/// Intended for reduced-resolution preview output. Offsets outside the normalised [0, 1]
/// range mark invalid cells and produce the border fill.
pub fn rectify_direct(
    raw: &RawImage,
    grid: &CalibrationGrid,
    width: usize,
    height: usize,
) -> GrayImage {
    let mut dest = GrayImage::new(width as u32, height as u32);

    let cells_x = grid.cells_x();
    let cells_y = grid.cells_y();

    for dy in 0..height {
        // Grid rows are stored bottom-to-top, flip the sample row
        let v = if height > 1 {
            dy as f32 * (cells_y - 1) as f32 / (height - 1) as f32
        } else {
            0.0
        };
        let v = (cells_y - 1) as f32 - v;

        for dx in 0..width {
            let u = if width > 1 {
                dx as f32 * (cells_x - 1) as f32 / (width - 1) as f32
            } else {
                0.0
            };

            let (ox, oy) = sample_grid(grid, u, v);

            let val = if (0.0..=1.0).contains(&ox) && (0.0..=1.0).contains(&oy) {
                let sx = ((ox * raw.width() as f32) as usize).min(raw.width() - 1);
                let sy = ((oy * raw.height() as f32) as usize).min(raw.height() - 1);
                raw.get(sx, sy)
            } else {
                BORDER_FILL
            };

            dest.put_pixel(dx as u32, dy as u32, Luma([val]));
        }
    }

    dest
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Bilinear sample of the source image at a sub-pixel coordinate. The coordinate must be
/// within image bounds; the forward neighbours are clamped at the edges.
fn sample_bilinear(raw: &RawImage, x: f32, y: f32) -> u8 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(raw.width() - 1);
    let y1 = (y0 + 1).min(raw.height() - 1);

    let wx = x - x0 as f32;
    let wy = y - y0 as f32;

    let top = raw.get(x0, y0) as f32 * (1.0 - wx) + raw.get(x1, y0) as f32 * wx;
    let bottom = raw.get(x0, y1) as f32 * (1.0 - wx) + raw.get(x1, y1) as f32 * wx;

    (top * (1.0 - wy) + bottom * wy).round() as u8
}

/// Bilinear sample of the normalised (x, y) offset pair at a coarse grid coordinate.
fn sample_grid(grid: &CalibrationGrid, u: f32, v: f32) -> (f32, f32) {
    let x0 = u.floor() as usize;
    let y0 = v.floor() as usize;
    let x1 = (x0 + 1).min(grid.cells_x() - 1);
    let y1 = (y0 + 1).min(grid.cells_y() - 1);

    let wx = u - x0 as f32;
    let wy = v - y0 as f32;

    let (x00, y00) = grid.offset(x0, y0);
    let (x10, y10) = grid.offset(x1, y0);
    let (x01, y01) = grid.offset(x0, y1);
    let (x11, y11) = grid.offset(x1, y1);

    let ox = x00 * (1.0 - wx) * (1.0 - wy)
        + x10 * wx * (1.0 - wy)
        + x01 * (1.0 - wx) * wy
        + x11 * wx * wy;
    let oy = y00 * (1.0 - wx) * (1.0 - wy)
        + y10 * wx * (1.0 - wy)
        + y01 * (1.0 - wx) * wy
        + y11 * wx * wy;

    (ox, oy)
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationGrid, RemapField};
    use crate::frame::RawImage;

    /// Deterministic noise texture.
    fn noise(width: usize, height: usize) -> Vec<u8> {
        let mut state = 0x1234_5678u32;
        (0..width * height)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    /// Calibration grid whose remap field is the exact identity for a `width`x`height`
    /// destination over a source of the same size.
    fn identity_grid(cells: usize, width: usize, height: usize) -> CalibrationGrid {
        let mut data = Vec::with_capacity(cells * cells * 2);
        for row in 0..cells {
            // Stored bottom-to-top: the last stored row must land on destination row 0
            let gy = cells - 1 - row;
            for cx in 0..cells {
                let x = cx as f32 / (cells - 1) as f32 * (width - 1) as f32 / width as f32;
                let y = gy as f32 / (cells - 1) as f32 * (height - 1) as f32 / height as f32;
                data.push(x);
                data.push(y);
            }
        }
        CalibrationGrid::new(data, cells * 2, cells).unwrap()
    }

    #[test]
    fn identity_remap_leaves_image_unchanged() {
        let (w, h) = (16, 8);
        let buf = noise(w, h);
        let raw = RawImage::new(&buf, w, h).unwrap();

        let grid = identity_grid(3, w, h);
        let map = RemapField::from_grid(&grid, w, h);
        let out = rectify(&raw, &map);

        for y in 0..h {
            for x in 0..w {
                assert_eq!(
                    out.get_pixel(x as u32, y as u32)[0],
                    raw.get(x, y),
                    "pixel ({}, {})",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn out_of_bounds_lookups_fill_with_border() {
        let (w, h) = (8, 8);
        let buf = vec![200u8; w * h];
        let raw = RawImage::new(&buf, w, h).unwrap();

        // All offsets far outside the normalised range
        let grid = CalibrationGrid::new(vec![1.5, -0.5, 1.5, -0.5], 4, 1).unwrap();
        let map = RemapField::from_grid(&grid, w, h);
        let out = rectify(&raw, &map);

        assert!(out.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn boundary_coordinates_are_inclusive_exclusive() {
        let (w, h) = (4, 4);
        let buf = vec![77u8; w * h];
        let raw = RawImage::new(&buf, w, h).unwrap();

        // x offset resolves to exactly the source width: out of bounds
        let grid = CalibrationGrid::new(vec![1.0, 0.5, 1.0, 0.5], 4, 1).unwrap();
        let map = RemapField::from_grid(&grid, w, h);
        let out = rectify(&raw, &map);
        assert!(out.pixels().all(|p| p[0] == 0));

        // Just inside the far edge: sampled
        let grid = CalibrationGrid::new(vec![0.9, 0.5, 0.9, 0.5], 4, 1).unwrap();
        let map = RemapField::from_grid(&grid, w, h);
        let out = rectify(&raw, &map);
        assert!(out.pixels().all(|p| p[0] == 77));
    }

    #[test]
    fn direct_path_matches_source_on_identity_grid() {
        let (w, h) = (16, 8);
        // Smooth ramp, adjacent pixels differ by 1
        let buf: Vec<u8> = (0..w * h).map(|i| ((i % w + i / w) % 256) as u8).collect();
        let raw = RawImage::new(&buf, w, h).unwrap();

        let grid = identity_grid(3, w, h);
        let out = rectify_direct(&raw, &grid, w, h);

        for y in 0..h {
            for x in 0..w {
                let got = out.get_pixel(x as u32, y as u32)[0] as i16;
                let want = raw.get(x, y) as i16;
                assert!(
                    (got - want).abs() <= 1,
                    "pixel ({}, {}): {} vs {}",
                    x,
                    y,
                    got,
                    want
                );
            }
        }
    }

    #[test]
    fn direct_path_marks_invalid_cells_with_border() {
        let (w, h) = (8, 4);
        let buf = vec![123u8; w * h];
        let raw = RawImage::new(&buf, w, h).unwrap();

        // Offsets above 1.0 are invalid markers
        let grid = CalibrationGrid::new(vec![2.0, 2.0, 2.0, 2.0], 4, 1).unwrap();
        let out = rectify_direct(&raw, &grid, w, h);

        assert!(out.pixels().all(|p| p[0] == 0));
    }
}
