//! # Distortion calibration
//!
//! This module provides the coarse per-camera calibration grid and the builder turning it
//! into a dense per-pixel remap field at the destination resolution.
//!
//! The camera reports distortion as a coarse grid of interleaved normalised (x, y) source
//! offsets, rows stored bottom-to-top relative to the destination image. Building a remap
//! field unpacks that grid (reversing the row order), denormalises the offsets into
//! destination pixel units and bilinearly upsamples each axis field to the full destination
//! resolution.
//!
//! No bounds validation happens here: out-of-range offsets pass through unclamped and are
//! resolved by the rectifier.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::error::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Coarse per-camera distortion calibration grid.
///
/// `width` counts floats per row (two per cell, matching the stride the camera reports),
/// `height` counts rows. Values are normalised source coordinates in [0, 1]; out-of-range
/// values mark invalid cells and are passed through untouched.
#[derive(Debug, Clone)]
pub struct CalibrationGrid {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

/// Dense per-pixel remap for one camera.
///
/// Each destination pixel maps to a source pixel coordinate in source image units. Values
/// are not clamped to any source bounds; consumers decide validity.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapField {
    x_field: Vec<f32>,
    y_field: Vec<f32>,
    width: usize,
    height: usize,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CalibrationGrid {
    /// Wrap a raw calibration buffer, checking it holds whole (x, y) pairs and matches the
    /// declared grid dimensions.
    pub fn new(data: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if width < 2 || width % 2 != 0 || height == 0 || data.len() != width * height {
            return Err(Error::MalformedCalibration {
                width,
                height,
                len: data.len(),
            });
        }

        Ok(CalibrationGrid {
            data,
            width,
            height,
        })
    }

    /// Number of grid cells per row.
    pub fn cells_x(&self) -> usize {
        self.width / 2
    }

    /// Number of grid rows.
    pub fn cells_y(&self) -> usize {
        self.height
    }

    /// The normalised (x, y) offset pair stored at a cell, in storage order.
    pub(crate) fn offset(&self, cell_x: usize, row: usize) -> (f32, f32) {
        let idx = cell_x * 2 + row * self.width;
        (self.data[idx], self.data[idx + 1])
    }
}

impl RemapField {
    /// Build the dense remap for a destination resolution from a calibration grid.
    ///
    /// Grid rows are unpacked bottom-to-top: destination row 0 reads the last grid row.
    /// Offsets are denormalised to destination pixel units, then each coarse axis field is
    /// upsampled with bilinear interpolation. Pure function of the grid: identical inputs
    /// produce identical fields.
    pub fn from_grid(grid: &CalibrationGrid, width: usize, height: usize) -> Self {
        let cells_x = grid.cells_x();
        let cells_y = grid.cells_y();

        let mut coarse_x = vec![0.0f32; cells_x * cells_y];
        let mut coarse_y = vec![0.0f32; cells_x * cells_y];

        for cy in 0..cells_y {
            // Rows are stored bottom-to-top, unpack in reverse
            let src_row = cells_y - cy - 1;

            for cx in 0..cells_x {
                let (ox, oy) = grid.offset(cx, src_row);
                coarse_x[cx + cy * cells_x] = ox * width as f32;
                coarse_y[cx + cy * cells_x] = oy * height as f32;
            }
        }

        RemapField {
            x_field: upsample_bilinear(&coarse_x, cells_x, cells_y, width, height),
            y_field: upsample_bilinear(&coarse_y, cells_x, cells_y, width, height),
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The source coordinate a destination pixel maps to.
    pub fn lookup(&self, x: usize, y: usize) -> (f32, f32) {
        let idx = x + y * self.width;
        (self.x_field[idx], self.y_field[idx])
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Bilinear upsample of a coarse scalar field to the destination resolution.
///
/// Sample positions are corner-aligned so that a linear coarse ramp upsamples to an exactly
/// linear dense field.
fn upsample_bilinear(
    src: &[f32],
    src_width: usize,
    src_height: usize,
    dest_width: usize,
    dest_height: usize,
) -> Vec<f32> {
    let mut dest = vec![0.0f32; dest_width * dest_height];

    for dy in 0..dest_height {
        let v = if dest_height > 1 {
            dy as f32 * (src_height - 1) as f32 / (dest_height - 1) as f32
        } else {
            0.0
        };
        let y0 = v.floor() as usize;
        let y1 = (y0 + 1).min(src_height - 1);
        let wy = v - y0 as f32;

        for dx in 0..dest_width {
            let u = if dest_width > 1 {
                dx as f32 * (src_width - 1) as f32 / (dest_width - 1) as f32
            } else {
                0.0
            };
            let x0 = u.floor() as usize;
            let x1 = (x0 + 1).min(src_width - 1);
            let wx = u - x0 as f32;

            let top = src[x0 + y0 * src_width] * (1.0 - wx) + src[x1 + y0 * src_width] * wx;
            let bottom = src[x0 + y1 * src_width] * (1.0 - wx) + src[x1 + y1 * src_width] * wx;

            dest[dx + dy * dest_width] = top * (1.0 - wy) + bottom * wy;
        }
    }

    dest
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
