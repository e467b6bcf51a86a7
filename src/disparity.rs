//! # General disparity objects
//!
//! This module provides generic disparity traits and structures for use by different algorithms.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;

use crate::error::*;
use crate::frame::{GrayFloatImage, RectifiedPair};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Raw disparity value marking a pixel with no accepted match.
pub const INVALID_DISPARITY: f32 = f32::NAN;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// A generic floating point disparity map.
///
/// Pixels with no accepted match hold [`INVALID_DISPARITY`]; `min_disp`/`max_disp` track the
/// observed range over the valid pixels.
pub struct DisparityMap {
    data: GrayFloatImage,
    pub max_disp: Option<f32>,
    pub min_disp: Option<f32>,
}

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

pub trait DisparityAlgorithm {
    /// Compute the disparity map of the given rectified stereo pair.
    fn compute(&mut self, pair: &RectifiedPair) -> Result<DisparityMap>;
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DisparityMap {
    /// Create a map with every pixel marked invalid.
    pub fn new(width: usize, height: usize) -> Self {
        DisparityMap {
            data: GrayFloatImage::filled(width, height, INVALID_DISPARITY),
            min_disp: None,
            max_disp: None,
        }
    }

    pub fn width(&self) -> usize {
        self.data.width()
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data.get(x, y)
    }

    pub fn put(&mut self, x: usize, y: usize, val: f32) {
        self.data.put(x, y, val)
    }

    /// Mark a pixel as having no accepted match.
    pub fn invalidate(&mut self, x: usize, y: usize) {
        self.data.put(x, y, INVALID_DISPARITY)
    }

    /// True if the pixel holds an accepted match.
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        !self.data.get(x, y).is_nan()
    }

    /// Recompute the observed min/max disparity from the valid pixels.
    pub fn update_range(&mut self) {
        let mut min: Option<f32> = None;
        let mut max: Option<f32> = None;

        for y in 0..self.height() {
            for x in 0..self.width() {
                let d = self.data.get(x, y);
                if d.is_nan() {
                    continue;
                }
                min = Some(min.map_or(d, |m| m.min(d)));
                max = Some(max.map_or(d, |m| m.max(d)));
            }
        }

        self.min_disp = min;
        self.max_disp = max;
    }

    /// Converts the map into a Luma8 image, clamping raw values to the 8-bit range.
    ///
    /// Invalid pixels become 0.
    pub fn to_luma(&self) -> GrayImage {
        let mut new = GrayImage::new(self.width() as u32, self.height() as u32);

        for y in 0..new.height() {
            for x in 0..new.width() {
                let val = self.data.get(x as usize, y as usize);

                let val = if val.is_nan() {
                    0.0
                } else if val < 0.0 {
                    0.0
                } else if val > 255.0 {
                    255.0
                } else {
                    val
                };

                *new.get_pixel_mut(x, y) = image::Luma([val as u8]);
            }
        }

        new
    }

    /// Converts the map to a normalised GrayImage.
    ///
    /// Linearly rescales the observed [min_disp, max_disp] range onto the full 0..=255 range,
    /// higher disparity meaning closer. Invalid pixels become 0, and a degenerate range (all
    /// matched pixels at one disparity) maps every valid pixel to 0 as well.
    pub fn to_luma_normalised(&self) -> GrayImage {
        let mut new = GrayImage::new(self.width() as u32, self.height() as u32);

        let (min, mult) = match (self.min_disp, self.max_disp) {
            (Some(min), Some(max)) if max > min => (min, 255.0 / (max - min)),
            _ => (0.0, 0.0),
        };

        for y in 0..new.height() {
            for x in 0..new.width() {
                let raw = self.data.get(x as usize, y as usize);

                let val = if raw.is_nan() {
                    0.0
                } else {
                    let v = (raw - min) * mult;
                    if v < 0.0 {
                        0.0
                    } else if v > 255.0 {
                        255.0
                    } else {
                        v
                    }
                };

                *new.get_pixel_mut(x, y) = image::Luma([val as u8]);
            }
        }

        new
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
