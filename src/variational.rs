//! # Variational disparity computation
//!
//! Dense disparity via minimisation of a global energy functional: a brightness-constancy
//! data term balanced against a quadratic (Tichonov) smoothness term, relaxed with Jacobi
//! iterations. Trades higher cost for better coverage than block matching, so it runs on a
//! downscaled copy of the pair and upsamples the result back to full resolution with cubic
//! interpolation.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::filter::median_filter;
use serde::Deserialize;

use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;
use crate::frame::{GrayFloatImage, RectifiedPair};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct Variational {
    params: Params,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Linear scale the input pair is reduced to before solving.
    pub scale: f32,
    /// Number of relaxation sweeps.
    pub iterations: usize,
    /// Lower bound of the disparity field.
    pub min_disparity: f32,
    /// Upper bound of the disparity field. Must be above `min_disparity`.
    pub max_disparity: f32,
    /// Tichonov smoothness weight balancing the data term.
    pub smoothness: f32,
    /// Apply a 3x3 median filter to the solved field before upsampling.
    pub median_filter: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Params {
            scale: 0.25,
            iterations: 50,
            min_disparity: -50.0,
            max_disparity: 50.0,
            smoothness: 0.15,
            median_filter: true,
        }
    }
}

impl Variational {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}

impl DisparityAlgorithm for Variational {
    /// Compute a dense disparity map for the given rectified pair.
    fn compute(&mut self, pair: &RectifiedPair) -> Result<DisparityMap> {
        let width = pair.width();
        let height = pair.height();

        if pair.right.width() as usize != width || pair.right.height() as usize != height {
            return Err(Error::DimensionMismatch(
                width,
                height,
                pair.right.width() as usize,
                pair.right.height() as usize,
            ));
        }

        let range = self.params.max_disparity - self.params.min_disparity;
        if width == 0 || height == 0 || range <= 0.0 {
            return Ok(DisparityMap::new(width, height));
        }

        let scale = self.params.scale.max(0.01).min(1.0);
        let low_w = ((width as f32 * scale).round() as u32).max(2);
        let low_h = ((height as f32 * scale).round() as u32).max(2);

        let left_low = imageops::resize(&pair.left, low_w, low_h, FilterType::CatmullRom);
        let right_low = imageops::resize(&pair.right, low_w, low_h, FilterType::CatmullRom);

        let left = to_normalised(&left_low);
        let right = to_normalised(&right_low);

        // Disparity bounds in downscaled pixel units
        let d_min = self.params.min_disparity * scale;
        let d_max = self.params.max_disparity * scale;
        let alpha = self.params.smoothness.max(1e-6);

        let lw = low_w as usize;
        let lh = low_h as usize;

        let init = 0.0f32.max(d_min).min(d_max);
        let mut field = GrayFloatImage::filled(lw, lh, init);
        let mut next = field.clone();

        for _ in 0..self.params.iterations {
            for y in 0..lh {
                for x in 0..lw {
                    let ubar = neighbour_mean(&field, x, y);

                    // Linearised brightness constancy at the smoothed estimate
                    let warped = x as f32 - ubar;
                    let it = sample_row(&right, warped, y) - left.get(x, y);
                    let ix =
                        (sample_row(&right, warped + 1.0, y) - sample_row(&right, warped - 1.0, y))
                            * 0.5;

                    let val = ubar + ix * it / (ix * ix + alpha);
                    next.put(x, y, val.max(d_min).min(d_max));
                }
            }

            std::mem::swap(&mut field, &mut next);
        }

        // Quantise the solved field over the disparity range for filtering and upsampling
        let low_range = d_max - d_min;
        let mut quantised = GrayImage::new(low_w, low_h);
        for y in 0..lh {
            for x in 0..lw {
                let q = ((field.get(x, y) - d_min) / low_range * 255.0)
                    .round()
                    .max(0.0)
                    .min(255.0);
                quantised.put_pixel(x as u32, y as u32, Luma([q as u8]));
            }
        }

        if self.params.median_filter {
            quantised = median_filter(&quantised, 1, 1);
        }

        let full = imageops::resize(&quantised, width as u32, height as u32, FilterType::CatmullRom);

        // Dequantise into full-resolution disparity units
        let mut map = DisparityMap::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let q = full.get_pixel(x as u32, y as u32)[0] as f32;
                map.put(
                    x,
                    y,
                    self.params.min_disparity + q / 255.0 * range,
                );
            }
        }
        map.update_range();

        Ok(map)
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn to_normalised(img: &GrayImage) -> GrayFloatImage {
    let mut out = GrayFloatImage::new(img.width() as usize, img.height() as usize);
    for y in 0..img.height() {
        for x in 0..img.width() {
            out.put(x as usize, y as usize, img.get_pixel(x, y)[0] as f32 / 255.0);
        }
    }
    out
}

/// Linear sample along a row, clamped to the image.
fn sample_row(img: &GrayFloatImage, x: f32, y: usize) -> f32 {
    let x = x.max(0.0).min((img.width() - 1) as f32);
    let x0 = x.floor() as usize;
    let x1 = (x0 + 1).min(img.width() - 1);
    let w = x - x0 as f32;

    img.get(x0, y) * (1.0 - w) + img.get(x1, y) * w
}

/// Mean of the 4-neighbourhood, edges clamped.
fn neighbour_mean(img: &GrayFloatImage, x: usize, y: usize) -> f32 {
    let xm = x.saturating_sub(1);
    let xp = (x + 1).min(img.width() - 1);
    let ym = y.saturating_sub(1);
    let yp = (y + 1).min(img.height() - 1);

    (img.get(xm, y) + img.get(xp, y) + img.get(x, ym) + img.get(x, yp)) * 0.25
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn test_params() -> Params {
        Params {
            scale: 0.25,
            iterations: 60,
            min_disparity: -50.0,
            max_disparity: 50.0,
            smoothness: 0.15,
            median_filter: true,
        }
    }

    /// Smooth horizontal sinusoid texture.
    fn sinusoid(width: u32, height: u32) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let v = 127.5 + 100.0 * (x as f32 * std::f32::consts::PI * 2.0 / 32.0).sin();
                img.put_pixel(x, y, Luma([v.round() as u8]));
            }
        }
        img
    }

    #[test]
    fn identical_pair_settles_near_zero() {
        let left = sinusoid(128, 64);
        let pair = RectifiedPair {
            left: left.clone(),
            right: left,
        };
        let mut var = Variational::new(test_params());

        let map = var.compute(&pair).unwrap();

        assert_eq!(map.width(), 128);
        assert_eq!(map.height(), 64);
        for y in 8..56usize {
            for x in 8..120usize {
                assert!(map.is_valid(x, y));
                let d = map.get(x, y);
                assert!(d.abs() <= 1.0, "pixel ({}, {}): disparity {}", x, y, d);
            }
        }
    }

    #[test]
    fn shifted_pair_pulls_towards_the_shift() {
        let shift = 4u32;
        let left = sinusoid(128, 64);
        let mut right = GrayImage::new(128, 64);
        for y in 0..64 {
            for x in 0..128u32 {
                right.put_pixel(x, y, *left.get_pixel((x + shift) % 128, y));
            }
        }
        let pair = RectifiedPair { left, right };
        let mut var = Variational::new(test_params());

        let map = var.compute(&pair).unwrap();

        let mut sum = 0.0f64;
        let mut n = 0usize;
        for y in 16..48usize {
            for x in 16..112usize {
                sum += map.get(x, y) as f64;
                n += 1;
            }
        }
        let mean = sum / n as f64;

        assert!(
            mean > 1.0 && mean < 8.0,
            "mean disparity {} not near shift {}",
            mean,
            shift
        );
    }

    #[test]
    fn output_is_dense_and_in_range() {
        let left = sinusoid(64, 32);
        let pair = RectifiedPair {
            left: left.clone(),
            right: left,
        };
        let mut var = Variational::new(test_params());

        let map = var.compute(&pair).unwrap();
        let luma = map.to_luma_normalised();

        for y in 0..32usize {
            for x in 0..64usize {
                assert!(map.is_valid(x, y));
            }
        }
        assert!(luma.pixels().all(|p| p[0] <= 255));
    }

    #[test]
    fn mismatched_pair_dimensions_are_rejected() {
        let pair = RectifiedPair {
            left: GrayImage::new(64, 32),
            right: GrayImage::new(64, 16),
        };
        let mut var = Variational::new(test_params());

        assert!(matches!(
            var.compute(&pair),
            Err(Error::DimensionMismatch(..))
        ));
    }
}
