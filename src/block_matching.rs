//! # Block matching disparity computation
//!
//! Correlation-based stereo matching over a rectified pair: a pre-filter caps horizontal
//! gradients to suppress low-texture noise, a SAD window is swept across the configured
//! disparity search range, and ambiguous or speckled matches are invalidated rather than
//! guessed.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::gradients::horizontal_sobel;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Deserialize;

use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;
use crate::frame::{GrayFloatImage, RectifiedPair};

#[cfg(feature = "statistics")]
use plotters::prelude::*;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

pub struct BlockMatching {
    params: Params,
    half_window: isize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Lowest disparity searched. May be negative for cross-verged camera pairs.
    pub min_disparity: i32,
    /// Number of disparity levels searched, starting at `min_disparity`.
    pub num_disparities: usize,
    /// Side length of the square correlation window, odd.
    pub block_size: usize,
    /// Clamp applied to the horizontal gradient in the pre-filter.
    pub pre_filter_cap: u8,
    /// Minimum window texture (sum of absolute pre-filtered response) required to attempt a
    /// match.
    pub texture_threshold: f32,
    /// Margin in percent by which the best cost must beat every non-adjacent candidate.
    pub uniqueness_ratio: f32,
    /// Connected disparity regions smaller than this are invalidated as speckle noise.
    pub speckle_window_size: usize,
    /// Disparity value range within which pixels count as the same speckle region.
    pub speckle_range: f32,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Params {
            min_disparity: -50,
            num_disparities: 80,
            block_size: 5,
            pre_filter_cap: 25,
            texture_threshold: 10.0,
            uniqueness_ratio: 15.0,
            speckle_window_size: 150,
            speckle_range: 20.0,
        }
    }
}

impl BlockMatching {
    /// Create a new instance of the algorithm with the given parameters.
    pub fn new(params: Params) -> Self {
        let half_window = (params.block_size as isize - 1) / 2;

        Self {
            params,
            half_window,
        }
    }

    /// Normalised-response pre-filter: horizontal Sobel clamped to the cap and offset so the
    /// response is centred on the cap value.
    fn pre_filter(&self, img: &GrayImage) -> GrayFloatImage {
        let cap = self.params.pre_filter_cap as f32;
        let sobel = horizontal_sobel(img);

        let mut out = GrayFloatImage::new(img.width() as usize, img.height() as usize);

        for y in 0..img.height() {
            for x in 0..img.width() {
                let g = sobel.get_pixel(x, y)[0] as f32;
                out.put(x as usize, y as usize, g.max(-cap).min(cap) + cap);
            }
        }

        out
    }

    /// Sum of absolute pre-filtered response over the window, the texture measure gating
    /// correlation.
    fn texture_sum(&self, img: &GrayFloatImage, x: usize, y: usize) -> f32 {
        let cap = self.params.pre_filter_cap as f32;
        let mut acc = 0.0f32;

        for j in -self.half_window..=self.half_window {
            for i in -self.half_window..=self.half_window {
                let xi = (x as isize + i) as usize;
                let yj = (y as isize + j) as usize;
                acc += (img.get(xi, yj) - cap).abs();
            }
        }

        acc
    }

    /// Calculate the correlation criterion for the given position and disparity.
    fn criterion(
        &self,
        left: &GrayFloatImage,
        right: &GrayFloatImage,
        x: usize,
        y: usize,
        d: isize,
    ) -> f32 {
        let mut acc = 0.0f32;

        for j in -self.half_window..=self.half_window {
            for i in -self.half_window..=self.half_window {
                let xi = (x as isize + i) as usize;
                let yj = (y as isize + j) as usize;
                let xr = (x as isize + i - d) as usize;
                acc += (left.get(xi, yj) - right.get(xr, yj)).abs();
            }
        }

        acc
    }

    /// Invalidate connected disparity regions smaller than the speckle window.
    ///
    /// Valid disparities are quantised into `speckle_range`-wide buckets and labelled with
    /// 4-connectivity; components below the size threshold are treated as noise.
    fn filter_speckles(&self, map: &mut DisparityMap) {
        if self.params.speckle_window_size == 0 || self.params.speckle_range <= 0.0 {
            return;
        }

        let width = map.width();
        let height = map.height();
        let min_d = self.params.min_disparity as f32;

        // Bucket image: 0 is background (invalid pixels)
        let mut buckets = GrayImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                if map.is_valid(x, y) {
                    let b = ((map.get(x, y) - min_d) / self.params.speckle_range).floor() as i64;
                    let b = b.max(0).min(253) as u8;
                    buckets.put_pixel(x as u32, y as u32, Luma([b + 1]));
                }
            }
        }

        let labels = connected_components(&buckets, Connectivity::Four, Luma([0u8]));

        let mut sizes: HashMap<u32, usize> = HashMap::new();
        for label in labels.pixels() {
            if label[0] != 0 {
                *sizes.entry(label[0]).or_insert(0) += 1;
            }
        }

        for y in 0..height {
            for x in 0..width {
                let label = labels.get_pixel(x as u32, y as u32)[0];
                if label != 0 && sizes[&label] < self.params.speckle_window_size {
                    map.invalidate(x, y);
                }
            }
        }
    }
}

impl DisparityAlgorithm for BlockMatching {
    /// Compute the disparity map for the given rectified pair.
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

        let mut disp_map = DisparityMap::new(width, height);

        if width < self.params.block_size || height < self.params.block_size {
            return Ok(disp_map);
        }

        // ---- PRE FILTER ----

        let left = self.pre_filter(&pair.left);
        let right = self.pre_filter(&pair.right);

        // ---- STEREO CORRELATION ----

        let half = self.half_window;
        let min_d = self.params.min_disparity as isize;
        let max_d = min_d + self.params.num_disparities as isize;

        for y in half as usize..(height - half as usize) {
            for x in half as usize..(width - half as usize) {
                // Low texture windows cannot produce a trustworthy match
                if self.texture_sum(&left, x, y) < self.params.texture_threshold {
                    continue;
                }

                // Clip the search range so the right-hand window stays on-image
                let d_lo = min_d.max(x as isize + half - (width as isize - 1));
                let d_hi = max_d.min(x as isize - half + 1);
                if d_lo >= d_hi {
                    continue;
                }

                // Vector of criterions over the clipped range
                let mut crits: Vec<f32> = Vec::with_capacity((d_hi - d_lo) as usize);

                for d in d_lo..d_hi {
                    crits.push(self.criterion(&left, &right, x, y, d));
                }

                // Find index of minimum value
                let min_index = crits
                    .iter()
                    .enumerate()
                    .fold(0, |min_idx, (idx, &val)| {
                        if val < crits[min_idx] {
                            idx
                        } else {
                            min_idx
                        }
                    });

                // Uniqueness: reject the pixel if any candidate outside the immediate
                // neighbourhood of the winner comes within the configured margin of it
                let best = crits[min_index];
                let margin = best * (100.0 + self.params.uniqueness_ratio) / 100.0;
                let ambiguous = crits.iter().enumerate().any(|(idx, &c)| {
                    (idx as isize - min_index as isize).abs() > 1 && c <= margin
                });
                if ambiguous {
                    continue;
                }

                // Sub pixel interpolation
                let disp_val: f32;

                // If on the outer edge of the criterion
                if min_index == 0 || min_index == crits.len() - 1 || crits.len() < 3 {
                    disp_val = (d_lo + min_index as isize) as f32;
                }
                // Otherwise
                else {
                    // Get left and right values of the criterion
                    let c_left = crits[min_index - 1];
                    let c_right = crits[min_index + 1];

                    // If left is higher than right
                    let denom = match c_left > c_right {
                        true => 2.0 * (c_left - crits[min_index]),
                        false => 2.0 * (c_right - crits[min_index]),
                    };

                    let offset = if denom > 0.0 {
                        (c_left - c_right) / denom
                    } else {
                        0.0
                    };

                    disp_val = (d_lo + min_index as isize) as f32 + offset;
                }

                // Set disparity value
                disp_map.put(x, y, disp_val);
            }
        }

        // ---- POST FILTER ----

        self.filter_speckles(&mut disp_map);
        disp_map.update_range();

        // ---- PLOTTING ----
        #[cfg(feature = "statistics")]
        {
            let bins = self.params.num_disparities + 1;
            let mut counts = vec![0usize; bins];
            for y in 0..height {
                for x in 0..width {
                    if disp_map.is_valid(x, y) {
                        let bin = (disp_map.get(x, y) - min_d as f32).round() as isize;
                        counts[bin.max(0).min(bins as isize - 1) as usize] += 1;
                    }
                }
            }
            let max_count = counts.iter().cloned().max().unwrap_or(1).max(1);

            let hist = BitMapBackend::new(
                "plots/block_matching/disp_hist.png",
                (800, 600)
            ).into_drawing_area();
            hist.fill(&WHITE).unwrap();

            let mut chart = ChartBuilder::on(&hist)
                .caption("Disparity histogram", ("sans-serif", 20).into_font())
                .margin(5)
                .x_label_area_size(30)
                .y_label_area_size(30)
                .build_ranged(0..bins, 0..max_count)
                .unwrap();

            chart.configure_mesh().draw().unwrap();

            chart
                .draw_series(LineSeries::new(
                    counts.iter().enumerate().map(|(i, &c)| (i, c)),
                    &RED
                )).unwrap()
                .label("Matched pixels")
                .legend(|(x, y)|
                    PathElement::new(vec![(x, y), (x + 20, y)], &RED
                ));

            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw().unwrap();
        }

        Ok(disp_map)
    }
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
            min_disparity: 0,
            num_disparities: 16,
            block_size: 5,
            pre_filter_cap: 31,
            texture_threshold: 10.0,
            uniqueness_ratio: 15.0,
            speckle_window_size: 50,
            speckle_range: 4.0,
        }
    }

    /// Deterministic noise image.
    fn noise_image(width: u32, height: u32) -> GrayImage {
        let mut state = 0xdead_beefu32;
        let mut img = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                img.put_pixel(x, y, Luma([(state >> 24) as u8]));
            }
        }
        img
    }

    /// Right image built by shifting the left image content `shift` pixels to the left,
    /// i.e. a flat plane at constant disparity `shift`.
    fn shifted_pair(width: u32, height: u32, shift: u32) -> RectifiedPair {
        let left = noise_image(width, height);
        let mut right = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let sx = (x + shift) % width;
                right.put_pixel(x, y, *left.get_pixel(sx, y));
            }
        }
        RectifiedPair { left, right }
    }

    #[test]
    fn flat_plane_reports_the_shift() {
        let shift = 6u32;
        let pair = shifted_pair(96, 48, shift);
        let mut bm = BlockMatching::new(test_params());

        let map = bm.compute(&pair).unwrap();

        // Away from the borders and the wrapped seam every pixel must match at the shift
        for y in 10..38usize {
            for x in 10..(96 - shift as usize - 10) {
                assert!(map.is_valid(x, y), "pixel ({}, {}) invalidated", x, y);
                let d = map.get(x, y);
                assert!(
                    (d - shift as f32).abs() <= 1.0,
                    "pixel ({}, {}): disparity {} != {}",
                    x,
                    y,
                    d,
                    shift
                );
            }
        }

        // Normalised output always stays within the 8-bit range
        let luma = map.to_luma_normalised();
        assert!(luma.pixels().all(|p| p[0] <= 255));
    }

    #[test]
    fn identical_pair_reports_zero_disparity() {
        let left = noise_image(64, 32);
        let pair = RectifiedPair {
            left: left.clone(),
            right: left,
        };
        let mut bm = BlockMatching::new(test_params());

        let map = bm.compute(&pair).unwrap();

        for y in 8..24usize {
            for x in 8..56usize {
                assert!(map.is_valid(x, y));
                assert_eq!(map.get(x, y), 0.0, "pixel ({}, {})", x, y);
            }
        }

        // Degenerate observed range: everything lands in the zero-disparity bucket
        let luma = map.to_luma_normalised();
        assert!(luma.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn textureless_pair_is_fully_invalidated() {
        let flat = GrayImage::from_pixel(64, 32, Luma([100]));
        let pair = RectifiedPair {
            left: flat.clone(),
            right: flat,
        };
        let mut bm = BlockMatching::new(test_params());

        let map = bm.compute(&pair).unwrap();

        for y in 0..32usize {
            for x in 0..64usize {
                assert!(!map.is_valid(x, y), "pixel ({}, {}) matched", x, y);
            }
        }
        assert!(map.to_luma_normalised().pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn speckle_filter_drops_small_islands() {
        let bm = BlockMatching::new(test_params());

        let mut map = DisparityMap::new(32, 32);
        // Large coherent region at disparity 6
        for y in 0..32 {
            for x in 0..24 {
                map.put(x, y, 6.0);
            }
        }
        // Small island at a far away disparity
        for y in 2..4 {
            for x in 28..30 {
                map.put(x, y, 15.0);
            }
        }

        bm.filter_speckles(&mut map);

        assert!(map.is_valid(12, 16));
        assert!(!map.is_valid(28, 2));
        assert!(!map.is_valid(29, 3));
    }

    #[test]
    fn mismatched_pair_dimensions_are_rejected() {
        let pair = RectifiedPair {
            left: GrayImage::new(32, 32),
            right: GrayImage::new(16, 32),
        };
        let mut bm = BlockMatching::new(test_params());

        assert!(matches!(
            bm.compute(&pair),
            Err(Error::DimensionMismatch(..))
        ));
    }

    #[test]
    fn negative_minimum_disparity_finds_negative_shifts() {
        // Right image content shifted right: the matching block sits at a negative disparity
        let left = noise_image(96, 32);
        let mut right = GrayImage::new(96, 32);
        for y in 0..32 {
            for x in 0..96u32 {
                let sx = (x + 96 - 4) % 96;
                right.put_pixel(x, y, *left.get_pixel(sx, y));
            }
        }
        let pair = RectifiedPair { left, right };

        let mut params = test_params();
        params.min_disparity = -8;
        // Wide buckets keep the sub-pixel jitter around -4 in a single speckle region
        params.speckle_range = 8.0;
        let mut bm = BlockMatching::new(params);

        let map = bm.compute(&pair).unwrap();

        for y in 10..22usize {
            for x in 10..80usize {
                assert!(map.is_valid(x, y), "pixel ({}, {}) invalidated", x, y);
                let d = map.get(x, y);
                assert!(
                    (d + 4.0).abs() <= 1.0,
                    "pixel ({}, {}): disparity {} != -4",
                    x,
                    y,
                    d
                );
            }
        }
    }
}
