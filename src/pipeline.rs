//! # Frame pipeline
//!
//! Per-frame orchestration: rectify left and right, then compute disparity, with the
//! per-camera remap fields cached across frames. Processing is synchronous, one stereo frame
//! at a time on the calling thread; how frames arrive (event callback, polling loop) is the
//! frame source's business.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use image::GrayImage;
use serde::Deserialize;

use crate::block_matching::{self, BlockMatching};
use crate::calibration::{CalibrationGrid, RemapField};
use crate::disparity::{DisparityAlgorithm, DisparityMap};
use crate::error::*;
use crate::frame::{Camera, RectifiedPair, StereoFrame};
use crate::rectify::rectify;
use crate::variational::{self, Variational};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Default rectified output width.
pub const DEST_WIDTH: usize = 640;

/// Default rectified output height.
pub const DEST_HEIGHT: usize = 240;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Capability set the pipeline needs from a camera frame source.
///
/// The pipeline never retains references to a source's buffers past a single `process` call,
/// and never cares about the delivery mechanism behind the trait.
pub trait FrameSource {
    /// Fetch the distortion calibration grid for one camera.
    ///
    /// Queried lazily, once per camera, when the first frame is processed (and again after a
    /// [`StereoPipeline::reset`]).
    fn calibration(&self, camera: Camera) -> Result<CalibrationGrid>;

    /// Deliver the next stereo frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<StereoFrame<'_>>>;

    /// Hint that frames should keep flowing while the host application is in the background.
    /// Sources without such a policy can ignore it.
    fn request_background_frames(&mut self, _enabled: bool) {}
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Disparity engine selection. Exactly one algorithm is active per pipeline; the parameter
/// sets are disjoint.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum DisparityMode {
    BlockMatching(block_matching::Params),
    Variational(variational::Params),
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Pipeline configuration.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rectified output width.
    pub dest_width: usize,
    /// Rectified output height.
    pub dest_height: usize,
    /// Forwarded to the frame source as a background-frames policy hint.
    pub background_frames: bool,
    /// Which disparity engine to run.
    pub mode: DisparityMode,
}

/// The per-frame product handed to the display/consumer.
pub struct PipelineOutput {
    /// Rectified left and right images at the configured destination resolution.
    pub rectified: RectifiedPair,
    /// Raw disparity map.
    pub disparity: DisparityMap,
    /// Disparity rescaled onto the full 8-bit range, invalid pixels at 0.
    pub disparity_image: GrayImage,
}

/// The frame pipeline.
///
/// Owns the cached remap fields: `None` until calibration has been fetched and both fields
/// built, reset together on [`reset`](StereoPipeline::reset).
pub struct StereoPipeline {
    config: PipelineConfig,
    algorithm: Box<dyn DisparityAlgorithm>,
    left_map: Option<RemapField>,
    right_map: Option<RemapField>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            dest_width: DEST_WIDTH,
            dest_height: DEST_HEIGHT,
            background_frames: false,
            mode: DisparityMode::BlockMatching(block_matching::Params::default()),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

impl StereoPipeline {
    /// Create a pipeline with the given configuration. No calibration is fetched yet; the
    /// remap fields are built lazily on first use.
    pub fn new(config: PipelineConfig) -> Self {
        let algorithm: Box<dyn DisparityAlgorithm> = match &config.mode {
            DisparityMode::BlockMatching(params) => {
                Box::new(BlockMatching::new(params.clone()))
            }
            DisparityMode::Variational(params) => Box::new(Variational::new(params.clone())),
        };

        StereoPipeline {
            config,
            algorithm,
            left_map: None,
            right_map: None,
        }
    }

    /// Create a pipeline from a TOML configuration file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(PipelineConfig::from_file(path)?))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// True once both remap fields are built and cached.
    pub fn maps_ready(&self) -> bool {
        self.left_map.is_some() && self.right_map.is_some()
    }

    /// Invalidate the cached remap fields, forcing recomputation from fresh calibration on
    /// the next frame. Call on external reset events such as a camera reconnect.
    pub fn reset(&mut self) {
        log::info!("remap cache invalidated");
        self.left_map = None;
        self.right_map = None;
    }

    /// Build and cache the remap fields if they are not already available.
    ///
    /// Both calibration grids are fetched and both fields built before either is stored, so
    /// a failure on one camera leaves no partial cache behind.
    pub fn ensure_maps<S: FrameSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        if self.maps_ready() {
            return Ok(());
        }

        let left_grid = source
            .calibration(Camera::Left)
            .map_err(|e| Error::CalibrationUnavailable(Camera::Left, e.to_string()))?;
        let right_grid = source
            .calibration(Camera::Right)
            .map_err(|e| Error::CalibrationUnavailable(Camera::Right, e.to_string()))?;

        let left_map =
            RemapField::from_grid(&left_grid, self.config.dest_width, self.config.dest_height);
        let right_map =
            RemapField::from_grid(&right_grid, self.config.dest_width, self.config.dest_height);

        log::info!(
            "built remap fields for {}x{} destination",
            self.config.dest_width,
            self.config.dest_height
        );

        self.left_map = Some(left_map);
        self.right_map = Some(right_map);

        Ok(())
    }

    /// Process one stereo frame: rectify both images and compute disparity.
    ///
    /// Requires the remap fields to have been built (see [`ensure_maps`](Self::ensure_maps)).
    /// A frame missing either image fails with [`Error::InvalidFrame`] and should be dropped
    /// by the caller; nothing about the pipeline state changes in that case.
    pub fn process(&mut self, frame: &StereoFrame) -> Result<PipelineOutput> {
        let left_map = self.left_map.as_ref().ok_or_else(|| {
            Error::CalibrationUnavailable(Camera::Left, "remap field not built".into())
        })?;
        let right_map = self.right_map.as_ref().ok_or_else(|| {
            Error::CalibrationUnavailable(Camera::Right, "remap field not built".into())
        })?;

        let (left_raw, right_raw) = match (&frame.left, &frame.right) {
            (Some(left), Some(right)) => (left, right),
            _ => return Err(Error::InvalidFrame),
        };

        let rectified = RectifiedPair {
            left: rectify(left_raw, left_map),
            right: rectify(right_raw, right_map),
        };

        let disparity = self.algorithm.compute(&rectified)?;
        let disparity_image = disparity.to_luma_normalised();

        Ok(PipelineOutput {
            rectified,
            disparity,
            disparity_image,
        })
    }

    /// Synchronous frame loop: pull frames from the source until it is exhausted, handing
    /// each output to the consumer.
    ///
    /// Invalid frames are dropped with a warning; calibration failures abort the loop since
    /// no further frame can be processed without a remap field.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_output: F) -> Result<()>
    where
        S: FrameSource,
        F: FnMut(&PipelineOutput),
    {
        source.request_background_frames(self.config.background_frames);

        loop {
            self.ensure_maps(source)?;

            let frame = match source.next_frame()? {
                Some(frame) => frame,
                None => return Ok(()),
            };

            match self.process(&frame) {
                Ok(output) => on_output(&output),
                Err(Error::InvalidFrame) => {
                    log::warn!("dropping frame: missing camera image");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
