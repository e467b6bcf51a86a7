//! # Stereo Rectification and Disparity
//!
//! This crate rectifies fisheye-distorted stereo camera images using per-pixel calibration
//! data and computes dense disparity maps from the rectified pairs.
//!
//! The core pieces are:
//!
//! - `calibration`: builds a dense per-pixel remap field from the coarse distortion grid
//!   reported by the camera.
//! - `rectify`: applies a remap field to a raw image, producing a corrected image at the
//!   configured destination resolution.
//! - `block_matching` and `variational`: two disparity engines consuming a rectified pair,
//!   selected by the pipeline configuration.
//! - `pipeline`: the per-frame orchestration, owning the cached remap fields for each camera.
//!
//! Frame acquisition and display are external collaborators, reached through the
//! `pipeline::FrameSource` trait.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod disparity;
mod error;
pub mod block_matching;
pub mod calibration;
pub mod frame;
pub mod pipeline;
pub mod rectify;
pub mod variational;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub mod prelude {
    pub use crate::calibration::{CalibrationGrid, RemapField};
    pub use crate::disparity::{DisparityAlgorithm, DisparityMap, INVALID_DISPARITY};
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Camera, GrayFloatImage, RawImage, RectifiedPair, StereoFrame};
    pub use crate::pipeline::{
        DisparityMode, FrameSource, PipelineConfig, PipelineOutput, StereoPipeline,
    };
    pub use crate::rectify::{rectify, rectify_direct};
}
