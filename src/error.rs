//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.
//!
//! Per-pixel recovery (out of bounds remap lookups, ambiguous matches) never surfaces here,
//! those are resolved locally with sentinel values. The enum covers frame-level and
//! configuration-level failures only.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use crate::frame::Camera;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the stereo crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// One or both camera images are missing from the frame. The frame is dropped, not the
    /// process.
    #[error("One or both camera images are missing from the frame")]
    InvalidFrame,

    /// The calibration grid for a camera could not be obtained or is unusable. Fatal for the
    /// pipeline until calibration becomes available; nothing is cached in this state.
    #[error("Calibration for the {0} camera is unavailable: {1}")]
    CalibrationUnavailable(Camera, String),

    /// A calibration buffer does not match its declared grid dimensions.
    #[error(
        "Calibration grid buffer of {len} floats does not match declared {width}x{height} layout"
    )]
    MalformedCalibration {
        width: usize,
        height: usize,
        len: usize,
    },

    /// A raw image buffer does not match its declared dimensions.
    #[error("Image buffer of {len} bytes does not match declared {width}x{height} size")]
    MalformedImage {
        width: usize,
        height: usize,
        len: usize,
    },

    /// The two images of a stereo pair have different dimensions.
    #[error("Stereo pair dimensions differ: left {0}x{1}, right {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),

    /// Failure reading a pipeline configuration file.
    #[error("Failed to read the pipeline configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failure parsing a pipeline configuration file.
    #[error("Failed to parse the pipeline configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Error reported by the external frame source.
    #[error("Frame source error: {0}")]
    Source(String),
}
