//! Core types for the peariscope vision pipeline.
//!
//! Image buffers, the pinhole + distortion camera model and its profile file,
//! planar homographies, a dense Levenberg–Marquardt solver, planar PnP and
//! the frame source/sink traits shared by the vision and calibration crates.
//! Nothing here depends on a concrete camera or image library.

mod camera;
mod homography;
mod image;
mod lm;
mod logger;
mod pnp;
mod profile_file;
mod rigid;
mod source;

pub use camera::{undistort_gray, CalibrationProfile, CameraError, MAX_DISTORTION_COEFFS};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    rgb_to_gray, sample_bilinear, sample_bilinear_u8, BinaryMask, ColorImage, ColorImageView,
    GrayImage, GrayImageView, ImageSize,
};
pub use lm::{numeric_jacobian, LeastSquaresProblem, LevenbergMarquardt, LmReport};
pub use pnp::{pose_from_homography, reprojection_rms, PlanarPnp};
pub use profile_file::ProfileError;
pub use rigid::RigidTransform;
pub use source::{AcquisitionError, FrameSink, FrameSource, NullSink, ScriptedSource};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;
pub use logger::{init_logging, parse_level, LogSpec, LOG_ENV};
