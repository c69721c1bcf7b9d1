//! Checkerboard camera calibration.
//!
//! Inner corners come from the `chess-corners` ChESS detector ([`find_corners`]),
//! assembled into an ordered grid ([`assemble_grid`]) and refined to
//! sub-pixel accuracy. Accepted views become [`CalibrationSample`]s and a
//! [`CameraSolver`] turns them into a [`CalibrationProfile`] by joint
//! Levenberg–Marquardt over intrinsics, distortion and per-view poses.
//!
//! [`CalibrationSession`] drives the operator-in-the-loop workflow:
//! collect, compute, save.
//!
//! [`CalibrationProfile`]: peariscope_core::CalibrationProfile

mod corners;
mod detect;
mod error;
mod grid;
mod init;
mod optimize;
mod sample;
mod session;
mod subpix;
mod synthetic;

pub use corners::{find_corners, gray_image, CornerCandidate, CornerParams};
pub use detect::CheckerboardDetector;
pub use error::CalibrationError;
pub use grid::{assemble_grid, BoardSpec, GridParams, PatternSize};
pub use init::initial_intrinsics;
pub use optimize::{CalibrationFlags, CalibrationResult, CameraSolver, LmCalibrator};
pub use sample::{reprojection_stats, CalibrationSample, ReprojectionStats};
pub use session::{
    AcceptAll, CalibrationSession, FrameOutcome, Observation, Operator, OperatorEvent,
    ScriptedOperator, SessionConfig, SessionState,
};
pub use subpix::{refine_corners, SubPixParams};
pub use synthetic::{gray_to_color, render_checkerboard};
