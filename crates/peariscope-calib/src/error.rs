use peariscope_core::{AcquisitionError, ProfileError};

use crate::session::SessionState;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("not enough samples to calibrate: have {have}, need {need}")]
    DataInsufficient { have: usize, need: usize },
    #[error("operation `{operation}` is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("invalid calibration setup: {0}")]
    Configuration(String),
    #[error("calibration solver failed: {0}")]
    SolverFailed(String),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}
