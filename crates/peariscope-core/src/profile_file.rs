//! Calibration profile persistence.
//!
//! Profiles are stored as JSON in the OpenCV FileStorage matrix layout so
//! files written here can be read by `cv::FileStorage` and vice versa:
//!
//! ```json
//! {
//!   "camera_matrix": {"type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d", "data": [..]},
//!   "distortion_coefficients": {"type_id": "opencv-matrix", "rows": 1, "cols": 5, "dt": "d", "data": [..]}
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::{CalibrationProfile, CameraError};

const MATRIX_TYPE_ID: &str = "opencv-matrix";

#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("failed to access calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed calibration file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid calibration data in {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMatrix {
    type_id: String,
    rows: usize,
    cols: usize,
    dt: String,
    data: Vec<f64>,
}

impl StoredMatrix {
    fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        Self {
            type_id: MATRIX_TYPE_ID.to_string(),
            rows,
            cols,
            dt: "d".to_string(),
            data,
        }
    }

    fn check(&self, name: &str) -> Result<(), String> {
        if self.type_id != MATRIX_TYPE_ID {
            return Err(format!("{name}: unexpected type_id {:?}", self.type_id));
        }
        if self.rows * self.cols != self.data.len() {
            return Err(format!(
                "{name}: {}x{} matrix with {} values",
                self.rows,
                self.cols,
                self.data.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProfile {
    camera_matrix: StoredMatrix,
    distortion_coefficients: StoredMatrix,
}

impl StoredProfile {
    fn from_profile(profile: &CalibrationProfile) -> Self {
        let k = profile.camera_matrix();
        // Row-major, as OpenCV writes it.
        let data = (0..3)
            .flat_map(|r| (0..3).map(move |c| k[(r, c)]))
            .collect();
        let dist = profile.distortion().to_vec();
        Self {
            camera_matrix: StoredMatrix::new(3, 3, data),
            distortion_coefficients: StoredMatrix::new(1, dist.len(), dist),
        }
    }

    fn into_profile(self) -> Result<CalibrationProfile, String> {
        self.camera_matrix.check("camera_matrix")?;
        self.distortion_coefficients
            .check("distortion_coefficients")?;
        if self.camera_matrix.rows != 3 || self.camera_matrix.cols != 3 {
            return Err(format!(
                "camera_matrix must be 3x3, got {}x{}",
                self.camera_matrix.rows, self.camera_matrix.cols
            ));
        }
        let dist = &self.distortion_coefficients;
        if dist.rows != 1 && dist.cols != 1 {
            return Err(format!(
                "distortion_coefficients must be a vector, got {}x{}",
                dist.rows, dist.cols
            ));
        }
        let k = Matrix3::from_row_slice(&self.camera_matrix.data);
        CalibrationProfile::new(k, self.distortion_coefficients.data)
            .map_err(|e: CameraError| e.to_string())
    }
}

impl CalibrationProfile {
    /// Read a profile written by [`CalibrationProfile::save`] or OpenCV.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stored: StoredProfile =
            serde_json::from_str(&raw).map_err(|source| ProfileError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        stored.into_profile().map_err(|reason| ProfileError::Format {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Write the profile as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProfileError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&StoredProfile::from_profile(self)).map_err(
            |source| ProfileError::Json {
                path: path.to_path_buf(),
                source,
            },
        )?;
        fs::write(path, json).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
