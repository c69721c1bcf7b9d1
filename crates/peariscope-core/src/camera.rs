//! Pinhole camera with Brown–Conrady distortion.
//!
//! Coefficients follow the OpenCV ordering `k1, k2, p1, p2[, k3[, k4, k5, k6]]`.
//! Missing trailing coefficients are treated as zero; `k4..k6` enable the
//! rational radial model.

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{sample_bilinear_u8, GrayImage, GrayImageView, RigidTransform};

/// Maximum number of distortion coefficients understood by the model.
pub const MAX_DISTORTION_COEFFS: usize = 8;

/// Errors raised when constructing a [`CalibrationProfile`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera matrix has non-finite entries")]
    NonFinite,
    #[error("focal lengths must be positive (fx={fx}, fy={fy})")]
    NonPositiveFocal { fx: f64, fy: f64 },
    #[error("camera matrix bottom row must be [0, 0, 1]")]
    BadBottomRow,
    #[error("expected at most {MAX_DISTORTION_COEFFS} distortion coefficients, got {0}")]
    TooManyCoefficients(usize),
}

/// Camera intrinsics and lens distortion produced by calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    camera_matrix: Matrix3<f64>,
    distortion: Vec<f64>,
}

impl CalibrationProfile {
    /// Validate and build a profile.
    pub fn new(camera_matrix: Matrix3<f64>, distortion: Vec<f64>) -> Result<Self, CameraError> {
        if camera_matrix.iter().any(|v| !v.is_finite()) || distortion.iter().any(|v| !v.is_finite())
        {
            return Err(CameraError::NonFinite);
        }
        let (fx, fy) = (camera_matrix[(0, 0)], camera_matrix[(1, 1)]);
        if fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::NonPositiveFocal { fx, fy });
        }
        if camera_matrix[(2, 0)] != 0.0
            || camera_matrix[(2, 1)] != 0.0
            || (camera_matrix[(2, 2)] - 1.0).abs() > 1e-12
        {
            return Err(CameraError::BadBottomRow);
        }
        if distortion.len() > MAX_DISTORTION_COEFFS {
            return Err(CameraError::TooManyCoefficients(distortion.len()));
        }
        Ok(Self {
            camera_matrix,
            distortion,
        })
    }

    /// Convenience constructor from focal lengths and principal point.
    pub fn from_intrinsics(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        distortion: Vec<f64>,
    ) -> Result<Self, CameraError> {
        Self::new(
            Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion,
        )
    }

    pub fn camera_matrix(&self) -> &Matrix3<f64> {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &[f64] {
        &self.distortion
    }

    #[inline]
    pub fn fx(&self) -> f64 {
        self.camera_matrix[(0, 0)]
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.camera_matrix[(1, 1)]
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.camera_matrix[(0, 2)]
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.camera_matrix[(1, 2)]
    }

    #[inline]
    fn skew(&self) -> f64 {
        self.camera_matrix[(0, 1)]
    }

    pub fn has_distortion(&self) -> bool {
        self.distortion.iter().any(|&k| k != 0.0)
    }

    #[inline]
    fn coeff(&self, i: usize) -> f64 {
        self.distortion.get(i).copied().unwrap_or(0.0)
    }

    /// Apply lens distortion to a normalized image-plane point.
    pub fn distort_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        Point2::new(xd, yd)
    }

    /// Invert [`Self::distort_normalized`] by fixed-point iteration.
    pub fn undistort_normalized(&self, pd: Point2<f64>) -> Point2<f64> {
        if !self.has_distortion() {
            return pd;
        }
        let (k1, k2, p1, p2, k3) = (
            self.coeff(0),
            self.coeff(1),
            self.coeff(2),
            self.coeff(3),
            self.coeff(4),
        );
        let (k4, k5, k6) = (self.coeff(5), self.coeff(6), self.coeff(7));
        let (mut x, mut y) = (pd.x, pd.y);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist =
                (1.0 + k4 * r2 + k5 * r4 + k6 * r6) / (1.0 + k1 * r2 + k2 * r4 + k3 * r6);
            if !icdist.is_finite() || icdist <= 0.0 {
                return pd;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (pd.x - dx) * icdist;
            y = (pd.y - dy) * icdist;
        }
        Point2::new(x, y)
    }

    /// Normalized (distorted) coordinates to pixels.
    #[inline]
    pub fn normalized_to_pixel(&self, pd: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx() * pd.x + self.skew() * pd.y + self.cx(),
            self.fy() * pd.y + self.cy(),
        )
    }

    /// Pixels to normalized (still distorted) coordinates.
    #[inline]
    pub fn pixel_to_normalized(&self, px: Point2<f64>) -> Point2<f64> {
        let y = (px.y - self.cy()) / self.fy();
        let x = (px.x - self.cx() - self.skew() * y) / self.fx();
        Point2::new(x, y)
    }

    /// Pixel to undistorted normalized coordinates.
    pub fn undistort_pixel(&self, px: Point2<f64>) -> Point2<f64> {
        self.undistort_normalized(self.pixel_to_normalized(px))
    }

    /// Project a camera-frame point. `None` when the point is not in front of the camera.
    pub fn project_camera_point(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        let n = Point2::new(p.x / p.z, p.y / p.z);
        Some(self.normalized_to_pixel(self.distort_normalized(n)))
    }

    /// Project object-frame points through a pose.
    pub fn project_points(
        &self,
        object: &[Point3<f64>],
        pose: &RigidTransform,
    ) -> Option<Vec<Point2<f64>>> {
        object
            .iter()
            .map(|p| self.project_camera_point(&pose.transform_vector(&p.coords)))
            .collect()
    }

    /// Same camera without lens distortion.
    pub fn without_distortion(&self) -> Self {
        Self {
            camera_matrix: self.camera_matrix,
            distortion: Vec::new(),
        }
    }
}

const UNDISTORT_ITERATIONS: usize = 20;

/// Resample an image so that straight lines in the world are straight again.
///
/// The output uses the same camera matrix as the input; each output pixel is
/// pushed through the distortion model and sampled bilinearly.
pub fn undistort_gray(src: &GrayImageView<'_>, profile: &CalibrationProfile) -> GrayImage {
    let mut out = GrayImage::new(src.width, src.height);
    for y in 0..src.height {
        for x in 0..src.width {
            let n = profile.pixel_to_normalized(Point2::new(x as f64, y as f64));
            let d = profile.normalized_to_pixel(profile.distort_normalized(n));
            out.data[y * src.width + x] = sample_bilinear_u8(src, d.x as f32, d.y as f32);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn profile() -> CalibrationProfile {
        CalibrationProfile::from_intrinsics(
            600.0,
            610.0,
            320.0,
            240.0,
            vec![-0.2, 0.05, 0.001, -0.002, 0.01],
        )
        .expect("valid profile")
    }

    #[test]
    fn rejects_invalid_focal_lengths() {
        let err = CalibrationProfile::from_intrinsics(0.0, 500.0, 1.0, 1.0, vec![]).unwrap_err();
        assert!(matches!(err, CameraError::NonPositiveFocal { .. }));
        let err = CalibrationProfile::from_intrinsics(f64::NAN, 500.0, 1.0, 1.0, vec![]).unwrap_err();
        assert_eq!(err, CameraError::NonFinite);
    }

    #[test]
    fn rejects_bad_bottom_row() {
        let k = Matrix3::new(500.0, 0.0, 1.0, 0.0, 500.0, 1.0, 0.1, 0.0, 1.0);
        assert_eq!(
            CalibrationProfile::new(k, vec![]).unwrap_err(),
            CameraError::BadBottomRow
        );
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = profile();
        for (x, y) in [(0.0, 0.0), (0.2, -0.1), (-0.3, 0.25), (0.4, 0.3)] {
            let p = Point2::new(x, y);
            let back = cam.undistort_normalized(cam.distort_normalized(p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-8);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn pixel_and_normalized_round_trip() {
        let cam = profile();
        let px = Point2::new(100.5, 400.25);
        let back = cam.normalized_to_pixel(cam.pixel_to_normalized(px));
        assert_relative_eq!(back.x, px.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, px.y, epsilon = 1e-9);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = profile();
        assert!(cam.project_camera_point(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        let center = cam
            .project_camera_point(&Vector3::new(0.0, 0.0, 2.0))
            .expect("in front");
        assert_relative_eq!(center.x, 320.0);
        assert_relative_eq!(center.y, 240.0);
    }

    #[test]
    fn undistort_without_distortion_is_identity() {
        let cam = profile().without_distortion();
        let img = GrayImage {
            width: 4,
            height: 3,
            data: (0..12).map(|v| v as u8 * 10).collect(),
        };
        assert_eq!(undistort_gray(&img.view(), &cam), img);
    }
}
