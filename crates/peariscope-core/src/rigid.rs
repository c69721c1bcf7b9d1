use nalgebra::{Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rotation + translation mapping object-frame points into the camera frame:
/// `p_cam = R * p_obj + t`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// Build from a Rodrigues rotation vector and a translation.
    pub fn from_rvec_tvec(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Self::new(Rotation3::new(rvec), tvec)
    }

    /// Rodrigues rotation vector (axis * angle).
    pub fn rvec(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    #[inline]
    pub fn transform_vector(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.transform_vector(&p.coords))
    }

    pub fn inverse(&self) -> Self {
        let r_inv = self.rotation.inverse();
        Self::new(r_inv, -(r_inv * self.translation))
    }

    /// Camera origin expressed in the object frame, `Rᵀ(−t)`.
    pub fn camera_center(&self) -> Vector3<f64> {
        self.rotation.inverse() * (-self.translation)
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.rotation * other.rotation,
            self.rotation * other.translation + self.translation,
        )
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}
