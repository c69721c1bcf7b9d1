//! Target pose from four image corners.

use nalgebra::{Point2, Point3, Rotation3, Vector3};
use peariscope_core::{CalibrationProfile, PlanarPnp, RigidTransform};
use serde::{Deserialize, Serialize};

/// Physical corner positions of the target in meters, ordered top-left,
/// top-right, bottom-left, bottom-right.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub corners: [Point3<f64>; 4],
}

impl TargetGeometry {
    /// Outline of the 2020 power port: the top edge is 39.25 in wide, the
    /// bottom edge half that, 17 in below.
    pub fn power_port() -> Self {
        Self {
            corners: [
                Point3::new(-0.498475, 0.0, 0.0),
                Point3::new(0.498475, 0.0, 0.0),
                Point3::new(-0.2492375, -0.4318, 0.0),
                Point3::new(0.2492375, -0.4318, 0.0),
            ],
        }
    }
}

impl Default for TargetGeometry {
    fn default() -> Self {
        Self::power_port()
    }
}

/// Pose of the target relative to the camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    /// Target origin in camera coordinates, meters.
    pub translation: Vector3<f64>,
    pub rotation: Rotation3<f64>,
    /// `sqrt(x² + z²)` of the translation.
    pub distance: f64,
    /// `atan2(x, y)` of the translation, radians.
    pub bearing: f64,
    /// `atan2(p.x, p.z)` of the camera position in target space, radians.
    pub target_bearing: f64,
}

impl TargetPose {
    pub fn from_transform(tf: &RigidTransform) -> Self {
        let t = tf.translation;
        let cam = tf.camera_center();
        Self {
            translation: t,
            rotation: tf.rotation,
            distance: (t.x * t.x + t.z * t.z).sqrt(),
            bearing: t.x.atan2(t.y),
            target_bearing: cam.x.atan2(cam.z),
        }
    }
}

/// Pose recovery strategy.
pub trait PoseSolver {
    /// `corners` must follow the target's corner order. Degenerate input
    /// yields `None`, never a panic.
    fn solve(
        &self,
        corners: &[Point2<f64>],
        target: &TargetGeometry,
        calibration: &CalibrationProfile,
    ) -> Option<TargetPose>;
}

/// Homography-initialized PnP refined by Levenberg–Marquardt.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanarPnpSolver {
    pub pnp: PlanarPnp,
}

impl PoseSolver for PlanarPnpSolver {
    fn solve(
        &self,
        corners: &[Point2<f64>],
        target: &TargetGeometry,
        calibration: &CalibrationProfile,
    ) -> Option<TargetPose> {
        if corners.len() != target.corners.len() {
            return None;
        }
        let tf = self.pnp.solve(&target.corners, corners, calibration)?;
        Some(TargetPose::from_transform(&tf))
    }
}

/// Order four image corners top-left, top-right, bottom-left, bottom-right.
///
/// Sort by y, then each pair by x. Anything but four points is returned
/// unchanged.
pub fn order_corners(corners: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts = corners.to_vec();
    if pts.len() != 4 {
        return pts;
    }
    let by = |a: &Point2<f64>, b: &Point2<f64>, f: fn(&Point2<f64>) -> f64| {
        f(a).partial_cmp(&f(b)).unwrap_or(std::cmp::Ordering::Equal)
    };
    pts.sort_by(|a, b| by(a, b, |p| p.y));
    pts[..2].sort_by(|a, b| by(a, b, |p| p.x));
    pts[2..].sort_by(|a, b| by(a, b, |p| p.x));
    pts
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CalibrationProfile {
        CalibrationProfile::from_intrinsics(700.0, 700.0, 320.0, 240.0, vec![])
            .expect("valid")
    }

    #[test]
    fn orders_corners_by_rows() {
        let shuffled = [
            Point2::new(250.0, 260.0),
            Point2::new(100.0, 200.0),
            Point2::new(150.0, 262.0),
            Point2::new(300.0, 199.0),
        ];
        let ordered = order_corners(&shuffled);
        assert_eq!(
            ordered,
            vec![
                Point2::new(100.0, 200.0),
                Point2::new(300.0, 199.0),
                Point2::new(150.0, 262.0),
                Point2::new(250.0, 260.0),
            ]
        );
    }

    #[test]
    fn derived_angles_follow_translation() {
        let tf = RigidTransform::from_rvec_tvec(Vector3::zeros(), Vector3::new(1.0, 0.5, 3.0));
        let pose = TargetPose::from_transform(&tf);
        assert_relative_eq!(pose.distance, 10.0_f64.sqrt());
        assert_relative_eq!(pose.bearing, 1.0_f64.atan2(0.5));
        // Camera sits at -t in target space.
        assert_relative_eq!(pose.target_bearing, (-1.0_f64).atan2(-3.0));
    }

    #[test]
    fn solves_power_port_seen_head_on() {
        let cam = camera();
        let target = TargetGeometry::power_port();
        // The camera looks along +z; the target's "up" is -y in camera space.
        let flip = Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
        let truth = RigidTransform::new(flip, Vector3::new(0.3, -0.2, 4.0));
        let image = cam.project_points(&target.corners, &truth).expect("visible");
        assert!(image[0].y < image[2].y, "top edge above bottom edge");

        let pose = PlanarPnpSolver::default()
            .solve(&order_corners(&image), &target, &cam)
            .expect("pose");
        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-6);
        assert_relative_eq!(pose.distance, (0.09_f64 + 16.0).sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn three_corners_give_no_pose() {
        let corners = [
            Point2::new(1.0, 2.0),
            Point2::new(5.0, 2.0),
            Point2::new(3.0, 6.0),
        ];
        let pose = PlanarPnpSolver::default().solve(
            &corners,
            &TargetGeometry::power_port(),
            &camera(),
        );
        assert!(pose.is_none());
    }

    #[test]
    fn collinear_corners_give_no_pose() {
        let corners: Vec<Point2<f64>> = (0..4).map(|i| Point2::new(10.0 * i as f64, 50.0)).collect();
        let pose =
            PlanarPnpSolver::default().solve(&corners, &TargetGeometry::power_port(), &camera());
        assert!(pose.is_none());
    }
}
