//! Pose of a planar object from 2D–3D correspondences.
//!
//! The object points are fitted with a plane, image points are undistorted,
//! and the plane-to-image homography is decomposed into an initial pose that
//! is refined on pixel reprojection error.

use nalgebra::{DVector, Matrix3, Point2, Point3, Rotation3, SymmetricEigen, Vector3};

use crate::{
    estimate_homography, CalibrationProfile, Homography, LeastSquaresProblem, LevenbergMarquardt,
    RigidTransform,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Relative eigenvalue below which the object points are considered flat.
const PLANARITY_TOL: f64 = 1e-8;
/// Relative eigenvalue below which the object points are considered a line.
const COLLINEARITY_TOL: f64 = 1e-10;

/// Orthonormal frame of the plane through the object points.
struct PlaneFrame {
    origin: Vector3<f64>,
    /// Columns: in-plane axis u, in-plane axis v, normal.
    axes: Matrix3<f64>,
}

impl PlaneFrame {
    fn fit(points: &[Point3<f64>]) -> Option<Self> {
        let n = points.len() as f64;
        let origin = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
        let mut cov = Matrix3::zeros();
        for p in points {
            let d = p.coords - origin;
            cov += d * d.transpose();
        }
        let eig = SymmetricEigen::new(cov);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let (l_max, l_mid, l_min) = (
            eig.eigenvalues[order[0]],
            eig.eigenvalues[order[1]],
            eig.eigenvalues[order[2]],
        );
        if l_max <= 0.0 || l_mid <= COLLINEARITY_TOL * l_max || l_min > PLANARITY_TOL * l_max {
            return None;
        }
        let e1 = eig.eigenvectors.column(order[0]).normalize();
        let e3 = eig.eigenvectors.column(order[2]).normalize();
        let e2 = e3.cross(&e1);
        Some(Self {
            origin,
            axes: Matrix3::from_columns(&[e1, e2, e3]),
        })
    }

    fn to_plane(&self, p: &Point3<f64>) -> Point2<f64> {
        let local = self.axes.transpose() * (p.coords - self.origin);
        Point2::new(local.x, local.y)
    }
}

/// True when the points span less than a line's worth of area.
fn is_collinear_2d(points: &[Point2<f64>]) -> bool {
    let n = points.len() as f64;
    let mean = points.iter().fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = nalgebra::Matrix2::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    let eig = cov.symmetric_eigenvalues();
    let (lo, hi) = (eig.min(), eig.max());
    hi <= 0.0 || lo <= COLLINEARITY_TOL * hi
}

/// Decompose a homography from plane coordinates to normalized image
/// coordinates into the plane-to-camera pose.
pub fn pose_from_homography(h: &Homography) -> Option<RigidTransform> {
    let h1 = h.h.column(0).into_owned();
    let h2 = h.h.column(1).into_owned();
    let h3 = h.h.column(2).into_owned();
    let denom = h1.norm() + h2.norm();
    if denom < 1e-12 || !denom.is_finite() {
        return None;
    }
    let mut lambda = 2.0 / denom;
    if (lambda * h3).z < 0.0 {
        lambda = -lambda;
    }
    let r1 = lambda * h1;
    let r2 = lambda * h2;
    let t = lambda * h3;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    if (u * v_t).determinant() < 0.0 {
        let flipped = -u.column(2).into_owned();
        u.set_column(2, &flipped);
    }
    let r = Rotation3::from_matrix_unchecked(u * v_t);
    Some(RigidTransform::new(r, t))
}

struct ReprojectionProblem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    profile: &'a CalibrationProfile,
}

impl LeastSquaresProblem for ReprojectionProblem<'_> {
    fn residuals(&self, params: &DVector<f64>) -> Option<DVector<f64>> {
        let pose = pose_from_params(params);
        let mut r = DVector::zeros(self.object.len() * 2);
        for (i, (obj, px)) in self.object.iter().zip(self.image).enumerate() {
            let proj = self
                .profile
                .project_camera_point(&pose.transform_vector(&obj.coords))?;
            r[2 * i] = proj.x - px.x;
            r[2 * i + 1] = proj.y - px.y;
        }
        Some(r)
    }
}

fn pose_from_params(params: &DVector<f64>) -> RigidTransform {
    RigidTransform::from_rvec_tvec(
        Vector3::new(params[0], params[1], params[2]),
        Vector3::new(params[3], params[4], params[5]),
    )
}

fn pose_to_params(pose: &RigidTransform) -> DVector<f64> {
    let rv = pose.rvec();
    let t = pose.translation;
    DVector::from_vec(vec![rv.x, rv.y, rv.z, t.x, t.y, t.z])
}

/// Planar perspective-n-point solver.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanarPnp {
    pub refine: LevenbergMarquardt,
}

impl PlanarPnp {
    /// Pose mapping `object` into the camera frame, or `None` when the
    /// configuration is degenerate or the object would sit behind the camera.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(points = object.len()))
    )]
    pub fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        profile: &CalibrationProfile,
    ) -> Option<RigidTransform> {
        if object.len() != image.len() || object.len() < 4 {
            return None;
        }
        let plane = PlaneFrame::fit(object)?;
        let plane_pts: Vec<Point2<f64>> = object.iter().map(|p| plane.to_plane(p)).collect();
        let normalized: Vec<Point2<f64>> =
            image.iter().map(|&px| profile.undistort_pixel(px)).collect();
        if is_collinear_2d(&normalized) {
            return None;
        }

        let h = estimate_homography(&plane_pts, &normalized)?;
        let plane_to_cam = pose_from_homography(&h)?;

        // object -> plane -> camera
        let r_po = Rotation3::from_matrix_unchecked(plane.axes);
        let plane_from_object =
            RigidTransform::new(r_po.inverse(), -(r_po.inverse() * plane.origin));
        let initial = plane_to_cam.compose(&plane_from_object);

        let problem = ReprojectionProblem {
            object,
            image,
            profile,
        };
        let pose = match self.refine.minimize(&problem, pose_to_params(&initial)) {
            Some(report) => pose_from_params(&report.params),
            None => initial,
        };

        let all_in_front = object
            .iter()
            .all(|p| pose.transform_vector(&p.coords).z > 0.0);
        all_in_front.then_some(pose)
    }
}

/// Root-mean-square pixel reprojection error of `pose`.
pub fn reprojection_rms(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    pose: &RigidTransform,
    profile: &CalibrationProfile,
) -> Option<f64> {
    if object.is_empty() || object.len() != image.len() {
        return None;
    }
    let projected = profile.project_points(object, pose)?;
    let sum: f64 = projected
        .iter()
        .zip(image)
        .map(|(a, b)| (a - b).norm_squared())
        .sum();
    Some((sum / object.len() as f64).sqrt())
}
