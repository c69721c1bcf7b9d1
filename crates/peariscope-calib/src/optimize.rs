//! Joint refinement of intrinsics, distortion and per-view poses.

use nalgebra::{DMatrix, DVector, Vector3};
use peariscope_core::{
    numeric_jacobian, CalibrationProfile, ImageSize, LeastSquaresProblem, LevenbergMarquardt,
    PlanarPnp, RigidTransform,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::init::initial_intrinsics;
use crate::sample::{reprojection_stats, CalibrationSample};
use crate::CalibrationError;

/// Output of a [`CameraSolver`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub profile: CalibrationProfile,
    /// Board-to-camera pose of every sample, in sample order.
    pub extrinsics: Vec<RigidTransform>,
    /// `sqrt(sum d² / N)` over all points, pixels.
    pub rms_error: f64,
    /// Mean over samples of the per-sample mean distance, pixels.
    pub mean_reprojection_error: f64,
    pub per_sample_errors: Vec<f64>,
}

/// Computes intrinsics and distortion from accepted samples.
pub trait CameraSolver {
    fn calibrate(
        &self,
        samples: &[CalibrationSample],
        image_size: ImageSize,
    ) -> Result<CalibrationResult, CalibrationError>;
}

impl<S: CameraSolver + ?Sized> CameraSolver for &S {
    fn calibrate(
        &self,
        samples: &[CalibrationSample],
        image_size: ImageSize,
    ) -> Result<CalibrationResult, CalibrationError> {
        (**self).calibrate(samples, image_size)
    }
}

/// Parameters held constant during refinement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Keep the principal point at the image center.
    pub fix_principal_point: bool,
    /// Force `p1 = p2 = 0`.
    pub zero_tangential: bool,
    /// Force `k3 = 0`.
    pub fix_k3: bool,
}

const FX: usize = 0;
const FY: usize = 1;
const CX: usize = 2;
const CY: usize = 3;
const K1: usize = 4;
const K2: usize = 5;
const P1: usize = 6;
const P2: usize = 7;
const K3: usize = 8;
const N_INTRINSICS: usize = 9;
const N_POSE: usize = 6;

impl CalibrationFlags {
    fn free_intrinsics(&self) -> Vec<usize> {
        let mut free = vec![FX, FY];
        if !self.fix_principal_point {
            free.extend([CX, CY]);
        }
        free.extend([K1, K2]);
        if !self.zero_tangential {
            free.extend([P1, P2]);
        }
        if !self.fix_k3 {
            free.push(K3);
        }
        free
    }
}

/// Closed-form initialisation followed by Levenberg–Marquardt over all
/// intrinsics and every view pose.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LmCalibrator {
    pub flags: CalibrationFlags,
    pub lm: LevenbergMarquardt,
}

impl LmCalibrator {
    pub fn with_flags(mut self, flags: CalibrationFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl CameraSolver for LmCalibrator {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(samples = samples.len()))
    )]
    fn calibrate(
        &self,
        samples: &[CalibrationSample],
        image_size: ImageSize,
    ) -> Result<CalibrationResult, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::DataInsufficient { have: 0, need: 1 });
        }
        for (i, s) in samples.iter().enumerate() {
            if s.object_points.len() != s.image_points.len() || s.object_points.len() < 4 {
                return Err(CalibrationError::Configuration(format!(
                    "sample {i} has {} object and {} image points",
                    s.object_points.len(),
                    s.image_points.len()
                )));
            }
        }

        let init = initial_intrinsics(samples, image_size)
            .map_err(|e| CalibrationError::SolverFailed(e.to_string()))?;
        log::debug!(
            "initial intrinsics fx {:.1} fy {:.1} cx {:.1} cy {:.1}",
            init.fx(),
            init.fy(),
            init.cx(),
            init.cy()
        );

        let pnp = PlanarPnp::default();
        let mut x0 = Vec::with_capacity(N_INTRINSICS + N_POSE * samples.len());
        x0.extend([init.fx(), init.fy(), init.cx(), init.cy()]);
        x0.extend([0.0; 5]);
        for (i, s) in samples.iter().enumerate() {
            let pose = pnp
                .solve(&s.object_points, &s.image_points, &init)
                .ok_or_else(|| {
                    CalibrationError::SolverFailed(format!("no initial pose for sample {i}"))
                })?;
            let (r, t) = (pose.rvec(), pose.translation);
            x0.extend([r.x, r.y, r.z, t.x, t.y, t.z]);
        }

        let problem = JointProblem::new(samples, self.flags.free_intrinsics());
        let report = self
            .lm
            .minimize(&problem, DVector::from_vec(x0))
            .ok_or_else(|| {
                CalibrationError::SolverFailed("residuals undefined at the initial guess".into())
            })?;
        log::debug!(
            "calibration LM: {} iterations, cost {:.3e} -> {:.3e}, converged {}",
            report.iterations,
            report.initial_cost,
            report.final_cost,
            report.converged
        );

        let p = &report.params;
        let profile = profile_from_params(p)
            .ok_or_else(|| CalibrationError::SolverFailed("refined intrinsics invalid".into()))?;
        let extrinsics: Vec<RigidTransform> =
            (0..samples.len()).map(|v| pose_from_params(p, v)).collect();
        let stats = reprojection_stats(samples, &extrinsics, &profile).ok_or_else(|| {
            CalibrationError::SolverFailed("board behind the camera after refinement".into())
        })?;
        log::info!(
            "calibrated {} samples: rms {:.4} px, mean {:.4} px",
            samples.len(),
            stats.rms,
            stats.mean
        );

        Ok(CalibrationResult {
            profile,
            extrinsics,
            rms_error: stats.rms,
            mean_reprojection_error: stats.mean,
            per_sample_errors: stats.per_sample,
        })
    }
}

fn profile_from_params(p: &DVector<f64>) -> Option<CalibrationProfile> {
    CalibrationProfile::from_intrinsics(
        p[FX],
        p[FY],
        p[CX],
        p[CY],
        vec![p[K1], p[K2], p[P1], p[P2], p[K3]],
    )
    .ok()
}

fn pose_from_params(p: &DVector<f64>, view: usize) -> RigidTransform {
    let o = N_INTRINSICS + N_POSE * view;
    RigidTransform::from_rvec_tvec(
        Vector3::new(p[o], p[o + 1], p[o + 2]),
        Vector3::new(p[o + 3], p[o + 4], p[o + 5]),
    )
}

struct JointProblem<'a> {
    samples: &'a [CalibrationSample],
    free_intrinsics: Vec<usize>,
    /// First residual row of each view.
    offsets: Vec<usize>,
    rows: usize,
}

impl<'a> JointProblem<'a> {
    fn new(samples: &'a [CalibrationSample], free_intrinsics: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(samples.len());
        let mut rows = 0;
        for s in samples {
            offsets.push(rows);
            rows += 2 * s.image_points.len();
        }
        Self {
            samples,
            free_intrinsics,
            offsets,
            rows,
        }
    }

    fn view_residuals(
        &self,
        profile: &CalibrationProfile,
        pose: &RigidTransform,
        view: usize,
        out: &mut [f64],
    ) -> Option<()> {
        let sample = &self.samples[view];
        for (k, (obj, img)) in sample
            .object_points
            .iter()
            .zip(&sample.image_points)
            .enumerate()
        {
            let proj = profile.project_camera_point(&pose.transform_vector(&obj.coords))?;
            out[2 * k] = proj.x - img.x;
            out[2 * k + 1] = proj.y - img.y;
        }
        Some(())
    }
}

impl LeastSquaresProblem for JointProblem<'_> {
    fn residuals(&self, params: &DVector<f64>) -> Option<DVector<f64>> {
        let profile = profile_from_params(params)?;
        let mut r = DVector::zeros(self.rows);
        for v in 0..self.samples.len() {
            let n = 2 * self.samples[v].image_points.len();
            let o = self.offsets[v];
            self.view_residuals(
                &profile,
                &pose_from_params(params, v),
                v,
                &mut r.as_mut_slice()[o..o + n],
            )?;
        }
        Some(r)
    }

    /// Intrinsic columns touch every residual; a pose column only touches
    /// the rows of its own view.
    fn jacobian(&self, params: &DVector<f64>, r0: &DVector<f64>) -> Option<DMatrix<f64>> {
        let mut jac = numeric_jacobian(self, params, r0, self.free_intrinsics.iter().copied())?;
        let profile = profile_from_params(params)?;
        let mut shifted = params.clone();
        for v in 0..self.samples.len() {
            let n = 2 * self.samples[v].image_points.len();
            let o = self.offsets[v];
            let mut buf = vec![0.0; n];
            for k in 0..N_POSE {
                let c = N_INTRINSICS + N_POSE * v + k;
                let h = 1e-7 * params[c].abs().max(1.0);
                shifted[c] = params[c] + h;
                let pose = pose_from_params(&shifted, v);
                shifted[c] = params[c];
                self.view_residuals(&profile, &pose, v, &mut buf)?;
                for (row, val) in buf.iter().enumerate() {
                    jac[(o + row, c)] = (val - r0[o + row]) / h;
                }
            }
        }
        Some(jac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoardSpec, PatternSize};
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    fn truth() -> CalibrationProfile {
        CalibrationProfile::from_intrinsics(
            615.0,
            610.0,
            322.0,
            236.0,
            vec![-0.21, 0.06, 0.001, -0.0005, 0.0],
        )
        .expect("camera")
    }

    fn views() -> Vec<RigidTransform> {
        [
            ([0.35, 0.05, 0.02], [-0.09, -0.07, 0.45]),
            ([-0.3, 0.25, -0.05], [-0.1, -0.06, 0.5]),
            ([0.1, -0.4, 0.1], [-0.05, -0.08, 0.55]),
            ([-0.2, -0.3, 0.3], [-0.12, -0.02, 0.48]),
            ([0.45, 0.35, -0.2], [-0.08, -0.1, 0.6]),
        ]
        .iter()
        .map(|(r, t)| {
            RigidTransform::from_rvec_tvec(Vector3::from(*r), Vector3::from(*t))
        })
        .collect()
    }

    fn samples(cam: &CalibrationProfile) -> Vec<CalibrationSample> {
        let object_points = BoardSpec {
            pattern: PatternSize::new(7, 6),
            square_size: 0.03,
        }
        .object_points();
        views()
            .iter()
            .map(|pose| CalibrationSample {
                image_points: cam.project_points(&object_points, pose).expect("visible"),
                object_points: object_points.clone(),
            })
            .collect()
    }

    #[test]
    fn recovers_intrinsics_and_distortion() {
        let cam = truth();
        let result = LmCalibrator::default()
            .calibrate(&samples(&cam), ImageSize::new(640, 480))
            .expect("calibration");
        let p = &result.profile;
        assert_relative_eq!(p.fx(), 615.0, epsilon = 0.05);
        assert_relative_eq!(p.fy(), 610.0, epsilon = 0.05);
        assert_relative_eq!(p.cx(), 322.0, epsilon = 0.05);
        assert_relative_eq!(p.cy(), 236.0, epsilon = 0.05);
        assert_relative_eq!(p.distortion()[0], -0.21, epsilon = 1e-3);
        assert_eq!(p.distortion().len(), 5);
        assert!(result.rms_error < 1e-4, "rms {}", result.rms_error);
        assert_eq!(result.extrinsics.len(), 5);
        assert_eq!(result.per_sample_errors.len(), 5);
        assert_relative_eq!(
            result.extrinsics[2].translation,
            views()[2].translation,
            epsilon = 1e-4
        );
    }

    #[test]
    fn flags_hold_parameters() {
        let cam = CalibrationProfile::from_intrinsics(600.0, 600.0, 319.5, 239.5, vec![])
            .expect("camera");
        let flags = CalibrationFlags {
            fix_principal_point: true,
            zero_tangential: true,
            fix_k3: true,
        };
        let result = LmCalibrator::default()
            .with_flags(flags)
            .calibrate(&samples(&cam), ImageSize::new(640, 480))
            .expect("calibration");
        let d = result.profile.distortion();
        assert_eq!(result.profile.cx(), 319.5);
        assert_eq!(result.profile.cy(), 239.5);
        assert_eq!((d[2], d[3], d[4]), (0.0, 0.0, 0.0));
        assert_relative_eq!(result.profile.fx(), 600.0, epsilon = 0.05);
    }

    #[test]
    fn empty_input_is_insufficient() {
        let err = LmCalibrator::default()
            .calibrate(&[], ImageSize::new(640, 480))
            .unwrap_err();
        assert!(matches!(err, CalibrationError::DataInsufficient { have: 0, .. }));
    }

    #[test]
    fn mismatched_sample_is_configuration_error() {
        let bad = CalibrationSample {
            object_points: BoardSpec::default().object_points(),
            image_points: vec![Point2::origin(); 3],
        };
        let err = LmCalibrator::default()
            .calibrate(&[bad], ImageSize::new(640, 480))
            .unwrap_err();
        assert!(matches!(err, CalibrationError::Configuration(_)));
    }
}
