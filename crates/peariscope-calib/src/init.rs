//! Closed-form intrinsics guess from plane homographies.

use nalgebra::{DMatrix, DVector, Point2, Point3};
use peariscope_core::{estimate_homography, CalibrationProfile, CameraError, ImageSize};

use crate::CalibrationSample;

/// Principal point at the image center and focal lengths from the
/// orthogonality of each view's vanishing directions.
///
/// Each view yields two linear equations in `(1/fx², 1/fy²)`. When the
/// system is degenerate (e.g. only fronto-parallel views) both focal
/// lengths fall back to `max(width, height)`.
pub fn initial_intrinsics(
    samples: &[CalibrationSample],
    size: ImageSize,
) -> Result<CalibrationProfile, CameraError> {
    let cx = (size.width as f64 - 1.0) * 0.5;
    let cy = (size.height as f64 - 1.0) * 0.5;
    let fallback = size.width.max(size.height).max(1) as f64;

    let plausible = |f: f64| f.is_finite() && f > fallback / MAX_FOCAL_FACTOR && f < fallback * MAX_FOCAL_FACTOR;
    let (fx, fy) = match solve_focal(samples, cx, cy) {
        Some((fx, fy)) if plausible(fx) && plausible(fy) => (fx, fy),
        _ => {
            log::debug!("focal initialisation degenerate, using {fallback}");
            (fallback, fallback)
        }
    };
    CalibrationProfile::from_intrinsics(fx, fy, cx, cy, vec![0.0; 5])
}

/// Focal guesses further than this factor from the image size are discarded.
const MAX_FOCAL_FACTOR: f64 = 100.0;

fn solve_focal(samples: &[CalibrationSample], cx: f64, cy: f64) -> Option<(f64, f64)> {
    let mut rows: Vec<[f64; 2]> = Vec::new();
    let mut rhs: Vec<f64> = Vec::new();

    for sample in samples {
        let obj: Vec<Point2<f64>> = sample.object_points.iter().map(planar).collect();
        let img: Vec<Point2<f64>> = sample
            .image_points
            .iter()
            .map(|p| Point2::new(p.x - cx, p.y - cy))
            .collect();
        let Some(h) = estimate_homography(&obj, &img) else {
            continue;
        };
        let h = h.h;
        let mut hv = [0.0; 3];
        let mut vv = [0.0; 3];
        let mut d1 = [0.0; 3];
        let mut d2 = [0.0; 3];
        for j in 0..3 {
            hv[j] = h[(j, 0)];
            vv[j] = h[(j, 1)];
            d1[j] = (h[(j, 0)] + h[(j, 1)]) * 0.5;
            d2[j] = (h[(j, 0)] - h[(j, 1)]) * 0.5;
        }
        for v in [&mut hv, &mut vv, &mut d1, &mut d2] {
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            if n > 0.0 {
                v.iter_mut().for_each(|x| *x /= n);
            }
        }
        rows.push([hv[0] * vv[0], hv[1] * vv[1]]);
        rhs.push(-hv[2] * vv[2]);
        rows.push([d1[0] * d2[0], d1[1] * d2[1]]);
        rhs.push(-d1[2] * d2[2]);
    }

    if rows.len() < 2 {
        return None;
    }
    let a = DMatrix::from_fn(rows.len(), 2, |r, c| rows[r][c]);
    let b = DVector::from_vec(rhs);
    let f = a.svd(true, true).solve(&b, 1e-15).ok()?;
    if f[0] <= 0.0 || f[1] <= 0.0 {
        return None;
    }
    Some(((1.0 / f[0]).sqrt(), (1.0 / f[1]).sqrt()))
}

fn planar(p: &Point3<f64>) -> Point2<f64> {
    Point2::new(p.x, p.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use peariscope_core::RigidTransform;

    use crate::{BoardSpec, PatternSize};

    fn sample(cam: &CalibrationProfile, pose: RigidTransform) -> CalibrationSample {
        let object_points = BoardSpec {
            pattern: PatternSize::new(7, 6),
            square_size: 0.03,
        }
        .object_points();
        let image_points = cam.project_points(&object_points, &pose).expect("visible");
        CalibrationSample {
            object_points,
            image_points,
        }
    }

    #[test]
    fn recovers_focal_from_tilted_views() {
        let cam = CalibrationProfile::from_intrinsics(620.0, 600.0, 319.5, 239.5, vec![])
            .expect("camera");
        let samples = vec![
            sample(
                &cam,
                RigidTransform::from_rvec_tvec(
                    Vector3::new(0.4, 0.1, 0.05),
                    Vector3::new(-0.1, -0.08, 0.5),
                ),
            ),
            sample(
                &cam,
                RigidTransform::from_rvec_tvec(
                    Vector3::new(-0.2, 0.45, -0.1),
                    Vector3::new(-0.08, -0.07, 0.55),
                ),
            ),
        ];
        let init = initial_intrinsics(&samples, ImageSize::new(640, 480)).expect("init");
        assert!((init.fx() - 620.0).abs() < 1.0, "fx {}", init.fx());
        assert!((init.fy() - 600.0).abs() < 1.0, "fy {}", init.fy());
        assert_eq!(init.cx(), 319.5);
        assert_eq!(init.cy(), 239.5);
    }

    #[test]
    fn fronto_parallel_falls_back() {
        let cam = CalibrationProfile::from_intrinsics(500.0, 500.0, 319.5, 239.5, vec![])
            .expect("camera");
        let samples = vec![sample(
            &cam,
            RigidTransform::from_rvec_tvec(Vector3::zeros(), Vector3::new(-0.1, -0.07, 0.6)),
        )];
        let init = initial_intrinsics(&samples, ImageSize::new(640, 480)).expect("init");
        assert_eq!(init.fx(), 640.0);
        assert_eq!(init.fy(), 640.0);
    }

    #[test]
    fn no_samples_falls_back_to_image_size() {
        let init = initial_intrinsics(&[], ImageSize::new(640, 480)).expect("init");
        assert_eq!(init.fx(), 640.0);
        assert_eq!(init.fy(), 640.0);
    }
}
