use nalgebra::{Point2, Point3};
use peariscope_core::{CalibrationProfile, RigidTransform};
use serde::{Deserialize, Serialize};

/// One accepted checkerboard view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Board corners on the z = 0 plane, meters.
    pub object_points: Vec<Point3<f64>>,
    /// Matching sub-pixel image positions.
    pub image_points: Vec<Point2<f64>>,
}

impl CalibrationSample {
    /// Pixel distance between each observed corner and its projection, or
    /// `None` if a point lands behind the camera.
    pub fn residual_distances(
        &self,
        profile: &CalibrationProfile,
        pose: &RigidTransform,
    ) -> Option<Vec<f64>> {
        let projected = profile.project_points(&self.object_points, pose)?;
        Some(
            projected
                .iter()
                .zip(&self.image_points)
                .map(|(a, b)| (a - b).norm())
                .collect(),
        )
    }
}

/// Error statistics over a set of samples.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    /// `sqrt(sum d² / N)` over every point.
    pub rms: f64,
    /// Mean over samples of each sample's mean distance.
    pub mean: f64,
    pub per_sample: Vec<f64>,
}

pub fn reprojection_stats(
    samples: &[CalibrationSample],
    extrinsics: &[RigidTransform],
    profile: &CalibrationProfile,
) -> Option<ReprojectionStats> {
    if samples.is_empty() || samples.len() != extrinsics.len() {
        return None;
    }
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    let mut per_sample = Vec::with_capacity(samples.len());
    for (sample, pose) in samples.iter().zip(extrinsics) {
        let d = sample.residual_distances(profile, pose)?;
        if d.is_empty() {
            return None;
        }
        sum_sq += d.iter().map(|v| v * v).sum::<f64>();
        count += d.len();
        per_sample.push(d.iter().sum::<f64>() / d.len() as f64);
    }
    Some(ReprojectionStats {
        rms: (sum_sq / count as f64).sqrt(),
        mean: per_sample.iter().sum::<f64>() / per_sample.len() as f64,
        per_sample,
    })
}
