//! Per-frame telemetry written back into the parameter store.

use std::time::Duration;

use peariscope_core::ImageSize;

use crate::params::keys;
use crate::pipeline::Detection;
use crate::store::ParameterStore;

/// Position relative to the image center as a percentage of the half
/// dimension: 0 at the center, -100 at the left/top edge, +100 at the
/// right/bottom edge. Rounded to one decimal, halves to even.
pub fn percent_from_center(coord: f64, dim: f64) -> f64 {
    let half = dim / 2.0;
    if half <= 0.0 {
        return 0.0;
    }
    let pct = (coord - half) / half * 100.0;
    (pct * 10.0).round_ties_even() / 10.0
}

/// Frames per second for one iteration; 0 when no time elapsed.
pub fn frames_per_second(elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}

/// Writes every telemetry key on each successful iteration.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResultPublisher;

impl ResultPublisher {
    pub fn publish<S: ParameterStore + ?Sized>(
        &self,
        store: &S,
        size: ImageSize,
        detections: &[Detection],
        elapsed: Duration,
    ) {
        let (w, h) = (size.width as f64, size.height as f64);
        store.put_number(keys::IMAGE_HEIGHT, h);
        store.put_number(keys::IMAGE_WIDTH, w);

        let xs: Vec<f64> = detections.iter().map(|d| d.center.x).collect();
        let ys: Vec<f64> = detections.iter().map(|d| d.center.y).collect();
        store.put_number_array(
            keys::X_LIST_PCT,
            xs.iter().map(|&x| percent_from_center(x, w)).collect(),
        );
        store.put_number_array(
            keys::Y_LIST_PCT,
            ys.iter().map(|&y| percent_from_center(y, h)).collect(),
        );
        store.put_number_array(keys::X_LIST, xs);
        store.put_number_array(keys::Y_LIST, ys);

        let pose_field = |f: fn(&crate::pose::TargetPose) -> f64| -> Vec<f64> {
            detections
                .iter()
                .map(|d| d.pose.as_ref().map_or(f64::NAN, f))
                .collect()
        };
        store.put_number_array(keys::DISTANCE_LIST, pose_field(|p| p.distance));
        store.put_number_array(keys::BEARING_LIST, pose_field(|p| p.bearing));
        store.put_number_array(keys::TARGET_BEARING_LIST, pose_field(|p| p.target_bearing));

        store.put_number(keys::ELAPSED_TIME, elapsed.as_secs_f64());
        store.put_number(keys::FPS, frames_per_second(elapsed));
    }
}
