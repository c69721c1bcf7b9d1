//! ChESS X-junction candidates via `chess-corners`.

use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use nalgebra::Point2;
use peariscope_core::GrayImageView;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Serializable subset of the ChESS detector settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerParams {
    /// Threshold as a fraction of the strongest response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    /// Positive responses required around a peak.
    pub min_cluster_size: u32,
}

impl Default for CornerParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_cluster_size: 2,
        }
    }
}

impl CornerParams {
    /// Single-scale detector configuration.
    pub fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.threshold_rel;
        cfg.params.nms_radius = self.nms_radius;
        cfg.params.min_cluster_size = self.min_cluster_size;
        cfg
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CornerCandidate {
    pub position: Point2<f64>,
    pub strength: f32,
}

fn adapt_chess_corner(c: &CornerDescriptor) -> CornerCandidate {
    CornerCandidate {
        position: Point2::new(c.x as f64, c.y as f64),
        strength: c.response,
    }
}

/// Copy a view into the buffer type `chess-corners` consumes.
pub fn gray_image(img: &GrayImageView<'_>) -> Option<image::GrayImage> {
    let len = img.width.checked_mul(img.height)?;
    let data = img.data.get(..len)?.to_vec();
    image::GrayImage::from_raw(img.width as u32, img.height as u32, data)
}

/// Candidates sorted by descending strength.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(w = img.width, h = img.height))
)]
pub fn find_corners(img: &GrayImageView<'_>, params: &CornerParams) -> Vec<CornerCandidate> {
    let Some(buf) = gray_image(img) else {
        log::warn!("gray view {}x{} has a short buffer", img.width, img.height);
        return Vec::new();
    };
    let mut out: Vec<CornerCandidate> = find_chess_corners_image(&buf, &params.chess_config())
        .iter()
        .map(adapt_chess_corner)
        .collect();
    out.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BoardSpec, PatternSize};
    use crate::synthetic::render_checkerboard;
    use nalgebra::Vector3;
    use peariscope_core::{CalibrationProfile, GrayImage, ImageSize, RigidTransform};

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::new(64, 48);
        assert!(find_corners(&img.view(), &CornerParams::default()).is_empty());
    }

    #[test]
    fn short_buffer_yields_nothing() {
        let data = vec![0u8; 10];
        let view = GrayImageView {
            width: 8,
            height: 8,
            data: &data,
        };
        assert!(gray_image(&view).is_none());
        assert!(find_corners(&view, &CornerParams::default()).is_empty());
    }

    #[test]
    fn rendered_board_corners_are_found() {
        let cam = CalibrationProfile::from_intrinsics(400.0, 400.0, 159.5, 119.5, vec![])
            .expect("camera");
        let board = BoardSpec {
            pattern: PatternSize::new(4, 3),
            square_size: 0.04,
        };
        let pose = RigidTransform::from_rvec_tvec(
            Vector3::new(0.1, -0.1, 0.0),
            Vector3::new(-0.06, -0.04, 0.8),
        );
        let img = render_checkerboard(&cam, &pose, &board, ImageSize::new(320, 240), 3);
        let found = find_corners(&img.view(), &CornerParams::default());
        let truth = cam
            .project_points(&board.object_points(), &pose)
            .expect("visible");
        assert!(found.len() >= truth.len());
        assert!(found.windows(2).all(|w| w[0].strength >= w[1].strength));
        for t in &truth {
            let nearest = found
                .iter()
                .map(|c| (c.position - t).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(nearest < 1.0, "no candidate near {t}");
        }
    }
}
