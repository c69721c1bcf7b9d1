//! Checkerboard detection: ChESS candidates, grid assembly, sub-pixel refinement.

use nalgebra::Point2;
use peariscope_core::GrayImageView;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::corners::{find_corners, CornerParams};
use crate::grid::{assemble_grid, GridParams, PatternSize};
use crate::subpix::{refine_corners, SubPixParams};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerboardDetector {
    pub pattern: PatternSize,
    pub corners: CornerParams,
    pub grid: GridParams,
    pub subpix: SubPixParams,
}

impl CheckerboardDetector {
    pub fn new(pattern: PatternSize) -> Self {
        Self {
            pattern,
            ..Self::default()
        }
    }

    /// Ordered, sub-pixel inner corners (`j * cols + i`), or `None` when the
    /// full pattern is not visible.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(w = img.width, h = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> Option<Vec<Point2<f64>>> {
        let candidates = find_corners(img, &self.corners);
        log::trace!("{} ChESS candidates", candidates.len());
        let mut corners = assemble_grid(&candidates, self.pattern, &self.grid)?;
        refine_corners(img, &mut corners, &self.subpix);
        Some(corners)
    }
}
