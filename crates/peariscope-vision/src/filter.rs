//! Geometric acceptance tests for candidates.

use serde::{Deserialize, Serialize};

use crate::contour::Candidate;
use crate::params::{DetectionParams, FilterConventions};

/// First failed criterion for a rejected candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    Area { area: f64 },
    Ratio { ratio: f64 },
    Fill { fill: f64 },
    Width { width: u32 },
    Height { height: u32 },
    CornerCount { corners: usize },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Area { area } => write!(f, "area {area:.1} out of range"),
            Rejection::Ratio { ratio } => write!(f, "aspect ratio {ratio:.2} too small"),
            Rejection::Fill { fill } => write!(f, "fill {fill:.3} out of range"),
            Rejection::Width { width } => write!(f, "width {width} out of range"),
            Rejection::Height { height } => write!(f, "height {height} out of range"),
            Rejection::CornerCount { corners } => write!(f, "{corners} corners, expected 4"),
        }
    }
}

/// Accept/reject policy. Implementations must not keep state between calls.
pub trait CandidateFilter {
    fn evaluate(&self, candidate: &Candidate, params: &DetectionParams) -> Result<(), Rejection>;

    fn accept(&self, candidate: &Candidate, params: &DetectionParams) -> bool {
        self.evaluate(candidate, params).is_ok()
    }
}

/// Area, aspect ratio, fill, box size and (optionally) corner count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricFilter {
    pub conventions: FilterConventions,
    pub require_quad: bool,
}

impl Default for GeometricFilter {
    fn default() -> Self {
        Self {
            conventions: FilterConventions::default(),
            require_quad: true,
        }
    }
}

impl CandidateFilter for GeometricFilter {
    fn evaluate(&self, c: &Candidate, p: &DetectionParams) -> Result<(), Rejection> {
        let conv = &self.conventions;
        if !conv.area.contains(c.area, p.min_area, p.max_area) {
            return Err(Rejection::Area { area: c.area });
        }
        let ratio = c.rect.aspect_ratio();
        if !at_least(ratio, p.min_ratio) {
            return Err(Rejection::Ratio { ratio });
        }
        if !conv.fill.contains(c.fill_ratio, 0.0, p.max_fill) {
            return Err(Rejection::Fill { fill: c.fill_ratio });
        }
        let (w, h) = (c.bbox.width as f64, c.bbox.height as f64);
        if !conv.dimensions.contains(w, p.min_width, p.max_width) {
            return Err(Rejection::Width {
                width: c.bbox.width,
            });
        }
        if !conv.dimensions.contains(h, p.min_height, p.max_height) {
            return Err(Rejection::Height {
                height: c.bbox.height,
            });
        }
        if self.require_quad && c.corner_count() != 4 {
            return Err(Rejection::CornerCount {
                corners: c.corner_count(),
            });
        }
        Ok(())
    }
}

/// NaN on either side fails.
#[inline]
fn at_least(value: f64, min: f64) -> bool {
    value >= min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::BoundingBox;
    use crate::geometry::RotatedRect;
    use crate::params::Bounds;
    use nalgebra::Point2;

    fn candidate(area: f64, long: f64, short: f64, corners: usize) -> Candidate {
        Candidate {
            boundary: Vec::new(),
            area,
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: long as u32,
                height: short as u32,
            },
            rect: RotatedRect {
                center: Point2::origin(),
                long,
                short,
                angle_deg: 0.0,
            },
            fill_ratio: if long * short > 0.0 {
                area / (long * short)
            } else {
                0.0
            },
            corners: vec![Point2::origin(); corners],
        }
    }

    #[test]
    fn typical_outline_is_accepted() {
        let c = candidate(120.0, 60.0, 30.0, 4);
        assert_eq!(
            GeometricFilter::default().evaluate(&c, &DetectionParams::default()),
            Ok(())
        );
    }

    #[test]
    fn fill_exactly_max_is_rejected() {
        // 0.15 = 270 / (60 * 30)
        let c = candidate(270.0, 60.0, 30.0, 4);
        assert_eq!(c.fill_ratio, 0.15);
        let verdict = GeometricFilter::default().evaluate(&c, &DetectionParams::default());
        assert!(matches!(verdict, Err(Rejection::Fill { .. })));
    }

    #[test]
    fn area_exactly_min_is_accepted() {
        let c = candidate(50.0, 60.0, 30.0, 4);
        assert!(GeometricFilter::default().accept(&c, &DetectionParams::default()));
    }

    #[test]
    fn open_area_convention_rejects_min() {
        let c = candidate(50.0, 60.0, 30.0, 4);
        let filter = GeometricFilter {
            conventions: FilterConventions {
                area: Bounds::Open,
                ..FilterConventions::default()
            },
            ..GeometricFilter::default()
        };
        assert_eq!(
            filter.evaluate(&c, &DetectionParams::default()),
            Err(Rejection::Area { area: 50.0 })
        );
    }

    #[test]
    fn closed_fill_convention_accepts_max() {
        let c = candidate(270.0, 60.0, 30.0, 4);
        let filter = GeometricFilter {
            conventions: FilterConventions {
                fill: Bounds::Closed,
                ..FilterConventions::default()
            },
            ..GeometricFilter::default()
        };
        assert!(filter.accept(&c, &DetectionParams::default()));
    }

    #[test]
    fn near_square_blob_is_rejected() {
        let c = candidate(100.0, 31.0, 30.0, 4);
        assert!(matches!(
            GeometricFilter::default().evaluate(&c, &DetectionParams::default()),
            Err(Rejection::Ratio { .. })
        ));
    }

    #[test]
    fn corner_count_only_checked_when_required() {
        let c = candidate(120.0, 60.0, 30.0, 5);
        let strict = GeometricFilter::default();
        let loose = GeometricFilter {
            require_quad: false,
            ..GeometricFilter::default()
        };
        let params = DetectionParams::default();
        assert_eq!(
            strict.evaluate(&c, &params),
            Err(Rejection::CornerCount { corners: 5 })
        );
        assert!(loose.accept(&c, &params));
    }

    #[test]
    fn inverted_bounds_reject_without_panicking() {
        let c = candidate(120.0, 60.0, 30.0, 4);
        let params = DetectionParams {
            min_area: 2000.0,
            max_area: 50.0,
            ..DetectionParams::default()
        };
        assert!(!GeometricFilter::default().accept(&c, &params));
    }

    #[test]
    fn dimension_bounds_apply_to_bbox() {
        let c = candidate(120.0, 60.0, 30.0, 4);
        let params = DetectionParams {
            max_width: 59.0,
            ..DetectionParams::default()
        };
        assert_eq!(
            GeometricFilter::default().evaluate(&c, &params),
            Err(Rejection::Width { width: 60 })
        );
    }
}
