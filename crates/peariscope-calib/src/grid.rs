//! Order `chess-corners` candidates into the board's row-major grid.

use nalgebra::{Point2, Point3};
use peariscope_core::{estimate_homography, homography_from_4pt, Homography};
use serde::{Deserialize, Serialize};

use crate::corners::CornerCandidate;

/// Inner-corner counts of a checkerboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSize {
    pub cols: usize,
    pub rows: usize,
}

impl PatternSize {
    pub const fn new(cols: usize, rows: usize) -> Self {
        Self { cols, rows }
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PatternSize {
    fn default() -> Self {
        Self::new(7, 6)
    }
}

/// Physical board: pattern plus square side length in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub pattern: PatternSize,
    pub square_size: f64,
}

impl Default for BoardSpec {
    fn default() -> Self {
        Self {
            pattern: PatternSize::default(),
            square_size: 0.0254,
        }
    }
}

impl BoardSpec {
    /// Object points on the z = 0 plane, row-major (column index fastest).
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let PatternSize { cols, rows } = self.pattern;
        (0..rows)
            .flat_map(|j| {
                (0..cols).map(move |i| {
                    Point3::new(i as f64 * self.square_size, j as f64 * self.square_size, 0.0)
                })
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Max distance between a predicted grid point and its candidate, as a
    /// fraction of the local grid spacing.
    pub assign_tolerance: f64,
    /// Max DLT residual as a fraction of the mean grid spacing.
    pub max_residual: f64,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            assign_tolerance: 0.35,
            max_residual: 0.25,
        }
    }
}

/// Order the candidates as a `cols x rows` grid (index `j * cols + i`), or
/// `None` if no consistent grid is found.
///
/// The strongest `cols * rows` candidates are taken; their extreme points
/// along the diagonals seed a 4-point homography from grid to image which
/// predicts every grid point. Both assignments of the pattern axes to the
/// image axes are tried and the one with the lower DLT residual wins.
pub fn assemble_grid(
    candidates: &[CornerCandidate],
    pattern: PatternSize,
    params: &GridParams,
) -> Option<Vec<Point2<f64>>> {
    let n = pattern.len();
    if pattern.cols < 2 || pattern.rows < 2 || candidates.len() < n {
        return None;
    }
    let mut strongest = candidates.to_vec();
    strongest.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    let pts: Vec<Point2<f64>> = strongest[..n].iter().map(|c| c.position).collect();

    let [tl, tr, br, bl] = diagonal_extremes(&pts)?;
    let (c, r) = ((pattern.cols - 1) as f64, (pattern.rows - 1) as f64);
    let layouts = [
        // Pattern columns run left to right.
        [tl, tr, br, bl],
        // Pattern columns run top to bottom.
        [tl, bl, br, tr],
    ];
    let grid_corners = [
        Point2::new(0.0, 0.0),
        Point2::new(c, 0.0),
        Point2::new(c, r),
        Point2::new(0.0, r),
    ];

    let mut best: Option<(f64, Vec<Point2<f64>>)> = None;
    for image_corners in layouts {
        let Some(h) = homography_from_4pt(&grid_corners, &image_corners) else {
            continue;
        };
        let Some((residual, ordered)) = assign(&pts, pattern, &h, params) else {
            continue;
        };
        if best.as_ref().is_none_or(|(r0, _)| residual < *r0) {
            best = Some((residual, ordered));
        }
    }
    let (residual, ordered) = best?;
    log::debug!("checkerboard grid assembled, DLT residual {residual:.3} px");
    Some(ordered)
}

/// Index of `pts` minimising `key`.
fn arg_min(pts: &[Point2<f64>], key: impl Fn(&Point2<f64>) -> f64) -> Option<usize> {
    pts.iter()
        .enumerate()
        .min_by(|a, b| key(a.1).total_cmp(&key(b.1)))
        .map(|(i, _)| i)
}

/// Top-left, top-right, bottom-right and bottom-left points by the `x + y`
/// and `x - y` extremes. Fails when two of them coincide.
fn diagonal_extremes(pts: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    let tl = arg_min(pts, |p| p.x + p.y)?;
    let br = arg_min(pts, |p| -(p.x + p.y))?;
    let tr = arg_min(pts, |p| -(p.x - p.y))?;
    let bl = arg_min(pts, |p| p.x - p.y)?;
    let idx = [tl, tr, br, bl];
    for a in 0..4 {
        for b in a + 1..4 {
            if idx[a] == idx[b] {
                return None;
            }
        }
    }
    Some(idx.map(|i| pts[i]))
}

/// Nearest-neighbour assignment of every predicted grid point followed by a
/// DLT fit. Returns the max residual and the ordered points.
fn assign(
    pts: &[Point2<f64>],
    pattern: PatternSize,
    h: &Homography,
    params: &GridParams,
) -> Option<(f64, Vec<Point2<f64>>)> {
    let mut used = vec![false; pts.len()];
    let mut ordered = Vec::with_capacity(pattern.len());
    let mut grid = Vec::with_capacity(pattern.len());
    let mut spacing_sum = 0.0;

    for j in 0..pattern.rows {
        for i in 0..pattern.cols {
            let g = Point2::new(i as f64, j as f64);
            let predicted = h.apply(g);
            let spacing = local_spacing(h, g);
            if !spacing.is_finite() || spacing <= 0.0 {
                return None;
            }
            spacing_sum += spacing;

            let (k, d) = pts
                .iter()
                .enumerate()
                .filter(|(k, _)| !used[*k])
                .map(|(k, p)| (k, (p - predicted).norm()))
                .min_by(|a, b| a.1.total_cmp(&b.1))?;
            if d > params.assign_tolerance * spacing {
                return None;
            }
            used[k] = true;
            ordered.push(pts[k]);
            grid.push(g);
        }
    }

    let fit = estimate_homography(&grid, &ordered)?;
    let residual = grid
        .iter()
        .zip(&ordered)
        .map(|(g, p)| (fit.apply(*g) - p).norm())
        .fold(0.0, f64::max);
    let mean_spacing = spacing_sum / pattern.len() as f64;
    (residual <= params.max_residual * mean_spacing).then_some((residual, ordered))
}

/// Smaller of the image distances to the next grid point along each axis.
fn local_spacing(h: &Homography, g: Point2<f64>) -> f64 {
    let p = h.apply(g);
    let dx = (h.apply(Point2::new(g.x + 1.0, g.y)) - p).norm();
    let dy = (h.apply(Point2::new(g.x, g.y + 1.0)) - p).norm();
    dx.min(dy)
}
