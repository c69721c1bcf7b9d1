//! Connected-region extraction and per-region descriptors.
//!
//! Foreground is 8-connected, background 4-connected. Only regions that
//! border the background reachable from outside the image are reported;
//! blobs sitting inside another region's hole are skipped.

use std::collections::VecDeque;

use nalgebra::Point2;
use peariscope_core::BinaryMask;
use serde::{Deserialize, Serialize};

use crate::geometry::{
    approx_polygon, closed_perimeter, convex_hull, min_area_rect, polygon_area, RotatedRect,
};

/// Axis-aligned pixel bounding box; `width`/`height` count pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Whole-pixel center, `floor(x + w / 2)`.
    pub fn center(&self) -> Point2<f64> {
        Point2::new(
            (self.x as f64 + self.width as f64 / 2.0).floor(),
            (self.y as f64 + self.height as f64 / 2.0).floor(),
        )
    }
}

/// One external region and its geometric descriptors.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    /// Outer boundary pixels in tracing order (clockwise on screen).
    pub boundary: Vec<Point2<i32>>,
    /// Shoelace area of the boundary polygon.
    pub area: f64,
    pub bbox: BoundingBox,
    pub rect: RotatedRect,
    /// `area / rect.area()`, 0 for a degenerate rectangle.
    pub fill_ratio: f64,
    /// Simplified convex outline; its length is the corner count.
    pub corners: Vec<Point2<f64>>,
}

impl Candidate {
    pub fn corner_count(&self) -> usize {
        self.corners.len()
    }

    pub fn center(&self) -> Point2<f64> {
        self.bbox.center()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateExtractor {
    /// Regions with a smaller boundary area are dropped.
    pub min_region_area: f64,
    /// Polygon approximation tolerance as a fraction of the hull perimeter.
    pub approx_epsilon_frac: f64,
}

impl Default for CandidateExtractor {
    fn default() -> Self {
        Self {
            min_region_area: 1.0,
            approx_epsilon_frac: 0.04,
        }
    }
}

impl CandidateExtractor {
    /// Label the mask and return a one-shot iterator over its external
    /// regions. Descriptors are computed as the iterator advances.
    pub fn extract<'m>(&self, mask: &'m BinaryMask) -> Candidates<'m> {
        let regions = label_external_regions(mask);
        Candidates {
            mask,
            regions: regions.into(),
            settings: *self,
        }
    }
}

/// Lazy sequence of [`Candidate`]s for one mask.
pub struct Candidates<'m> {
    mask: &'m BinaryMask,
    regions: VecDeque<Region>,
    settings: CandidateExtractor,
}

impl Iterator for Candidates<'_> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        while let Some(region) = self.regions.pop_front() {
            if let Some(c) = describe(self.mask, &region, &self.settings) {
                return Some(c);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.regions.len()))
    }
}

struct Region {
    /// First pixel in raster order.
    start: (usize, usize),
    min: (usize, usize),
    max: (usize, usize),
}

const N4: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const N8: [(i64, i64); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Background reachable from outside the image through 4-connected steps.
fn outer_background(mask: &BinaryMask) -> Vec<bool> {
    let (w, h) = (mask.width, mask.height);
    let mut seen = vec![false; w * h];
    let mut stack = Vec::new();
    let seed = |x: usize, y: usize, seen: &mut Vec<bool>, stack: &mut Vec<(usize, usize)>| {
        if !mask.get(x, y) && !seen[y * w + x] {
            seen[y * w + x] = true;
            stack.push((x, y));
        }
    };
    for x in 0..w {
        seed(x, 0, &mut seen, &mut stack);
        seed(x, h - 1, &mut seen, &mut stack);
    }
    for y in 0..h {
        seed(0, y, &mut seen, &mut stack);
        seed(w - 1, y, &mut seen, &mut stack);
    }
    while let Some((x, y)) = stack.pop() {
        for (dx, dy) in N4 {
            let (nx, ny) = (x as i64 + dx, y as i64 + dy);
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            seed(nx, ny, &mut seen, &mut stack);
        }
    }
    seen
}

fn label_external_regions(mask: &BinaryMask) -> Vec<Region> {
    let (w, h) = (mask.width, mask.height);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let outside = outer_background(mask);
    let mut labeled = vec![false; w * h];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for y0 in 0..h {
        for x0 in 0..w {
            if !mask.get(x0, y0) || labeled[y0 * w + x0] {
                continue;
            }
            labeled[y0 * w + x0] = true;
            stack.push((x0, y0));
            let mut region = Region {
                start: (x0, y0),
                min: (x0, y0),
                max: (x0, y0),
            };
            let mut external = false;

            while let Some((x, y)) = stack.pop() {
                region.min = (region.min.0.min(x), region.min.1.min(y));
                region.max = (region.max.0.max(x), region.max.1.max(y));
                for (dx, dy) in N8 {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        // Touches the image border.
                        external = true;
                        continue;
                    }
                    let i = ny as usize * w + nx as usize;
                    if mask.data[i] == 0 {
                        let four = dx == 0 || dy == 0;
                        if four && outside[i] {
                            external = true;
                        }
                    } else if !labeled[i] {
                        labeled[i] = true;
                        stack.push((nx as usize, ny as usize));
                    }
                }
            }

            if external {
                regions.push(region);
            }
        }
    }
    regions
}

/// Moore-neighbour tracing of the outer boundary starting at the region's
/// first raster pixel.
fn trace_boundary(mask: &BinaryMask, start: (usize, usize)) -> Vec<Point2<i32>> {
    let start = (start.0 as i64, start.1 as i64);
    let next_step = |cur: (i64, i64), from: usize| {
        (1..=8).map(move |k| (from + k) % 8).find(|&d| {
            let (dx, dy) = N8[d];
            mask.get_i(cur.0 + dx, cur.1 + dy)
        })
    };

    let mut boundary = vec![Point2::new(start.0 as i32, start.1 as i32)];
    // West of the first raster pixel is always background.
    let Some(first_dir) = next_step(start, 0) else {
        return boundary;
    };

    let mut cur = start;
    let mut dir = first_dir;
    let limit = 4 * mask.width * mask.height + 8;
    for _ in 0..limit {
        let (dx, dy) = N8[dir];
        cur = (cur.0 + dx, cur.1 + dy);
        let back = if dir % 2 == 0 { (dir + 6) % 8 } else { (dir + 5) % 8 };
        let Some(next) = next_step(cur, back) else {
            break;
        };
        if cur == start && next == first_dir {
            break;
        }
        boundary.push(Point2::new(cur.0 as i32, cur.1 as i32));
        dir = next;
    }
    boundary
}

fn describe(
    mask: &BinaryMask,
    region: &Region,
    settings: &CandidateExtractor,
) -> Option<Candidate> {
    let boundary = trace_boundary(mask, region.start);
    let poly: Vec<Point2<f64>> = boundary
        .iter()
        .map(|p| Point2::new(p.x as f64, p.y as f64))
        .collect();

    let area = polygon_area(&poly);
    if area < settings.min_region_area {
        return None;
    }

    let rect = min_area_rect(&poly)?;
    let rect_area = rect.area();
    let fill_ratio = if rect_area > 1e-12 {
        area / rect_area
    } else {
        0.0
    };

    let hull = convex_hull(&poly);
    let eps = settings.approx_epsilon_frac * closed_perimeter(&hull);
    let corners = approx_polygon(&hull, eps);

    let bbox = BoundingBox {
        x: region.min.0 as u32,
        y: region.min.1 as u32,
        width: (region.max.0 - region.min.0 + 1) as u32,
        height: (region.max.1 - region.min.1 + 1) as u32,
    };

    Some(Candidate {
        boundary,
        area,
        bbox,
        rect,
        fill_ratio,
        corners,
    })
}
