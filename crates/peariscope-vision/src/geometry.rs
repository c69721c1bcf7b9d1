//! Planar polygon helpers used by the candidate extractor.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Absolute shoelace area of a closed polygon.
pub fn polygon_area(pts: &[Point2<f64>]) -> f64 {
    if pts.len() < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for (i, p) in pts.iter().enumerate() {
        let q = pts[(i + 1) % pts.len()];
        acc += p.x * q.y - q.x * p.y;
    }
    acc.abs() * 0.5
}

/// Perimeter of a closed polygon.
pub fn closed_perimeter(pts: &[Point2<f64>]) -> f64 {
    if pts.len() < 2 {
        return 0.0;
    }
    pts.iter()
        .enumerate()
        .map(|(i, p)| (pts[(i + 1) % pts.len()] - p).norm())
        .sum()
}

#[inline]
fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by Andrew's monotone chain; collinear points are dropped.
pub fn convex_hull(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut pts: Vec<Point2<f64>> = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(pts.len() * 2);
    for p in &pts {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    let lower_len = hull.len() + 1;
    for p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

/// Minimum-area enclosing rectangle.
///
/// `long >= short` always. `angle_deg` is the direction of the long side,
/// 0 = horizontal, positive = counter-clockwise as seen on screen (image y
/// grows downwards), normalized into `(-90, 90]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RotatedRect {
    pub center: Point2<f64>,
    pub long: f64,
    pub short: f64,
    pub angle_deg: f64,
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.long * self.short
    }

    /// `long / short`, infinite for a zero-width rectangle.
    pub fn aspect_ratio(&self) -> f64 {
        if self.short > 0.0 {
            self.long / self.short
        } else if self.long > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

/// Normalize an angle in degrees into `(-90, 90]`.
pub fn normalize_half_turn(mut deg: f64) -> f64 {
    while deg > 90.0 {
        deg -= 180.0;
    }
    while deg <= -90.0 {
        deg += 180.0;
    }
    deg
}

/// Rotating calipers over the convex hull of `points`.
pub fn min_area_rect(points: &[Point2<f64>]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => return None,
        1 => {
            return Some(RotatedRect {
                center: hull[0],
                long: 0.0,
                short: 0.0,
                angle_deg: 0.0,
            })
        }
        _ => {}
    }

    let mut best: Option<(f64, RotatedRect)> = None;
    for i in 0..hull.len() {
        let edge = hull[(i + 1) % hull.len()] - hull[i];
        let len = edge.norm();
        if len < 1e-12 {
            continue;
        }
        let u = edge / len;
        let v = Vector2::new(-u.y, u.x);

        let (mut u_min, mut u_max, mut v_min, mut v_max) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for p in &hull {
            let d = p.coords;
            let pu = d.dot(&u);
            let pv = d.dot(&v);
            u_min = u_min.min(pu);
            u_max = u_max.max(pu);
            v_min = v_min.min(pv);
            v_max = v_max.max(pv);
        }
        let (w, h) = (u_max - u_min, v_max - v_min);
        let area = w * h;
        if best.as_ref().is_some_and(|(a, _)| *a <= area) {
            continue;
        }

        let center =
            Point2::from(u * ((u_min + u_max) * 0.5) + v * ((v_min + v_max) * 0.5));
        let (long, short, dir) = if w >= h { (w, h, u) } else { (h, w, v) };
        let angle_deg = normalize_half_turn((-dir.y).atan2(dir.x).to_degrees());
        best = Some((
            area,
            RotatedRect {
                center,
                long,
                short,
                angle_deg,
            },
        ));
    }
    best.map(|(_, r)| r)
}

fn point_line_distance(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len = ab.norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    (ab.x * (p.y - a.y) - ab.y * (p.x - a.x)).abs() / len
}

/// Douglas–Peucker on the open chain `pts[first..=last]`; pushes the kept
/// interior indices (exclusive of the end points) in order.
fn simplify_chain(pts: &[Point2<f64>], first: usize, last: usize, eps: f64, out: &mut Vec<usize>) {
    if last <= first + 1 {
        return;
    }
    let (mut idx, mut dmax) = (first, -1.0);
    for i in first + 1..last {
        let d = point_line_distance(&pts[i], &pts[first], &pts[last]);
        if d > dmax {
            dmax = d;
            idx = i;
        }
    }
    if dmax > eps {
        simplify_chain(pts, first, idx, eps, out);
        out.push(idx);
        simplify_chain(pts, idx, last, eps, out);
    }
}

/// Douglas–Peucker approximation of a closed polygon.
///
/// The curve is split at the vertex farthest from `pts[0]` and at the vertex
/// farthest from that one; both halves are simplified independently.
pub fn approx_polygon(pts: &[Point2<f64>], eps: f64) -> Vec<Point2<f64>> {
    let n = pts.len();
    if n < 3 {
        return pts.to_vec();
    }
    let farthest_from = |from: &Point2<f64>| {
        (0..n)
            .max_by(|&a, &b| {
                (pts[a] - from)
                    .norm_squared()
                    .partial_cmp(&(pts[b] - from).norm_squared())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0)
    };
    let a = farthest_from(&pts[0]);
    let b = farthest_from(&pts[a]);
    if a == b {
        return vec![pts[a]];
    }

    // Rotate so the curve starts at `a`, then close it back onto `a`.
    let ring: Vec<Point2<f64>> = (0..=n).map(|k| pts[(a + k) % n]).collect();
    let split = (b + n - a) % n;

    let mut keep = vec![0];
    simplify_chain(&ring, 0, split, eps, &mut keep);
    keep.push(split);
    simplify_chain(&ring, split, n, eps, &mut keep);
    keep.into_iter().map(|i| ring[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64) -> Point2<f64> {
        Point2::new(x, y)
    }

    #[test]
    fn shoelace_area_of_rectangle() {
        let rect = [p(0.0, 0.0), p(4.0, 0.0), p(4.0, 3.0), p(0.0, 3.0)];
        assert_relative_eq!(polygon_area(&rect), 12.0);
        assert_relative_eq!(closed_perimeter(&rect), 14.0);
    }

    #[test]
    fn hull_drops_interior_and_collinear_points() {
        let pts = [
            p(0.0, 0.0),
            p(1.0, 0.0),
            p(2.0, 0.0),
            p(2.0, 2.0),
            p(0.0, 2.0),
            p(1.0, 1.0),
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert_relative_eq!(polygon_area(&hull), 4.0);
    }

    #[test]
    fn axis_aligned_rect_is_horizontal() {
        let pts = [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 2.0), p(0.0, 2.0)];
        let r = min_area_rect(&pts).expect("rect");
        assert_relative_eq!(r.long, 10.0, epsilon = 1e-9);
        assert_relative_eq!(r.short, 2.0, epsilon = 1e-9);
        assert_relative_eq!(r.angle_deg.abs(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(r.center, p(5.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn tall_rect_is_vertical_and_long_side_first() {
        let pts = [p(0.0, 0.0), p(2.0, 0.0), p(2.0, 10.0), p(0.0, 10.0)];
        let r = min_area_rect(&pts).expect("rect");
        assert!(r.long >= r.short);
        assert_relative_eq!(r.long, 10.0, epsilon = 1e-9);
        assert_relative_eq!(r.angle_deg, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn rising_diagonal_on_screen_is_positive_angle() {
        // Long axis goes right and up the screen (y decreasing).
        let dir = Vector2::new(1.0, -1.0).normalize();
        let n = Vector2::new(-dir.y, dir.x);
        let pts: Vec<Point2<f64>> = [(0.0, 0.0), (20.0, 0.0), (20.0, 3.0), (0.0, 3.0)]
            .iter()
            .map(|&(a, b)| Point2::from(dir * a + n * b))
            .collect();
        let r = min_area_rect(&pts).expect("rect");
        assert_relative_eq!(r.angle_deg, 45.0, epsilon = 1e-9);
        assert_relative_eq!(r.long, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn angle_normalization_range() {
        assert_relative_eq!(normalize_half_turn(-90.0), 90.0);
        assert_relative_eq!(normalize_half_turn(135.0), -45.0);
        assert_relative_eq!(normalize_half_turn(270.0), 90.0);
    }

    #[test]
    fn approx_polygon_reduces_noisy_quad() {
        let mut pts = Vec::new();
        let corners = [p(0.0, 0.0), p(40.0, 0.0), p(40.0, 20.0), p(0.0, 20.0)];
        for i in 0..4 {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            for k in 0..10 {
                let t = k as f64 / 10.0;
                let jitter = if k % 2 == 0 { 0.3 } else { -0.3 };
                let q = a + (b - a) * t;
                let nrm = Vector2::new(-(b - a).y, (b - a).x).normalize();
                pts.push(if k == 0 { q } else { q + nrm * jitter });
            }
        }
        let eps = 0.04 * closed_perimeter(&pts);
        let approx = approx_polygon(&pts, eps);
        assert_eq!(approx.len(), 4);
        for c in corners {
            assert!(approx.iter().any(|q| (q - c).norm() < 1e-9));
        }
    }

    #[test]
    fn degenerate_inputs() {
        assert!(min_area_rect(&[]).is_none());
        let single = min_area_rect(&[p(3.0, 4.0)]).expect("point");
        assert_eq!(single.long, 0.0);
        let seg = min_area_rect(&[p(0.0, 0.0), p(3.0, 4.0)]).expect("segment");
        assert_relative_eq!(seg.long, 5.0, epsilon = 1e-9);
        assert_relative_eq!(seg.short, 0.0, epsilon = 1e-9);
        assert_eq!(seg.aspect_ratio(), f64::INFINITY);
    }
}
