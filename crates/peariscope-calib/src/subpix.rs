//! Iterative gradient-based sub-pixel corner refinement.
//!
//! At the true corner `q` every image gradient `g_p` in the window is
//! orthogonal to `p - q`, so `q` solves `sum(w g gᵀ) q = sum(w g gᵀ p)`.
//! The window is re-centred on each estimate until the update falls below
//! `epsilon`.

use nalgebra::{Matrix2, Point2, Vector2};
use peariscope_core::{sample_bilinear, GrayImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Window is `(2 * half_window + 1)` pixels wide.
    pub half_window: u32,
    pub max_iterations: u32,
    /// Stop once the position moves less than this many pixels.
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 11,
            max_iterations: 30,
            epsilon: 0.001,
        }
    }
}

/// Refine every corner in place. A corner whose estimate wanders outside
/// its window keeps its input position.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(corners = corners.len()))
)]
pub fn refine_corners(img: &GrayImageView<'_>, corners: &mut [Point2<f64>], params: &SubPixParams) {
    let win = params.half_window as i32;
    let weights = window_weights(win);
    for corner in corners.iter_mut() {
        *corner = refine_one(img, *corner, win, &weights, params);
    }
}

/// Separable Gaussian `exp(-d² / win²)` per axis.
fn window_weights(win: i32) -> Vec<f64> {
    let scale = 1.0 / (win as f64 * win as f64).max(1.0);
    (-win..=win)
        .map(|d| (-(d as f64 * d as f64) * scale).exp())
        .collect()
}

fn refine_one(
    img: &GrayImageView<'_>,
    start: Point2<f64>,
    win: i32,
    weights: &[f64],
    params: &SubPixParams,
) -> Point2<f64> {
    let sample = |x: f64, y: f64| sample_bilinear(img, x as f32, y as f32) as f64;
    let eps2 = params.epsilon * params.epsilon;
    let mut current = start;

    for _ in 0..params.max_iterations {
        let mut g = Matrix2::zeros();
        let mut rhs = Vector2::zeros();
        for dy in -win..=win {
            for dx in -win..=win {
                let w = weights[(dy + win) as usize] * weights[(dx + win) as usize];
                let (x, y) = (current.x + dx as f64, current.y + dy as f64);
                let gx = sample(x + 1.0, y) - sample(x - 1.0, y);
                let gy = sample(x, y + 1.0) - sample(x, y - 1.0);
                let grad = Vector2::new(gx, gy);
                let ggt = grad * grad.transpose() * w;
                g += ggt;
                rhs += ggt * Vector2::new(dx as f64, dy as f64);
            }
        }
        let det = g.determinant();
        if det.abs() <= eps2 {
            break;
        }
        let Some(inv) = g.try_inverse() else {
            break;
        };
        let step = inv * rhs;
        current += step;
        if current.x < 0.0
            || current.y < 0.0
            || current.x >= img.width as f64
            || current.y >= img.height as f64
        {
            break;
        }
        if step.norm_squared() <= eps2 {
            break;
        }
    }

    let drift = current - start;
    if drift.x.abs() > win as f64 || drift.y.abs() > win as f64 || !drift.x.is_finite() {
        start
    } else {
        current
    }
}
