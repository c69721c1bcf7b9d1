//! Ray-traced checkerboard frames for tests, benchmarks and dry runs.

use nalgebra::{Point2, Vector3};
use peariscope_core::{CalibrationProfile, ColorImage, GrayImage, ImageSize, RigidTransform};

use crate::grid::BoardSpec;

const DARK: f64 = 30.0;
const LIGHT: f64 = 240.0;
const BACKGROUND: f64 = 190.0;

/// Render `board` seen through `camera` at `pose` (board to camera).
///
/// The printed area extends one square beyond the inner corners plus a
/// light margin of one more square; everything else is background. Each
/// pixel averages `supersample²` rays.
pub fn render_checkerboard(
    camera: &CalibrationProfile,
    pose: &RigidTransform,
    board: &BoardSpec,
    size: ImageSize,
    supersample: u32,
) -> GrayImage {
    let (w, h) = (size.width as usize, size.height as usize);
    let ss = supersample.max(1) as usize;
    let mut img = GrayImage::new(w, h);

    let normal = pose.rotation * Vector3::z();
    let plane_d = normal.dot(&pose.translation);
    let inverse = pose.inverse();
    let s = board.square_size;
    let (cols, rows) = (board.pattern.cols as f64, board.pattern.rows as f64);

    let shade = |u: f64, v: f64| -> f64 {
        let (gx, gy) = (u / s, v / s);
        if gx < -2.0 || gy < -2.0 || gx > cols + 1.0 || gy > rows + 1.0 {
            return BACKGROUND;
        }
        if gx < -1.0 || gy < -1.0 || gx > cols || gy > rows {
            return LIGHT;
        }
        let parity = (gx.floor() as i64 + gy.floor() as i64).rem_euclid(2);
        if parity == 0 {
            DARK
        } else {
            LIGHT
        }
    };

    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for sy in 0..ss {
                for sx in 0..ss {
                    let px = Point2::new(
                        x as f64 + (sx as f64 + 0.5) / ss as f64 - 0.5,
                        y as f64 + (sy as f64 + 0.5) / ss as f64 - 0.5,
                    );
                    let n = camera.undistort_pixel(px);
                    let ray = Vector3::new(n.x, n.y, 1.0);
                    let denom = normal.dot(&ray);
                    let t = if denom.abs() > 1e-12 { plane_d / denom } else { -1.0 };
                    acc += if t > 0.0 {
                        let on_board = inverse.transform_vector(&(ray * t));
                        shade(on_board.x, on_board.y)
                    } else {
                        BACKGROUND
                    };
                }
            }
            img.data[y * w + x] = (acc / (ss * ss) as f64).round().clamp(0.0, 255.0) as u8;
        }
    }
    img
}

/// Replicate a gray image into RGB.
pub fn gray_to_color(img: &GrayImage) -> ColorImage {
    let data = img.data.iter().flat_map(|&v| [v, v, v]).collect();
    ColorImage {
        width: img.width,
        height: img.height,
        data,
    }
}
