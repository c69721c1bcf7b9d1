//! Debug drawing on RGB frames.

use nalgebra::Point2;
use peariscope_core::ColorImage;

use crate::contour::{BoundingBox, Candidate};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const YELLOW: [u8; 3] = [255, 255, 0];

/// Bresenham line, clipped to the image.
pub fn draw_line(img: &mut ColorImage, a: Point2<i64>, b: Point2<i64>, rgb: [u8; 3]) {
    let (mut x, mut y) = (a.x, a.y);
    let dx = (b.x - a.x).abs();
    let dy = -(b.y - a.y).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        img.put_pixel(x, y, rgb);
        if x == b.x && y == b.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn draw_box(img: &mut ColorImage, bbox: &BoundingBox, rgb: [u8; 3]) {
    let (x0, y0) = (bbox.x as i64, bbox.y as i64);
    let (x1, y1) = (x0 + bbox.width as i64, y0 + bbox.height as i64);
    for (a, b) in [
        ((x0, y0), (x1, y0)),
        ((x1, y0), (x1, y1)),
        ((x1, y1), (x0, y1)),
        ((x0, y1), (x0, y0)),
    ] {
        draw_line(img, Point2::new(a.0, a.1), Point2::new(b.0, b.1), rgb);
    }
}

pub fn draw_disc(img: &mut ColorImage, center: Point2<i64>, radius: i64, rgb: [u8; 3]) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                img.put_pixel(center.x + dx, center.y + dy, rgb);
            }
        }
    }
}

pub fn draw_boundary(img: &mut ColorImage, boundary: &[Point2<i32>], rgb: [u8; 3]) {
    for p in boundary {
        img.put_pixel(p.x as i64, p.y as i64, rgb);
    }
}

/// Full-height and full-width lines through the image center.
pub fn draw_crosshair(img: &mut ColorImage, rgb: [u8; 3]) {
    let (w, h) = (img.width as i64, img.height as i64);
    if w == 0 || h == 0 {
        return;
    }
    let (cx, cy) = (w / 2, h / 2);
    draw_line(img, Point2::new(cx, 0), Point2::new(cx, h - 1), rgb);
    draw_line(img, Point2::new(0, cy), Point2::new(w - 1, cy), rgb);
}

pub fn draw_rejected(img: &mut ColorImage, c: &Candidate) {
    draw_boundary(img, &c.boundary, BLUE);
    draw_box(img, &c.bbox, RED);
}

pub fn draw_accepted(img: &mut ColorImage, c: &Candidate) {
    draw_boundary(img, &c.boundary, YELLOW);
    draw_box(img, &c.bbox, YELLOW);
    let center = c.center();
    draw_disc(
        img,
        Point2::new(center.x as i64, center.y as i64),
        2,
        YELLOW,
    );
    for corner in &c.corners {
        img.put_pixel(corner.x.round() as i64, corner.y.round() as i64, GREEN);
    }
}
