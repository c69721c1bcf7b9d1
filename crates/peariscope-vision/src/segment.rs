//! Color-range segmentation.

use peariscope_core::{BinaryMask, ColorImageView};
use serde::{Deserialize, Serialize};

use crate::params::DetectionParams;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Produces a foreground mask from a frame.
pub trait Segmenter {
    fn segment(&self, frame: &ColorImageView<'_>, params: &DetectionParams) -> BinaryMask;
}

/// Morphological closing applied after thresholding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Morphology {
    pub dilate_iterations: u32,
    pub erode_iterations: u32,
}

impl Default for Morphology {
    fn default() -> Self {
        Self {
            dilate_iterations: 2,
            erode_iterations: 2,
        }
    }
}

impl Morphology {
    pub const NONE: Self = Self {
        dilate_iterations: 0,
        erode_iterations: 0,
    };

    pub fn apply(&self, mask: &mut BinaryMask) {
        for _ in 0..self.dilate_iterations {
            *mask = morph3x3(mask, Op::Dilate);
        }
        for _ in 0..self.erode_iterations {
            *mask = morph3x3(mask, Op::Erode);
        }
    }
}

/// Thresholds hue, saturation and value, then closes the mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvSegmenter {
    pub morphology: Morphology,
}

impl Segmenter for HsvSegmenter {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(w = frame.width, h = frame.height))
    )]
    fn segment(&self, frame: &ColorImageView<'_>, params: &DetectionParams) -> BinaryMask {
        let mut mask = BinaryMask::new(frame.width, frame.height);
        for (dst, px) in mask.data.iter_mut().zip(frame.data.chunks_exact(3)) {
            let [h, s, v] = rgb_to_hsv([px[0], px[1], px[2]]);
            let inside = in_range(h, params.min_hue, params.max_hue)
                && in_range(s, params.min_sat, params.max_sat)
                && in_range(v, params.min_val, params.max_val);
            if inside {
                *dst = BinaryMask::ON;
            }
        }
        self.morphology.apply(&mut mask);
        mask
    }
}

/// Thresholds brightness (`max(R, G, B)`) only; hue and saturation are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSegmenter {
    pub morphology: Morphology,
}

impl Segmenter for ValueSegmenter {
    fn segment(&self, frame: &ColorImageView<'_>, params: &DetectionParams) -> BinaryMask {
        let mut mask = BinaryMask::new(frame.width, frame.height);
        for (dst, px) in mask.data.iter_mut().zip(frame.data.chunks_exact(3)) {
            let v = px[0].max(px[1]).max(px[2]);
            if in_range(v, params.min_val, params.max_val) {
                *dst = BinaryMask::ON;
            }
        }
        self.morphology.apply(&mut mask);
        mask
    }
}

#[inline]
fn in_range(v: u8, lo: f64, hi: f64) -> bool {
    let v = v as f64;
    lo <= v && v <= hi
}

/// 8-bit HSV with H in `0..180`, S and V in `0..=255`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as i32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v == 0 {
        0
    } else {
        ((255 * diff) as f64 / v as f64).round() as i32
    };

    let h = if diff == 0 {
        0
    } else {
        let deg = if v == r {
            60.0 * (g - b) as f64 / diff as f64
        } else if v == g {
            120.0 + 60.0 * (b - r) as f64 / diff as f64
        } else {
            240.0 + 60.0 * (r - g) as f64 / diff as f64
        };
        let mut h = (deg / 2.0).round() as i32;
        if h < 0 {
            h += 180;
        }
        if h >= 180 {
            h -= 180;
        }
        h
    };

    [h as u8, s.clamp(0, 255) as u8, v as u8]
}

#[derive(Clone, Copy)]
enum Op {
    Dilate,
    Erode,
}

/// 3x3 dilation or erosion. Pixels outside the image are ignored, so the
/// border neither grows foreground nor eats into it.
fn morph3x3(src: &BinaryMask, op: Op) -> BinaryMask {
    let (w, h) = (src.width, src.height);
    let pick = |a: u8, b: u8| match op {
        Op::Dilate => a.max(b),
        Op::Erode => a.min(b),
    };

    // Separable: horizontal pass then vertical pass.
    let mut rows = vec![0u8; w * h];
    for y in 0..h {
        let row = &src.data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = row[x];
            if x > 0 {
                acc = pick(acc, row[x - 1]);
            }
            if x + 1 < w {
                acc = pick(acc, row[x + 1]);
            }
            rows[y * w + x] = acc;
        }
    }

    let mut out = BinaryMask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = rows[y * w + x];
            if y > 0 {
                acc = pick(acc, rows[(y - 1) * w + x]);
            }
            if y + 1 < h {
                acc = pick(acc, rows[(y + 1) * w + x]);
            }
            out.data[y * w + x] = acc;
        }
    }
    out
}
