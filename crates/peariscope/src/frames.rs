//! File-backed frame sources and sinks built on the `image` crate.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use peariscope_core::{AcquisitionError, ColorImage, FrameSink, FrameSource, GrayImage, ImageSize};

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "pgm", "tif", "tiff"];

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("failed to list {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("buffer of {len} bytes does not match {width}x{height}")]
    Dimensions { width: usize, height: usize, len: usize },
}

pub fn color_from_rgb(img: &image::RgbImage) -> ColorImage {
    ColorImage {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw().clone(),
    }
}

pub fn rgb_from_color(img: &ColorImage) -> Result<image::RgbImage, FrameError> {
    image::RgbImage::from_raw(img.width as u32, img.height as u32, img.data.clone()).ok_or(
        FrameError::Dimensions {
            width: img.width,
            height: img.height,
            len: img.data.len(),
        },
    )
}

/// Decode any supported image file to RGB.
pub fn load_frame(path: impl AsRef<Path>) -> Result<ColorImage, FrameError> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| FrameError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(color_from_rgb(&img.to_rgb8()))
}

/// Encode by file extension.
pub fn save_frame(img: &ColorImage, path: impl AsRef<Path>) -> Result<(), FrameError> {
    let path = path.as_ref();
    rgb_from_color(img)?
        .save(path)
        .map_err(|source| FrameError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_gray(img: &GrayImage, path: impl AsRef<Path>) -> Result<(), FrameError> {
    let path = path.as_ref();
    let buf = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .ok_or(FrameError::Dimensions {
            width: img.width,
            height: img.height,
            len: img.data.len(),
        })?;
    buf.save(path).map_err(|source| FrameError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

/// Replays the image files of a directory in file-name order.
///
/// Unreadable files surface as [`AcquisitionError::Read`]; the source ends
/// with [`AcquisitionError::EndOfStream`].
#[derive(Debug)]
pub struct ImageDirSource {
    pending: VecDeque<PathBuf>,
    expected_size: Option<ImageSize>,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, FrameError> {
        let dir = dir.as_ref();
        let list_err = |source| FrameError::ListDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(list_err)? {
            let path = entry.map_err(list_err)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        log::info!("{} frames in {}", paths.len(), dir.display());
        Ok(Self {
            pending: paths.into(),
            expected_size: None,
        })
    }

    /// Frames of any other size are reported as read failures.
    pub fn with_expected_size(mut self, size: ImageSize) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<ColorImage, AcquisitionError> {
        let path = self.pending.pop_front().ok_or(AcquisitionError::EndOfStream)?;
        log::debug!("reading {}", path.display());
        let frame = load_frame(&path).map_err(|e| AcquisitionError::Read(e.to_string()))?;
        match self.expected_size {
            Some(want) if want != frame.size() => Err(AcquisitionError::Read(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                frame.width,
                frame.height,
                want.width,
                want.height
            ))),
            _ => Ok(frame),
        }
    }
}

/// Writes each overlay frame to one file, replacing the previous one.
#[derive(Clone, Debug)]
pub struct OverlayFileSink {
    path: PathBuf,
    written: usize,
}

impl OverlayFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for OverlayFileSink {
    fn put_frame(&mut self, frame: &ColorImage) {
        match save_frame(frame, &self.path) {
            Ok(()) => self.written += 1,
            Err(e) => log::warn!("{e}"),
        }
    }

    fn notify_error(&mut self, error: &AcquisitionError) {
        log::warn!("overlay stream: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, w: u32, h: u32, rgb: [u8; 3]) {
        image::RgbImage::from_pixel(w, h, image::Rgb(rgb))
            .save(path)
            .expect("write png");
    }

    #[test]
    fn replays_images_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("b.png"), 4, 3, [0, 200, 0]);
        write_png(&dir.path().join("a.png"), 4, 3, [10, 20, 30]);
        fs::write(dir.path().join("notes.txt"), "not a frame").expect("write");

        let mut src = ImageDirSource::open(dir.path()).expect("open");
        assert_eq!(src.remaining(), 2);
        let first = src.next_frame().expect("a");
        assert_eq!(first.pixel(0, 0), [10, 20, 30]);
        assert_eq!(first.size(), ImageSize::new(4, 3));
        assert_eq!(src.next_frame().expect("b").pixel(3, 2), [0, 200, 0]);
        assert_eq!(src.next_frame(), Err(AcquisitionError::EndOfStream));
    }

    #[test]
    fn corrupt_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("0.png"), b"garbage").expect("write");
        write_png(&dir.path().join("1.png"), 2, 2, [1, 2, 3]);

        let mut src = ImageDirSource::open(dir.path()).expect("open");
        assert!(matches!(src.next_frame(), Err(AcquisitionError::Read(_))));
        assert!(src.next_frame().is_ok());
    }

    #[test]
    fn wrong_size_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_png(&dir.path().join("0.png"), 8, 6, [0, 0, 0]);
        let mut src = ImageDirSource::open(dir.path())
            .expect("open")
            .with_expected_size(ImageSize::new(640, 480));
        let err = src.next_frame().unwrap_err();
        assert!(err.to_string().contains("expected 640x480"), "{err}");
    }

    #[test]
    fn missing_directory_names_path() {
        let err = ImageDirSource::open("/definitely/not/here").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn overlay_sink_writes_png() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("overlay.png");
        let mut sink = OverlayFileSink::new(&path);
        sink.put_frame(&ColorImage::filled(5, 4, [255, 255, 0]));
        assert_eq!(sink.written(), 1);
        let back = load_frame(&path).expect("load");
        assert_eq!(back.pixel(4, 3), [255, 255, 0]);
    }

    #[test]
    fn gray_preview_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gray.png");
        let mut img = GrayImage::new(3, 2);
        img.data[4] = 77;
        save_gray(&img, &path).expect("save");
        let back = image::open(&path).expect("open").to_luma8();
        assert_eq!(back.get_pixel(1, 1).0, [77]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let img = ColorImage {
            width: 4,
            height: 4,
            data: vec![0; 5],
        };
        assert!(matches!(rgb_from_color(&img), Err(FrameError::Dimensions { .. })));
    }
}
