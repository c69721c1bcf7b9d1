//! Facade crate for the `peariscope-*` workspace.
//!
//! Re-exports the component crates and, with the `image` feature, adds
//! file-backed frame sources and sinks used by the two binaries:
//!
//! - `peariscope`: runs the target-tracking loop over a directory of frames
//!   and prints the resulting parameter table.
//! - `peariscope-calibrate`: interactive checkerboard calibration that writes
//!   a camera profile.
//!
//! ## Quickstart
//!
//! ```no_run
//! use peariscope::vision::{MemoryStore, VisionConfig};
//! use peariscope::core::NullSink;
//! use peariscope::frames::ImageDirSource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VisionConfig::load_json("vision.json")?;
//! let store = MemoryStore::new();
//! let source = ImageDirSource::open("camera0")?;
//! let mut vision = config.build_loop(store.clone(), source, NullSink)?;
//! let summary = vision.run(Some(100));
//! println!("{} frames, {}", summary.processed, store.to_json()?);
//! # Ok(())
//! # }
//! ```

pub use peariscope_calib as calib;
pub use peariscope_core as core;
pub use peariscope_vision as vision;

pub use peariscope_calib::{CalibrationSession, LmCalibrator, SessionConfig};
pub use peariscope_core::{CalibrationProfile, ColorImage, FrameSink, FrameSource};
pub use peariscope_vision::{Detection, MemoryStore, Pipeline, VisionConfig, VisionLoop};

#[cfg(feature = "image")]
pub mod frames;
