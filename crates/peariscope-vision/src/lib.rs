//! Retroreflective target detection.
//!
//! A frame is segmented by color range ([`Segmenter`]), external regions are
//! traced into [`Candidate`]s, a [`CandidateFilter`] keeps target-shaped
//! outlines and an optional [`PoseSolver`] recovers the target pose from the
//! four corners. Thresholds are read from a [`ParameterStore`] once per frame
//! and results are written back by [`ResultPublisher`]. [`VisionLoop`] ties
//! it together with a frame source, a sink and the ring-light actuator.

mod actuator;
mod config;
mod contour;
mod filter;
mod geometry;
pub mod overlay;
mod params;
mod pipeline;
mod pose;
mod publish;
mod segment;
mod store;

pub use actuator::{
    reconcile, ActuatorController, ActuatorError, CommandIlluminator, Illuminator,
    NullIlluminator,
};
pub use config::{ConfigError, SegmenterKind, VisionConfig};
pub use contour::{BoundingBox, Candidate, CandidateExtractor, Candidates};
pub use filter::{CandidateFilter, GeometricFilter, Rejection};
pub use geometry::{
    approx_polygon, convex_hull, min_area_rect, polygon_area, RotatedRect,
};
pub use params::{keys, Bounds, DetectionParams, FilterConventions, LedColor};
pub use pipeline::{
    Detection, FrameReport, IterationOutcome, LoopSummary, Pipeline, PoseStage, VisionLoop,
};
pub use pose::{order_corners, PlanarPnpSolver, PoseSolver, TargetGeometry, TargetPose};
pub use publish::{frames_per_second, percent_from_center, ResultPublisher};
pub use segment::{rgb_to_hsv, HsvSegmenter, Morphology, Segmenter, ValueSegmenter};
pub use store::{ListenerId, MemoryStore, ParameterStore, Value};
