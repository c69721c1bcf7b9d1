//! The per-frame pipeline and the poll loop around it.

use std::time::{Duration, Instant};

use nalgebra::Point2;
use peariscope_core::{
    AcquisitionError, CalibrationProfile, ColorImage, FrameSink, FrameSource,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::actuator::{ActuatorController, Illuminator};
use crate::contour::CandidateExtractor;
use crate::filter::CandidateFilter;
use crate::overlay;
use crate::params::{DetectionParams, LedColor};
use crate::pose::{order_corners, PoseSolver, TargetGeometry, TargetPose};
use crate::publish::ResultPublisher;
use crate::segment::Segmenter;
use crate::store::ParameterStore;

/// An accepted candidate, valid for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding-box center in pixels.
    pub center: Point2<f64>,
    /// Corners ordered top-left, top-right, bottom-left, bottom-right when
    /// there are four of them.
    pub corners: Vec<Point2<f64>>,
    pub area: f64,
    pub fill_ratio: f64,
    pub pose: Option<TargetPose>,
}

/// Output of [`Pipeline::process`].
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub detections: Vec<Detection>,
    pub rejected: usize,
    /// Annotated copy of the frame when overlays are enabled.
    pub overlay: Option<ColorImage>,
}

/// Pose recovery settings; without them detections carry no pose.
pub struct PoseStage {
    pub solver: Box<dyn PoseSolver + Send>,
    pub target: TargetGeometry,
    pub calibration: CalibrationProfile,
}

/// Segment → extract → filter → (pose), with injected strategies.
pub struct Pipeline {
    pub segmenter: Box<dyn Segmenter + Send>,
    pub extractor: CandidateExtractor,
    pub filter: Box<dyn CandidateFilter + Send>,
    pub pose: Option<PoseStage>,
    pub draw_overlay: bool,
}

impl Pipeline {
    pub fn new(
        segmenter: impl Segmenter + Send + 'static,
        filter: impl CandidateFilter + Send + 'static,
    ) -> Self {
        Self {
            segmenter: Box::new(segmenter),
            extractor: CandidateExtractor::default(),
            filter: Box::new(filter),
            pose: None,
            draw_overlay: false,
        }
    }

    pub fn with_extractor(mut self, extractor: CandidateExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_pose(mut self, pose: PoseStage) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_overlay(mut self, enabled: bool) -> Self {
        self.draw_overlay = enabled;
        self
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(w = frame.width, h = frame.height))
    )]
    pub fn process(&self, frame: &ColorImage, params: &DetectionParams) -> FrameReport {
        let mask = self.segmenter.segment(&frame.view(), params);
        let mut canvas = self.draw_overlay.then(|| frame.clone());
        let mut report = FrameReport::default();

        for candidate in self.extractor.extract(&mask) {
            match self.filter.evaluate(&candidate, params) {
                Ok(()) => {
                    log::debug!(
                        "accepted: area {:.1} box {}x{} fill {:.3} ratio {:.2}",
                        candidate.area,
                        candidate.bbox.width,
                        candidate.bbox.height,
                        candidate.fill_ratio,
                        candidate.rect.aspect_ratio()
                    );
                    if let Some(img) = canvas.as_mut() {
                        overlay::draw_accepted(img, &candidate);
                    }
                    let corners = order_corners(&candidate.corners);
                    let pose = self.pose.as_ref().and_then(|stage| {
                        stage
                            .solver
                            .solve(&corners, &stage.target, &stage.calibration)
                    });
                    report.detections.push(Detection {
                        center: candidate.center(),
                        corners,
                        area: candidate.area,
                        fill_ratio: candidate.fill_ratio,
                        pose,
                    });
                }
                Err(reason) => {
                    log::debug!(
                        "rejected: {reason} (area {:.1} box {}x{})",
                        candidate.area,
                        candidate.bbox.width,
                        candidate.bbox.height
                    );
                    if let Some(img) = canvas.as_mut() {
                        overlay::draw_rejected(img, &candidate);
                    }
                    report.rejected += 1;
                }
            }
        }

        if let Some(img) = canvas.as_mut() {
            overlay::draw_crosshair(img, overlay::YELLOW);
        }
        report.overlay = canvas;
        report
    }
}

/// What one [`VisionLoop::iterate`] call did.
#[derive(Clone, Debug, PartialEq)]
pub enum IterationOutcome {
    Processed { detections: usize, elapsed: Duration },
    AcquisitionFailed(AcquisitionError),
    EndOfStream,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: usize,
    pub processed: usize,
    pub failures: usize,
}

/// Single-threaded poll loop: read parameters, reconcile the light, grab a
/// frame, run the pipeline, publish.
pub struct VisionLoop<S, F, K, I> {
    pub pipeline: Pipeline,
    pub store: S,
    pub source: F,
    pub sink: K,
    pub actuator: ActuatorController<I>,
    pub publisher: ResultPublisher,
    pub defaults: DetectionParams,
    pub default_led: LedColor,
}

impl<S, F, K, I> VisionLoop<S, F, K, I>
where
    S: ParameterStore,
    F: FrameSource,
    K: FrameSink,
    I: Illuminator,
{
    pub fn new(pipeline: Pipeline, store: S, source: F, sink: K, illuminator: I) -> Self {
        Self {
            pipeline,
            store,
            source,
            sink,
            actuator: ActuatorController::new(illuminator),
            publisher: ResultPublisher,
            defaults: DetectionParams::default(),
            default_led: LedColor::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: DetectionParams, default_led: LedColor) -> Self {
        self.defaults = defaults;
        self.default_led = default_led;
        self
    }

    /// Write the default parameters and light color into the store.
    pub fn publish_defaults(&self) {
        self.defaults.publish(&self.store);
        self.default_led.publish(&self.store);
    }

    /// One iteration. Parameters are read once up front and held for the
    /// whole frame. A failed acquisition publishes nothing.
    pub fn iterate(&mut self) -> IterationOutcome {
        let started = Instant::now();
        let params = DetectionParams::from_store(&self.store, &self.defaults);
        let led = LedColor::from_store(&self.store, &self.default_led);
        self.actuator.update(led);

        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(AcquisitionError::EndOfStream) => return IterationOutcome::EndOfStream,
            Err(e) => {
                log::warn!("{e}");
                self.sink.notify_error(&e);
                return IterationOutcome::AcquisitionFailed(e);
            }
        };

        let report = self.pipeline.process(&frame, &params);
        if let Some(img) = &report.overlay {
            self.sink.put_frame(img);
        }
        let elapsed = started.elapsed();
        self.publisher
            .publish(&self.store, frame.size(), &report.detections, elapsed);

        IterationOutcome::Processed {
            detections: report.detections.len(),
            elapsed,
        }
    }

    /// Iterate until the source ends or `limit` iterations have run.
    pub fn run(&mut self, limit: Option<usize>) -> LoopSummary {
        let mut summary = LoopSummary::default();
        while limit.is_none_or(|n| summary.iterations < n) {
            let outcome = self.iterate();
            if outcome == IterationOutcome::EndOfStream {
                log::info!("frame source exhausted after {} frames", summary.processed);
                break;
            }
            summary.iterations += 1;
            match outcome {
                IterationOutcome::Processed { .. } => summary.processed += 1,
                _ => summary.failures += 1,
            }
        }
        summary
    }
}
