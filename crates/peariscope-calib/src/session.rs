//! Interactive calibration as an explicit state machine.
//!
//! ```text
//! Collecting --stop/timeout/end of stream--> Computing --solve--> Done
//! ```
//!
//! While collecting, every frame with a visible board is shown to an
//! [`Operator`] who accepts, rejects or stops. The wait for a verdict is
//! bounded; a timeout ends collection.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use nalgebra::Point2;
use peariscope_core::{rgb_to_gray, AcquisitionError, ColorImage, FrameSource, ImageSize};
use serde::{Deserialize, Serialize};

use crate::detect::CheckerboardDetector;
use crate::grid::BoardSpec;
use crate::optimize::{CalibrationResult, CameraSolver};
use crate::sample::CalibrationSample;
use crate::CalibrationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Collecting,
    Computing,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorEvent {
    Accept,
    Reject,
    Stop,
}

/// What the operator is shown for one detection.
#[derive(Clone, Copy, Debug)]
pub struct Observation<'a> {
    pub frame_index: usize,
    pub frame: &'a ColorImage,
    pub corners: &'a [Point2<f64>],
    /// Samples accepted so far.
    pub accepted: usize,
}

/// The human (or script) in the loop.
pub trait Operator {
    /// Wait at most `timeout` for a verdict; `None` means no answer came.
    fn review(&mut self, observation: &Observation<'_>, timeout: Duration)
        -> Option<OperatorEvent>;

    /// Polled between frames; `true` ends collection.
    fn stop_requested(&mut self) -> bool {
        false
    }
}

impl<O: Operator + ?Sized> Operator for &mut O {
    fn review(
        &mut self,
        observation: &Observation<'_>,
        timeout: Duration,
    ) -> Option<OperatorEvent> {
        (**self).review(observation, timeout)
    }

    fn stop_requested(&mut self) -> bool {
        (**self).stop_requested()
    }
}

/// Accepts every detection.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Operator for AcceptAll {
    fn review(&mut self, _: &Observation<'_>, _: Duration) -> Option<OperatorEvent> {
        Some(OperatorEvent::Accept)
    }
}

/// Replays fixed verdicts; an exhausted script behaves like a timeout.
#[derive(Clone, Debug, Default)]
pub struct ScriptedOperator {
    events: VecDeque<Option<OperatorEvent>>,
    reviews: usize,
}

impl ScriptedOperator {
    pub fn new(events: impl IntoIterator<Item = Option<OperatorEvent>>) -> Self {
        Self {
            events: events.into_iter().collect(),
            reviews: 0,
        }
    }

    pub fn reviews(&self) -> usize {
        self.reviews
    }
}

impl Operator for ScriptedOperator {
    fn review(&mut self, _: &Observation<'_>, _: Duration) -> Option<OperatorEvent> {
        self.reviews += 1;
        self.events.pop_front().flatten()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub board: BoardSpec,
    pub detector: CheckerboardDetector,
    /// At least one sample is always required.
    pub min_samples: usize,
    pub review_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let board = BoardSpec::default();
        Self {
            board,
            detector: CheckerboardDetector::new(board.pattern),
            min_samples: 1,
            review_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn new(board: BoardSpec) -> Self {
        Self {
            board,
            detector: CheckerboardDetector::new(board.pattern),
            ..Self::default()
        }
    }
}

/// Result of feeding one frame to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    NoBoard,
    Accepted,
    Rejected,
    /// The operator stopped or did not answer in time.
    Stopped,
    /// Size differs from the first frame; the frame is ignored.
    WrongSize,
}

#[derive(Debug)]
pub struct CalibrationSession {
    config: SessionConfig,
    state: SessionState,
    samples: Vec<CalibrationSample>,
    image_size: Option<ImageSize>,
    frames_seen: usize,
    result: Option<CalibrationResult>,
}

impl CalibrationSession {
    pub fn new(config: SessionConfig) -> Result<Self, CalibrationError> {
        let pattern = config.board.pattern;
        if pattern.cols < 2 || pattern.rows < 2 {
            return Err(CalibrationError::Configuration(format!(
                "pattern {}x{} needs at least 2x2 inner corners",
                pattern.cols, pattern.rows
            )));
        }
        if !(config.board.square_size.is_finite() && config.board.square_size > 0.0) {
            return Err(CalibrationError::Configuration(format!(
                "square size must be positive, got {}",
                config.board.square_size
            )));
        }
        if config.detector.pattern != pattern {
            return Err(CalibrationError::Configuration(
                "detector pattern differs from the board".into(),
            ));
        }
        Ok(Self {
            config,
            state: SessionState::Collecting,
            samples: Vec::new(),
            image_size: None,
            frames_seen: 0,
            result: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    fn expect_state(
        &self,
        wanted: SessionState,
        operation: &'static str,
    ) -> Result<(), CalibrationError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(CalibrationError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Look for the board and, if found, ask the operator about it.
    pub fn process_frame<O: Operator + ?Sized>(
        &mut self,
        frame: &ColorImage,
        operator: &mut O,
    ) -> Result<FrameOutcome, CalibrationError> {
        self.expect_state(SessionState::Collecting, "process_frame")?;
        let size = frame.size();
        match self.image_size {
            None => self.image_size = Some(size),
            Some(first) if first != size => {
                log::warn!(
                    "skipping {}x{} frame, session frames are {}x{}",
                    size.width,
                    size.height,
                    first.width,
                    first.height
                );
                return Ok(FrameOutcome::WrongSize);
            }
            Some(_) => {}
        }
        let frame_index = self.frames_seen;
        self.frames_seen += 1;

        let gray = rgb_to_gray(&frame.view());
        let Some(corners) = self.config.detector.detect(&gray.view()) else {
            log::trace!("frame {frame_index}: no checkerboard");
            return Ok(FrameOutcome::NoBoard);
        };

        let observation = Observation {
            frame_index,
            frame,
            corners: &corners,
            accepted: self.samples.len(),
        };
        match operator.review(&observation, self.config.review_timeout) {
            Some(OperatorEvent::Accept) => {
                self.samples.push(CalibrationSample {
                    object_points: self.config.board.object_points(),
                    image_points: corners,
                });
                log::info!(
                    "frame {frame_index}: sample accepted ({} total)",
                    self.samples.len()
                );
                Ok(FrameOutcome::Accepted)
            }
            Some(OperatorEvent::Reject) => {
                log::info!("frame {frame_index}: sample rejected");
                Ok(FrameOutcome::Rejected)
            }
            Some(OperatorEvent::Stop) => {
                self.stop_collecting()?;
                Ok(FrameOutcome::Stopped)
            }
            None => {
                log::warn!(
                    "no answer within {:?}, ending collection",
                    self.config.review_timeout
                );
                self.stop_collecting()?;
                Ok(FrameOutcome::Stopped)
            }
        }
    }

    /// Collecting → Computing.
    pub fn stop_collecting(&mut self) -> Result<(), CalibrationError> {
        self.expect_state(SessionState::Collecting, "stop_collecting")?;
        log::info!("collection finished with {} samples", self.samples.len());
        self.state = SessionState::Computing;
        Ok(())
    }

    /// Pull frames until the operator stops, the review times out or the
    /// source runs dry. Read failures are logged and skipped. Returns the
    /// number of accepted samples.
    pub fn collect<S, O>(&mut self, source: &mut S, operator: &mut O) -> Result<usize, CalibrationError>
    where
        S: FrameSource + ?Sized,
        O: Operator + ?Sized,
    {
        self.expect_state(SessionState::Collecting, "collect")?;
        while self.state == SessionState::Collecting {
            if operator.stop_requested() {
                self.stop_collecting()?;
                break;
            }
            match source.next_frame() {
                Ok(frame) => {
                    self.process_frame(&frame, operator)?;
                }
                Err(AcquisitionError::EndOfStream) => {
                    log::info!("frame source exhausted");
                    self.stop_collecting()?;
                }
                Err(e) => log::warn!("{e}"),
            }
        }
        Ok(self.samples.len())
    }

    /// Computing → Done. Fails without calling `solver` when fewer than
    /// `min_samples` (and never fewer than one) samples were accepted.
    pub fn compute<C: CameraSolver + ?Sized>(
        &mut self,
        solver: &C,
    ) -> Result<&CalibrationResult, CalibrationError> {
        self.expect_state(SessionState::Computing, "compute")?;
        let need = self.config.min_samples.max(1);
        let have = self.samples.len();
        if have < need {
            return Err(CalibrationError::DataInsufficient { have, need });
        }
        let size = self
            .image_size
            .ok_or_else(|| CalibrationError::Configuration("no frame was seen".into()))?;
        log::info!("computing calibration from {have} samples");
        let result = solver.calibrate(&self.samples, size)?;
        self.state = SessionState::Done;
        Ok(self.result.insert(result))
    }

    /// Write the profile. Only valid once computed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        self.expect_state(SessionState::Done, "save")?;
        let result = self.result.as_ref().ok_or(CalibrationError::InvalidState {
            operation: "save",
            state: self.state,
        })?;
        result.profile.save(path.as_ref())?;
        log::info!("saved camera profile to {}", path.as_ref().display());
        Ok(())
    }
}
