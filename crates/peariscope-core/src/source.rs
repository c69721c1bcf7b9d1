//! Frame acquisition and streaming seams.

use crate::ColorImage;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The camera or file failed to deliver a frame; the caller may retry.
    #[error("frame acquisition failed: {0}")]
    Read(String),
    /// A finite source has no more frames.
    #[error("frame source exhausted")]
    EndOfStream,
}

/// Blocking source of RGB frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<ColorImage, AcquisitionError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<ColorImage, AcquisitionError> {
        (**self).next_frame()
    }
}

/// Destination for processed (debug) frames.
pub trait FrameSink {
    fn put_frame(&mut self, frame: &ColorImage);

    /// Report an acquisition failure to whoever is watching the stream.
    fn notify_error(&mut self, error: &AcquisitionError);
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn put_frame(&mut self, frame: &ColorImage) {
        (**self).put_frame(frame)
    }

    fn notify_error(&mut self, error: &AcquisitionError) {
        (**self).notify_error(error)
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn put_frame(&mut self, _frame: &ColorImage) {}

    fn notify_error(&mut self, error: &AcquisitionError) {
        log::debug!("dropped acquisition error: {error}");
    }
}

/// In-memory source replaying a fixed list of results, mostly for tests and
/// offline replays.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: std::collections::VecDeque<Result<ColorImage, AcquisitionError>>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = Result<ColorImage, AcquisitionError>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = ColorImage>) -> Self {
        Self::new(frames.into_iter().map(Ok))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<ColorImage, AcquisitionError> {
        self.frames
            .pop_front()
            .unwrap_or(Err(AcquisitionError::EndOfStream))
    }
}
