//! JSON configuration for the vision loop.

use std::{
    fs,
    path::{Path, PathBuf},
};

use peariscope_core::{CalibrationProfile, FrameSink, FrameSource, ProfileError};
use serde::{Deserialize, Serialize};

use crate::actuator::{CommandIlluminator, Illuminator, NullIlluminator};
use crate::contour::CandidateExtractor;
use crate::filter::GeometricFilter;
use crate::params::{DetectionParams, FilterConventions, LedColor};
use crate::pipeline::{Pipeline, PoseStage, VisionLoop};
use crate::pose::{PlanarPnpSolver, TargetGeometry};
use crate::segment::{HsvSegmenter, Morphology, Segmenter, ValueSegmenter};
use crate::store::ParameterStore;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmenterKind {
    #[default]
    Hsv,
    /// Brightness threshold only.
    Value,
}

/// Everything needed to assemble a [`VisionLoop`]. Built once at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Fallbacks for keys missing from the store.
    pub detection: DetectionParams,
    pub led: LedColor,
    pub segmenter: SegmenterKind,
    pub morphology: Morphology,
    pub extractor: CandidateExtractor,
    pub conventions: FilterConventions,
    pub require_quad: bool,
    pub target: TargetGeometry,
    /// Camera profile; without one no pose is computed.
    pub calibration_path: Option<PathBuf>,
    pub led_command: Option<CommandIlluminator>,
    /// Write `detection` and `led` into the store before the first frame.
    pub publish_defaults: bool,
    pub draw_overlay: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            detection: DetectionParams::default(),
            led: LedColor::default(),
            segmenter: SegmenterKind::Hsv,
            morphology: Morphology::default(),
            extractor: CandidateExtractor::default(),
            conventions: FilterConventions::default(),
            require_quad: true,
            target: TargetGeometry::default(),
            calibration_path: None,
            led_command: None,
            publish_defaults: true,
            draw_overlay: false,
        }
    }
}

impl VisionConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn segmenter(&self) -> Box<dyn Segmenter + Send> {
        match self.segmenter {
            SegmenterKind::Hsv => Box::new(HsvSegmenter {
                morphology: self.morphology,
            }),
            SegmenterKind::Value => Box::new(ValueSegmenter {
                morphology: self.morphology,
            }),
        }
    }

    pub fn filter(&self) -> GeometricFilter {
        GeometricFilter {
            conventions: self.conventions,
            require_quad: self.require_quad,
        }
    }

    /// Assemble the pipeline, loading the calibration profile if one is set.
    pub fn build_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let pose = match &self.calibration_path {
            Some(path) => {
                let calibration = CalibrationProfile::load(path)?;
                log::info!("loaded camera profile from {}", path.display());
                Some(PoseStage {
                    solver: Box::new(PlanarPnpSolver::default()),
                    target: self.target.clone(),
                    calibration,
                })
            }
            None => {
                log::info!("no camera profile configured, pose disabled");
                None
            }
        };
        Ok(Pipeline {
            segmenter: self.segmenter(),
            extractor: self.extractor,
            filter: Box::new(self.filter()),
            pose,
            draw_overlay: self.draw_overlay,
        })
    }

    pub fn illuminator(&self) -> Box<dyn Illuminator + Send> {
        match &self.led_command {
            Some(cmd) => Box::new(cmd.clone()),
            None => Box::new(NullIlluminator),
        }
    }

    /// Assemble the full loop and, if enabled, seed the store with defaults.
    pub fn build_loop<S, F, K>(
        &self,
        store: S,
        source: F,
        sink: K,
    ) -> Result<VisionLoop<S, F, K, Box<dyn Illuminator + Send>>, ConfigError>
    where
        S: ParameterStore,
        F: FrameSource,
        K: FrameSink,
    {
        let vl = VisionLoop::new(self.build_pipeline()?, store, source, sink, self.illuminator())
            .with_defaults(self.detection, self.led);
        if self.publish_defaults {
            vl.publish_defaults();
        }
        Ok(vl)
    }
}
