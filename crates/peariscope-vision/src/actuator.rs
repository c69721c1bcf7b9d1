//! Ring-light control, applied only when the requested color changes.

use std::process::{Command, ExitStatus};

use serde::{Deserialize, Serialize};

use crate::params::LedColor;

#[derive(thiserror::Error, Debug)]
pub enum ActuatorError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Status { command: String, status: ExitStatus },
}

/// Opaque "set illumination color" call.
pub trait Illuminator {
    fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError>;
}

impl<I: Illuminator + ?Sized> Illuminator for Box<I> {
    fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError> {
        (**self).set_color(color)
    }
}

/// Color to apply, or `None` when `desired` is already in effect.
pub fn reconcile(desired: LedColor, last_applied: Option<LedColor>) -> Option<LedColor> {
    (last_applied != Some(desired)).then_some(desired)
}

/// Edge-triggered wrapper around an [`Illuminator`].
#[derive(Debug)]
pub struct ActuatorController<I> {
    illuminator: I,
    last_applied: Option<LedColor>,
}

impl<I: Illuminator> ActuatorController<I> {
    pub fn new(illuminator: I) -> Self {
        Self {
            illuminator,
            last_applied: None,
        }
    }

    /// Push `desired` to the illuminator if it differs from the last color
    /// sent. Returns the color that was sent, if any.
    ///
    /// A failed call still counts as applied; it is retried only once the
    /// requested color changes again.
    pub fn update(&mut self, desired: LedColor) -> Option<LedColor> {
        let color = reconcile(desired, self.last_applied)?;
        log::info!(
            "setting ring light to {} {} {}",
            color.red,
            color.green,
            color.blue
        );
        if let Err(e) = self.illuminator.set_color(color) {
            log::warn!("ring light update failed: {e}");
        }
        self.last_applied = Some(color);
        Some(color)
    }

    pub fn last_applied(&self) -> Option<LedColor> {
        self.last_applied
    }

    pub fn illuminator(&self) -> &I {
        &self.illuminator
    }
}

/// Runs an external program with the three components appended as
/// arguments, e.g. `ringlight_on 0 255 0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandIlluminator {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandIlluminator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn describe(&self, color: LedColor) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.extend([color.red, color.green, color.blue].map(|c| c.to_string()));
        parts.join(" ")
    }
}

impl Illuminator for CommandIlluminator {
    fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(color.red.to_string())
            .arg(color.green.to_string())
            .arg(color.blue.to_string())
            .status()
            .map_err(|source| ActuatorError::Spawn {
                command: self.describe(color),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ActuatorError::Status {
                command: self.describe(color),
                status,
            })
        }
    }
}

/// Logs the request and does nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullIlluminator;

impl Illuminator for NullIlluminator {
    fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError> {
        log::debug!("no illuminator attached, ignoring {color:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Vec<LedColor>,
        fail: bool,
    }

    impl Illuminator for Recording {
        fn set_color(&mut self, color: LedColor) -> Result<(), ActuatorError> {
            self.calls.push(color);
            if self.fail {
                return Err(ActuatorError::Spawn {
                    command: "ringlight".into(),
                    source: std::io::Error::other("no such device"),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn reconcile_is_edge_triggered() {
        let green = LedColor::new(0, 255, 0);
        assert_eq!(reconcile(green, None), Some(green));
        assert_eq!(reconcile(green, Some(green)), None);
        assert_eq!(
            reconcile(LedColor::new(0, 255, 1), Some(green)),
            Some(LedColor::new(0, 255, 1))
        );
    }

    #[test]
    fn same_color_twice_calls_once() {
        let mut ctl = ActuatorController::new(Recording::default());
        let green = LedColor::new(0, 255, 0);
        assert_eq!(ctl.update(green), Some(green));
        assert_eq!(ctl.update(green), None);
        assert_eq!(ctl.illuminator().calls.len(), 1);

        ctl.update(LedColor::new(0, 254, 0));
        assert_eq!(ctl.illuminator().calls.len(), 2);
    }

    #[test]
    fn failed_call_is_not_retried_for_same_color() {
        let mut ctl = ActuatorController::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let red = LedColor::new(255, 0, 0);
        ctl.update(red);
        ctl.update(red);
        assert_eq!(ctl.illuminator().calls, vec![red]);
        assert_eq!(ctl.last_applied(), Some(red));
    }

    #[cfg(unix)]
    #[test]
    fn command_illuminator_reports_exit_status() {
        let color = LedColor::default();
        assert!(CommandIlluminator::new("true").set_color(color).is_ok());
        assert!(matches!(
            CommandIlluminator::new("false").set_color(color),
            Err(ActuatorError::Status { .. })
        ));
        let err = CommandIlluminator::new("/nonexistent/ringlight_on")
            .set_color(color)
            .unwrap_err();
        assert!(err.to_string().contains("ringlight_on 0 255 0"), "{err}");
    }
}
