//! Process-wide logging setup for the binaries.
//!
//! Both binaries take a `--log-level` spec such as `info` or
//! `warn,peariscope_vision=debug`: a default level followed by per-crate
//! overrides. `PEARISCOPE_LOG`, when set, replaces the command-line spec.
//! Lines go to stderr as `[elapsed LEVEL crate/module] message`, where the
//! `peariscope_` prefix is dropped from the crate name.
//!
//! With the `tracing` feature, `init_tracing` installs a `tracing-subscriber`
//! filtered by the same spec and forwards `log` records into it.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that overrides `--log-level`.
pub const LOG_ENV: &str = "PEARISCOPE_LOG";

/// A default level plus per-target overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSpec {
    pub default: LevelFilter,
    /// `(target prefix, level)`, longest prefix wins.
    pub targets: Vec<(String, LevelFilter)>,
}

impl LogSpec {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            targets: Vec::new(),
        }
    }

    /// Parse `level[,target=level]*`. A bare level may appear anywhere.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut out = Self::new(LevelFilter::Info);
        let mut saw_default = false;
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                Some((target, level)) => {
                    let target = target.trim();
                    if target.is_empty() {
                        return None;
                    }
                    out.targets.push((target.to_owned(), parse_level(level)?));
                }
                None => {
                    out.default = parse_level(part)?;
                    saw_default = true;
                }
            }
        }
        if !saw_default && out.targets.is_empty() {
            return None;
        }
        out.targets.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Some(out)
    }

    /// `PEARISCOPE_LOG` if set and valid, otherwise `cli`.
    pub fn from_env_or(cli: &str) -> Option<Self> {
        match std::env::var(LOG_ENV) {
            Ok(env) => match Self::parse(&env) {
                Some(spec) => Some(spec),
                None => {
                    eprintln!("ignoring malformed {LOG_ENV}=`{env}`");
                    Self::parse(cli)
                }
            },
            Err(_) => Self::parse(cli),
        }
    }

    /// Level that applies to records from `target`.
    pub fn level_for(&self, target: &str) -> LevelFilter {
        self.targets
            .iter()
            .find(|(prefix, _)| {
                target == prefix
                    || target
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            })
            .map_or(self.default, |(_, level)| *level)
    }

    /// Most verbose level any target can reach.
    pub fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|(_, l)| *l)
            .fold(self.default, Ord::max)
    }

    /// Same spec in `EnvFilter` directive syntax.
    pub fn directives(&self) -> String {
        let mut parts = vec![self.default.to_string().to_ascii_lowercase()];
        for (target, level) in self.targets.iter().rev() {
            parts.push(format!("{target}={}", level.to_string().to_ascii_lowercase()));
        }
        parts.join(",")
    }
}

/// `peariscope_vision::pipeline` -> `vision/pipeline`.
fn short_target(target: &str) -> String {
    let target = target.strip_prefix("peariscope_").unwrap_or(target);
    let mut segments = target.split("::");
    let krate = segments.next().unwrap_or_default();
    match segments.last() {
        Some(module) => format!("{krate}/{module}"),
        None => krate.to_owned(),
    }
}

struct StderrLogger {
    spec: LogSpec,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.spec.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{:8.3}s {:>5} {}] {}",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            short_target(record.target()),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Later calls are no-ops.
pub fn init_logging(spec: LogSpec) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let max = spec.max_level();
        let logger = LOGGER.get_or_init(|| StderrLogger {
            spec,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(max);
    }
    Ok(())
}

/// Parse a single level name (`off`, `error`, ..., `trace`).
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

/// Install a `tracing` subscriber filtered by `spec`.
///
/// `json` switches to one JSON object per event, which is what the robot's
/// log shipper expects.
#[cfg(feature = "tracing")]
pub fn init_tracing(spec: &LogSpec, json: bool) {
    let _ = tracing_log::LogTracer::init();
    let filter = EnvFilter::try_new(spec.directives()).unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}
