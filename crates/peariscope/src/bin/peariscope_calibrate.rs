//! peariscope-calibrate: interactive checkerboard calibration.
//!
//! Frames are read from a directory of captures for the chosen camera. Each
//! detected board is offered for review on stdin (`y` accept, `n` reject,
//! `q` finish); no answer within the timeout finishes collection.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use peariscope::calib::{
    AcceptAll, BoardSpec, CalibrationSession, LmCalibrator, Observation, Operator,
    OperatorEvent, PatternSize, SessionConfig,
};
use peariscope::core::{
    rgb_to_gray, undistort_gray, AcquisitionError, ColorImage, FrameSource, ImageSize, LogSpec,
};
use peariscope::frames::{save_gray, ImageDirSource};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "peariscope-calibrate")]
#[command(about = "Calibrate a camera from checkerboard views and write its profile")]
#[command(version)]
struct Cli {
    /// Capture resolution; frames of any other size are skipped.
    #[arg(long, num_args = 2, value_names = ["W", "H"], required = true)]
    resolution: Vec<u32>,

    /// Camera index.
    #[arg(long, default_value_t = 0)]
    camera: u32,

    /// Checkerboard square size in meters.
    #[arg(long, default_value_t = 0.0254)]
    gridsize: f64,

    /// Where to write the camera profile (JSON).
    #[arg(long)]
    output: PathBuf,

    /// Directory of captured frames. Defaults to `camera<N>`.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Inner corners per row and per column.
    #[arg(long, num_args = 2, value_names = ["C", "R"], default_values_t = [7, 6])]
    pattern: Vec<usize>,

    /// Accept every detection without asking.
    #[arg(long)]
    accept_all: bool,

    /// Seconds to wait for a review answer before finishing collection.
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Write an undistorted gray preview of the last frame here.
    #[arg(long)]
    undistorted: Option<PathBuf>,

    /// Level, optionally with per-crate overrides (`warn,peariscope_calib=debug`).
    /// `PEARISCOPE_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Reads verdicts from stdin on a background thread.
struct StdinOperator {
    lines: Receiver<String>,
}

impl StdinOperator {
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }
}

impl Operator for StdinOperator {
    fn review(&mut self, obs: &Observation<'_>, timeout: Duration) -> Option<OperatorEvent> {
        let deadline = std::time::Instant::now() + timeout;
        eprint!(
            "frame {}: board found ({} samples so far). keep it? [y/n/q] ",
            obs.frame_index, obs.accepted
        );
        let _ = std::io::stderr().flush();
        loop {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            let line = match self.lines.recv_timeout(left) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            };
            match line.trim().to_ascii_lowercase().as_str() {
                "" | "y" | "yes" => return Some(OperatorEvent::Accept),
                "n" | "no" => return Some(OperatorEvent::Reject),
                "q" | "quit" => return Some(OperatorEvent::Stop),
                other => eprint!("`{other}`? answer y, n or q: "),
            }
        }
    }
}

/// Keeps a copy of the most recent frame.
struct KeepLast<S> {
    inner: S,
    last: Option<ColorImage>,
}

impl<S: FrameSource> FrameSource for KeepLast<S> {
    fn next_frame(&mut self) -> Result<ColorImage, AcquisitionError> {
        let frame = self.inner.next_frame()?;
        self.last = Some(frame.clone());
        Ok(frame)
    }
}

fn pair<T: Copy>(values: &[T], name: &str) -> CliResult<(T, T)> {
    match values {
        [a, b] => Ok((*a, *b)),
        _ => Err(format!("--{name} takes exactly two values").into()),
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    let spec = LogSpec::from_env_or(&cli.log_level)
        .ok_or_else(|| format!("unknown log level `{}`", cli.log_level))?;
    peariscope::core::init_logging(spec)?;

    let (width, height) = pair(&cli.resolution, "resolution")?;
    let (cols, rows) = pair(&cli.pattern, "pattern")?;
    let board = BoardSpec {
        pattern: PatternSize::new(cols, rows),
        square_size: cli.gridsize,
    };
    let config = SessionConfig {
        review_timeout: Duration::from_secs(cli.timeout_secs),
        ..SessionConfig::new(board)
    };
    let mut session = CalibrationSession::new(config)?;

    let dir = cli
        .frames
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("camera{}", cli.camera)));
    let mut source = KeepLast {
        inner: ImageDirSource::open(&dir)?.with_expected_size(ImageSize::new(width, height)),
        last: None,
    };
    log::info!(
        "calibrating camera {} at {width}x{height} with a {cols}x{rows} board of {} m squares",
        cli.camera,
        cli.gridsize
    );

    let accepted = if cli.accept_all {
        session.collect(&mut source, &mut AcceptAll)?
    } else {
        session.collect(&mut source, &mut StdinOperator::spawn())?
    };
    log::info!("{accepted} samples accepted");

    let result = session.compute(&LmCalibrator::default())?;
    let p = &result.profile;
    println!("mean reprojection error: {:.4} px", result.mean_reprojection_error);
    println!("rms reprojection error: {:.4} px", result.rms_error);
    println!(
        "fx {:.3} fy {:.3} cx {:.3} cy {:.3} dist {:?}",
        p.fx(),
        p.fy(),
        p.cx(),
        p.cy(),
        p.distortion()
    );
    let profile = p.clone();
    session.save(&cli.output)?;

    if let (Some(path), Some(last)) = (&cli.undistorted, &source.last) {
        let gray = rgb_to_gray(&last.view());
        save_gray(&undistort_gray(&gray.view(), &profile), path)?;
        log::info!("undistorted preview written to {}", path.display());
    }
    Ok(())
}
