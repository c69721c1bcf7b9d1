//! peariscope: run the target-tracking loop over a directory of frames.

use std::path::PathBuf;

use clap::Parser;
use peariscope::core::{FrameSink, LogSpec, NullSink};
use peariscope::frames::{ImageDirSource, OverlayFileSink};
use peariscope::vision::{MemoryStore, VisionConfig};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "peariscope")]
#[command(about = "Detect retroreflective vision targets and publish their positions")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (JSON). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of captured frames, replayed in file-name order.
    #[arg(long)]
    frames: PathBuf,

    /// Stop after this many iterations.
    #[arg(long)]
    iterations: Option<usize>,

    /// Write the debug overlay of the latest frame to this image file.
    #[arg(long)]
    overlay: Option<PathBuf>,

    /// Print the parameter table as JSON when done.
    #[arg(long)]
    dump_store: bool,

    /// Level, optionally with per-crate overrides (`warn,peariscope_vision=debug`).
    /// `PEARISCOPE_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    let spec = LogSpec::from_env_or(&cli.log_level)
        .ok_or_else(|| format!("unknown log level `{}`", cli.log_level))?;
    #[cfg(feature = "tracing")]
    if cli.json_logs {
        peariscope::core::init_tracing(&spec, true);
        return Ok(());
    }
    peariscope::core::init_logging(spec)?;
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let loaded = match &cli.config {
        Some(path) => VisionConfig::load_json(path)?,
        None => VisionConfig::default(),
    };
    let config = VisionConfig {
        draw_overlay: loaded.draw_overlay || cli.overlay.is_some(),
        ..loaded
    };

    let store = MemoryStore::new();
    let source = ImageDirSource::open(&cli.frames)?;
    let sink: Box<dyn FrameSink> = match &cli.overlay {
        Some(path) => Box::new(OverlayFileSink::new(path)),
        None => Box::new(NullSink),
    };

    let mut vision = config.build_loop(store.clone(), source, sink)?;
    let summary = vision.run(cli.iterations);
    log::info!(
        "{} iterations, {} frames processed, {} acquisition failures",
        summary.iterations,
        summary.processed,
        summary.failures
    );

    if cli.dump_store {
        println!("{}", store.to_json()?);
    }
    Ok(())
}
