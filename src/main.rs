//! Gaze Event Agent CLI
//!
//! Replays recorded camera-frame measurements through the windowed
//! blink/fixation/saccade pipeline.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gaze_event_agent::{
    config::Config,
    ingest::FrameMessage,
    pipeline::{spawn_stream_with_stats, StreamCanceller, StreamSummary},
    sink::JsonlSink,
    stats::create_shared_stats_with_persistence,
    vision::{FrameMeasurements, ReplayBackend},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gaze-agent")]
#[command(version = VERSION)]
#[command(about = "Windowed blink, fixation and saccade classification for webcam frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded frames through one stream
    Run {
        /// JSON Lines file of frame messages
        #[arg(long, short)]
        input: PathBuf,

        /// Where to write gaze events (defaults to the export directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Override the classification half-window in milliseconds
        #[arg(long)]
        time_window_ms: Option<u64>,

        /// Reflect x coordinates (selfie-view camera)
        #[arg(long)]
        mirror: bool,

        /// Log every emitted event
        #[arg(long, short)]
        verbose: bool,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Persist a new classification half-window
    SetWindow {
        /// Half-window in milliseconds
        ms: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            time_window_ms,
            mirror,
            verbose,
        } => {
            init_tracing(verbose);
            cmd_run(&input, output, time_window_ms, mirror)
        }
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::SetWindow { ms } => cmd_set_window(ms),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("gaze_event_agent=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_run(
    input: &Path,
    output: Option<PathBuf>,
    time_window_ms: Option<u64>,
    mirror: bool,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(ms) = time_window_ms {
        config.pipeline.time_window = Duration::from_millis(ms);
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let output = output.unwrap_or_else(|| {
        config.export_path.join(format!(
            "session_{}.jsonl",
            Utc::now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    println!("Gaze Event Agent v{VERSION}");
    println!();
    println!("  Input: {}", input.display());
    println!("  Output: {}", output.display());
    println!(
        "  Time window: {}ms",
        config.pipeline.time_window.as_millis()
    );
    println!("  Mirror: {}", if mirror { "on" } else { "off" });
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let sink = JsonlSink::create(&output)
        .with_context(|| format!("opening {}", output.display()))?;
    let backend = if mirror {
        ReplayBackend::mirrored()
    } else {
        ReplayBackend::new()
    };

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    let summary = runtime.block_on(async {
        let handle = spawn_stream_with_stats(
            config.pipeline.clone(),
            Arc::new(backend),
            sink,
            Arc::clone(&stats),
        )?;

        let interrupted = Arc::new(AtomicBool::new(false));
        ctrlc_handler(handle.canceller(), Arc::clone(&interrupted));

        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("opening {}", input.display()))?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let message: FrameMessage<FrameMeasurements> = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(line = line_no, "skipping unreadable frame: {e}");
                    continue;
                }
            };
            if handle.push(message).await.is_err() {
                break;
            }
        }

        let summary = if interrupted.load(Ordering::SeqCst) {
            handle.cancel().await?
        } else {
            handle.finish().await?
        };
        anyhow::Ok(summary)
    })?;

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }

    print_summary(&summary);
    println!("Events written to {}", output.display());
    Ok(())
}

fn print_summary(summary: &StreamSummary) {
    println!();
    println!("Stream {}", if summary.cancelled { "cancelled" } else { "complete" });
    println!("  Frames accepted: {}", summary.frames_accepted);
    println!("  Frames rejected: {}", summary.frames_rejected);
    println!("  Events emitted: {}", summary.events_emitted);
    if summary.lost_payloads > 0 {
        println!("  Lost payloads: {}", summary.lost_payloads);
    }
    if summary.computation_errors > 0 {
        println!("  Computation errors: {}", summary.computation_errors);
    }
    if summary.sink_errors > 0 {
        println!("  Sink errors: {}", summary.sink_errors);
    }
    if summary.diagnostic_withheld > 0 {
        println!("  Diagnostic events withheld: {}", summary.diagnostic_withheld);
    }
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Gaze Event Agent Status");
    println!("=======================");
    println!();
    println!("Configuration:");
    println!(
        "  Time window: {}ms",
        config.pipeline.time_window.as_millis()
    );
    println!(
        "  Frame queue capacity: {}",
        config.pipeline.frame_queue_capacity
    );
    println!(
        "  Saccade threshold: {}",
        config.pipeline.gaze.saccade_velocity_threshold
    );
    println!("  Export path: {}", config.export_path.display());
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = create_shared_stats_with_persistence(stats_path);
        println!("Cumulative {}", stats.summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_set_window(ms: u64) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    config.pipeline.time_window = Duration::from_millis(ms);
    if let Err(e) = config.pipeline.validate() {
        bail!("{e}");
    }
    config.save().context("saving configuration")?;
    println!("Time window set to {ms}ms.");
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(canceller: StreamCanceller, interrupted: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
        canceller.cancel();
    });
    if let Err(e) = result {
        tracing::warn!("could not install Ctrl+C handler: {e}");
    }
}
