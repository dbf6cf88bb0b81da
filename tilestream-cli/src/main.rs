//! Tilestream command-line tool.
//!
//! `tilestream prewarm` pulls a rectangle of tiles at one zoom level through
//! the full acquisition pipeline (network fetch, disk write-back, decode)
//! so a later interactive session starts with a warm disk cache. Decoded
//! pixels are drained and dropped; no GPU is involved.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilestream::app::{bootstrap, Config};
use tilestream::cache::TileStatus;
use tilestream::coord::{tiles_across, TileKey};

#[derive(Parser)]
#[command(name = "tilestream", about = "Slippy-map tile pipeline tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a rectangle of tiles into the disk cache.
    Prewarm(PrewarmArgs),
}

#[derive(Args)]
struct PrewarmArgs {
    /// Root directory of the tile cache.
    #[arg(long)]
    cache_dir: PathBuf,

    /// Zoom level to prewarm.
    #[arg(long)]
    zoom: u8,

    /// First column of the rectangle.
    #[arg(long, default_value_t = 0)]
    min_col: u32,

    /// Last column of the rectangle (inclusive).
    #[arg(long)]
    max_col: u32,

    /// First row of the rectangle.
    #[arg(long, default_value_t = 0)]
    min_row: u32,

    /// Last row of the rectangle (inclusive).
    #[arg(long)]
    max_row: u32,

    /// Number of download workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Tile-server URL template ({z}/{x}/{y}, optional {s}).
    #[arg(long)]
    url_template: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

/// Keys of the requested rectangle, clamped to the pyramid bounds.
fn tile_rectangle(
    zoom: u8,
    columns: RangeInclusive<u32>,
    rows: RangeInclusive<u32>,
) -> Vec<TileKey> {
    let across = tiles_across(zoom);
    let mut keys = Vec::new();
    for column in columns.clone() {
        if column >= across {
            break;
        }
        for row in rows.clone() {
            if row >= across {
                break;
            }
            keys.push(TileKey::new(zoom, column, row));
        }
    }
    keys
}

fn prewarm(args: PrewarmArgs) -> ExitCode {
    let keys = tile_rectangle(
        args.zoom,
        args.min_col..=args.max_col,
        args.min_row..=args.max_row,
    );
    if keys.is_empty() {
        warn!(zoom = args.zoom, "requested rectangle contains no tiles");
        return ExitCode::FAILURE;
    }

    let mut config = Config::new(args.cache_dir)
        .with_worker_count(args.workers)
        .with_request_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(template) = args.url_template {
        config = config.with_url_template(template);
    }

    let pipeline = match bootstrap(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            warn!(error = %e, "failed to start pipeline");
            return ExitCode::FAILURE;
        }
    };

    info!(tiles = keys.len(), zoom = args.zoom, "prewarm started");
    for &key in &keys {
        pipeline.pool.submit(key);
    }

    let cache = pipeline.pool.cache();
    let mut pending = keys.clone();
    while !pending.is_empty() {
        // Drop decoded pixels as they arrive; prewarm only wants the
        // disk-cache side effect.
        for _ in pipeline.uploads.drain() {}
        pending.retain(|&key| {
            !matches!(
                cache.status(key),
                TileStatus::Ready | TileStatus::Failed
            )
        });
        thread::sleep(Duration::from_millis(50));
    }

    let failed: Vec<TileKey> = keys
        .iter()
        .copied()
        .filter(|&key| cache.status(key) == TileStatus::Failed)
        .collect();
    for &key in &failed {
        warn!(
            %key,
            error = %cache.last_error(key).unwrap_or_default(),
            "tile failed"
        );
    }
    info!(
        ready = keys.len() - failed.len(),
        failed = failed.len(),
        "prewarm finished"
    );

    pipeline.pool.shutdown(config.shutdown_grace);
    if failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Prewarm(args) => prewarm(args),
    }
}
