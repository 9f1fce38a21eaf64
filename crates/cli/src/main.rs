use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use engine::{
    capability::EncoderCapabilities,
    config::{OutputFormat, OutputMode, Settings},
    job::JobStatus,
    orchestrator::OrchestratorHandle,
    runner::FfmpegRunner,
    AllowAll,
};
use humansize::{format_size, DECIMAL};
use log::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// File extensions picked up when scanning a directory
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "mov", "m4v", "avi", "webm", "wmv", "flv", "mpg", "mpeg", "ts",
];

/// Batch video compressor built on ffmpeg
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files or directories to compress (directories are scanned recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to settings file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output container: mp4, webm, mkv or gif
    #[arg(short, long)]
    format: Option<String>,

    /// Compression level, 1 (best quality) to 10 (smallest file)
    #[arg(short, long)]
    level: Option<u8>,

    /// Max concurrently running encodes
    #[arg(short, long)]
    parallel: Option<usize>,

    /// Bias speed over quality: hardware encoders, tiling, all cores
    #[arg(long)]
    turbo: bool,

    /// Use the AV1 codec family instead of the default VP9
    #[arg(long)]
    av1: bool,

    /// Write outputs into this directory instead of next to the sources
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Strip the audio track
    #[arg(long)]
    no_audio: bool,

    /// Stabilize shaky footage with the deshake filter
    #[arg(long)]
    deshake: bool,

    /// Overlay watermark text in the bottom-right corner; bare `--watermark`
    /// uses the default text, `--watermark=TEXT` overrides it
    #[arg(
        long,
        value_name = "TEXT",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    watermark: Option<String>,

    /// Save a thumbnail frame next to each output
    #[arg(long)]
    thumbnail: bool,

    /// Move originals into a .trash directory after a successful encode
    #[arg(long)]
    trash_originals: bool,

    /// Print the final job list as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Default to info so progress lines are visible; RUST_LOG overrides
    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_timestamp_secs()
        .parse_default_env()
        .init();

    let mut settings = Settings::load(args.config.as_deref())
        .context("Failed to load settings")?;
    apply_overrides(&mut settings, &args)?;

    let files = collect_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("no video files found in the given inputs");
    }
    info!("found {} video file(s)", files.len());

    // the VP9 path never consults capabilities, so skip the probe entirely
    let caps = if settings.use_high_efficiency_codec {
        engine::capability::detect(&settings.ffmpeg_bin)
            .await
            .context("Failed to query ffmpeg for AV1 encoders")?
    } else {
        EncoderCapabilities::software_only()
    };

    let handle = OrchestratorHandle::spawn(
        settings,
        caps,
        Box::new(FfmpegRunner),
        Box::new(AllowAll),
    );

    for file in files {
        handle
            .submit(file.clone())
            .await
            .with_context(|| format!("Failed to queue {}", file.display()))?;
    }
    handle.start().await.context("Failed to start the batch")?;

    watch_batch(&handle, args.json).await
}

/// Poll the batch until it finishes, echoing per-file and aggregate progress.
/// Ctrl-C stops every running encode and leaves completed outputs in place.
async fn watch_batch(handle: &OrchestratorHandle, json: bool) -> Result<()> {
    let mut last_lines: HashMap<Uuid, String> = HashMap::new();
    loop {
        let snapshot = handle.snapshot().await.context("engine went away")?;

        for job in &snapshot.jobs {
            let line = match job.status {
                JobStatus::Queued => format!("{}: waiting", job.name),
                // bucket to 10% steps to keep the log readable
                JobStatus::Processing => {
                    format!("{}: {}%", job.name, (job.progress as u32 / 10) * 10)
                }
                JobStatus::Completed => format!(
                    "{}: done ({} -> {})",
                    job.name,
                    format_size(job.original_size, DECIMAL),
                    format_size(job.output_size.unwrap_or(0), DECIMAL)
                ),
                JobStatus::Error => format!(
                    "{}: failed ({})",
                    job.name,
                    job.reason.as_deref().unwrap_or("unknown error")
                ),
                JobStatus::Stopped => format!("{}: stopped", job.name),
            };
            if last_lines.get(&job.id) != Some(&line) {
                info!("{line}  [overall {:.0}%]", snapshot.aggregate_progress);
                last_lines.insert(job.id, line);
            }
        }

        if !snapshot.batch_active {
            return summarize(&snapshot.jobs, json);
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, stopping all encodes");
                handle.stop_all().await.context("engine went away")?;
                let snapshot = handle.snapshot().await.context("engine went away")?;
                return summarize(&snapshot.jobs, json);
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
}

fn summarize(jobs: &[engine::Job], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(jobs).context("Failed to serialize job list")?
        );
    }

    let completed = jobs.iter().filter(|j| j.status == JobStatus::Completed).count();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Error).count();
    let skipped = jobs.len() - completed - failed;

    let original: u64 = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .map(|j| j.original_size)
        .sum();
    let output: u64 = jobs
        .iter()
        .filter_map(|j| j.output_size)
        .sum();

    info!(
        "{} completed, {} failed, {} not processed",
        completed, failed, skipped
    );
    if completed > 0 {
        info!(
            "total: {} -> {} ({})",
            format_size(original, DECIMAL),
            format_size(output, DECIMAL),
            if original > 0 {
                format!("{:.0}% of original", output as f64 / original as f64 * 100.0)
            } else {
                "size unknown".to_string()
            }
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} file(s) failed");
    }
    Ok(())
}

fn apply_overrides(settings: &mut Settings, args: &Args) -> Result<()> {
    if let Some(format) = args.format.as_deref() {
        settings.format = parse_format(format)?;
    }
    if let Some(level) = args.level {
        anyhow::ensure!(
            (1..=10).contains(&level),
            "compression level must be between 1 and 10, got {level}"
        );
        settings.compression_level = level;
    }
    if let Some(parallel) = args.parallel {
        settings.parallel_limit = parallel.max(1);
    }
    if args.turbo {
        settings.enable_turbo = true;
    }
    if args.av1 {
        settings.use_high_efficiency_codec = true;
    }
    if let Some(dir) = &args.output_dir {
        settings.output_mode = OutputMode::Custom(dir.clone());
    }
    if args.no_audio {
        settings.remove_audio = true;
    }
    if args.deshake {
        settings.enable_deshake = true;
    }
    if let Some(text) = args.watermark.as_deref() {
        settings.enable_watermark = true;
        if !text.is_empty() {
            settings.watermark_text = Some(text.to_string());
        }
    }
    if args.thumbnail {
        settings.enable_thumbnail = true;
    }
    if args.trash_originals {
        settings.move_to_trash = true;
    }
    Ok(())
}

fn parse_format(s: &str) -> Result<OutputFormat> {
    match s.to_ascii_lowercase().as_str() {
        "mp4" => Ok(OutputFormat::Mp4),
        "webm" => Ok(OutputFormat::WebM),
        "mkv" => Ok(OutputFormat::Mkv),
        "gif" => Ok(OutputFormat::Gif),
        other => anyhow::bail!("unknown output format: {other} (expected mp4, webm, mkv or gif)"),
    }
}

/// Expand the given paths: files are taken as-is, directories are walked
/// recursively for known video extensions, sorted for a stable queue order.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
        } else if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            anyhow::bail!("input does not exist: {}", input.display());
        }
    }
    Ok(files)
}
