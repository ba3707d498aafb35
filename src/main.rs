//! hushcut - mute profanity in videos
//!
//! Entry point: parses the command line, sets up logging, and drives the
//! cleaning pipeline with a progress bar.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    filter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use hushcut::cli::{sibling_subtitles, Args, CleanOptions, Commands};
use hushcut::config::{Config, ProcessingConfig};
use hushcut::error::HushError;
use hushcut::lexicon::{Lexicon, Matcher};
use hushcut::media::{DIAG_TARGET, MediaProcessorFactory, ProgressSnapshot};
use hushcut::sidefile::load_skip_ranges;
use hushcut::workflow::{process_directory, Pipeline};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        match e.downcast_ref::<HushError>() {
            Some(hush) => {
                eprintln!("Error ({}): {}", hush.category(), hush);
                if let Some(output) = hush.tool_output() {
                    let tail: Vec<&str> = output.lines().rev().take(20).collect();
                    for line in tail.into_iter().rev() {
                        eprintln!("  {}", line);
                    }
                }
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    // Setup logging to both console and file
    setup_logging(args.verbose, &config)?;

    match args.command {
        Commands::Clean {
            input,
            subs,
            output,
            skip_ranges,
            json,
            options,
        } => {
            info!("Cleaning video file: {}", input.display());
            let matcher = load_matcher(&config, &options)?;
            check_tool(&config, &options)?;

            let mut processing = ProcessingConfig::for_input(&input, &config.processing);
            if let Some(output) = output {
                processing.output = output;
            }
            processing.subtitles = subs;
            options.apply(&mut processing);

            let skip_ranges = match skip_ranges {
                Some(path) => load_skip_ranges(&path).await?,
                None => Vec::new(),
            };

            let bar = progress_bar();
            let mut on_progress = |snapshot: ProgressSnapshot| update_bar(&bar, &snapshot);

            let mut pipeline = Pipeline::new(config.media.clone(), matcher);
            let result = pipeline.run(&processing, &skip_ranges, Some(&mut on_progress)).await;
            bar.finish_and_clear();
            let report = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Muted {} intervals ({:.1}s) from {} of {} cues",
                    report.intervals.len(),
                    report.muted_seconds,
                    report.matched_cues,
                    report.cues
                );
                if let Some(output) = &report.output {
                    println!("Output: {}", output.display());
                }
                if let Some(subs) = &report.cleaned_subtitles {
                    println!("Cleaned subtitles: {}", subs.display());
                }
                for side in &report.side_files {
                    println!("Wrote: {}", side.display());
                }
            }
        }
        Commands::Batch { input_dir, options } => {
            info!("Processing directory: {}", input_dir.display());
            let matcher = load_matcher(&config, &options)?;
            check_tool(&config, &options)?;

            let defaults = config.processing.clone();
            let results = process_directory(&input_dir, &config.media, matcher, |video: &Path| {
                let mut processing = ProcessingConfig::for_input(video, &defaults);
                processing.subtitles = sibling_subtitles(video);
                options.apply(&mut processing);
                processing
            })
            .await?;

            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            for (path, result) in &results {
                match result {
                    Ok(report) => {
                        println!("ok     {} ({} intervals)", path.display(), report.intervals.len())
                    }
                    Err(e) => println!("failed {} [{}] {}", path.display(), e.category(), e),
                }
            }
            println!("{} processed, {} failed", results.len(), failed);
            if failed > 0 {
                anyhow::bail!("{} of {} files failed", failed, results.len());
            }
        }
        Commands::Lexicon { path } => {
            let path = path.unwrap_or_else(|| config.lexicon.path.clone());
            let lexicon = Lexicon::from_file(&path)?;
            println!("{} terms in {}", lexicon.len(), path.display());
            println!("{:<24} {:<24}", "Term", "Replacement");
            println!("{}", "-".repeat(48));
            for entry in lexicon.iter() {
                println!("{:<24} {:<24}", entry.term, entry.replacement);
            }
        }
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to replace it)", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

fn load_matcher(config: &Config, options: &CleanOptions) -> Result<Arc<Matcher>> {
    let path: PathBuf = options.swears.clone().unwrap_or_else(|| config.lexicon.path.clone());
    let lexicon = Lexicon::from_file(&path)?;
    info!("Loaded {} lexicon terms from {}", lexicon.len(), path.display());
    if lexicon.is_empty() {
        warn!("Lexicon {} is empty; nothing will be muted", path.display());
    }
    Ok(Arc::new(Matcher::new(lexicon)?))
}

fn check_tool(config: &Config, options: &CleanOptions) -> Result<()> {
    if options.subs_only {
        return Ok(());
    }
    let runner = MediaProcessorFactory::create_runner(&config.media);
    runner.check_availability().map_err(|e| {
        error!("Media tool is not available: {}", e);
        e
    })?;
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

fn update_bar(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    if let Some(percent) = snapshot.smoothed_percent {
        bar.set_position(percent.round() as u64);
    }
    let mut msg = format!("{:.1}s", snapshot.out_time_secs());
    if let Some(speed) = snapshot.speed_multiplier {
        msg.push_str(&format!(" {:.2}x", speed));
    }
    if let Some(eta) = snapshot.eta_seconds {
        msg.push_str(&format!(" eta {}s", eta));
    }
    bar.set_message(msg);
}

/// Setup logging to both console and file, plus the diagnostics file when enabled
fn setup_logging(verbose: bool, config: &Config) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(&config.diagnostics.log_dir);
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "hushcut.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    let diagnostics_enabled = config.diagnostics.enabled
        || std::env::var("HUSHCUT_DEBUG").map(|v| v == "1").unwrap_or(false);
    let diagnostics_layer = if diagnostics_enabled {
        let (writer, guard) = non_blocking(rolling::never(&log_dir, "diagnostics.log"));
        std::mem::forget(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(filter::Targets::new().with_target(DIAG_TARGET, Level::DEBUG)),
        )
    } else {
        None
    };

    // Diagnostics need debug events through the global filter even when not verbose
    let mut env_filter = EnvFilter::from_default_env().add_directive(log_level.into());
    if diagnostics_enabled {
        env_filter = env_filter.add_directive(format!("{}=debug", DIAG_TARGET).parse()?);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer.with_filter(filter::filter_fn(|m| m.target() != DIAG_TARGET)))
        .with(file_layer)
        .with(diagnostics_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}{}",
        log_level,
        log_dir.join("hushcut.log").display(),
        if diagnostics_enabled { ", diagnostics enabled" } else { "" }
    );

    Ok(())
}
