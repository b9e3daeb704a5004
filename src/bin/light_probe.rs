//! light_probe - run the lighting classifier over a sequence of images
//!
//! Prints one JSON line per frame with the committed state, whether it
//! changed, and the votes behind it. Useful for tuning thresholds against
//! recorded footage.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use lightwatch::frame::suggest_rois;
use lightwatch::ingest::is_image_file;
use lightwatch::{Frame, LightingClassifier, LightingConfig, LightingState, Roi, Vote};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image files, or directories of images, in playback order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long)]
    threshold_low: Option<f64>,
    #[arg(long)]
    threshold_high: Option<f64>,
    #[arg(long)]
    stability_frames: Option<u32>,
    /// Seconds between frames, for timestamps.
    #[arg(long, default_value_t = 1.0)]
    frame_interval_s: f64,
    /// Print suggested ROIs for the first image and exit.
    #[arg(long)]
    suggest_rois: bool,
}

#[derive(Serialize)]
struct ProbeLine<'a> {
    file: String,
    state: LightingState,
    changed: bool,
    confidence: f64,
    brightness: f64,
    votes: &'a [Vote],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let files = collect_files(&args.inputs)?;

    if args.suggest_rois {
        let first = files.first().ok_or_else(|| anyhow!("no images given"))?;
        let frame = Frame::open(first)?;
        let rois: Vec<Roi> = suggest_rois(frame.width(), frame.height(), 4);
        println!("{}", serde_json::to_string_pretty(&rois)?);
        return Ok(());
    }

    let mut config = LightingConfig::default();
    if let Some(low) = args.threshold_low {
        config.brightness_threshold_low = low;
    }
    if let Some(high) = args.threshold_high {
        config.brightness_threshold_high = high;
    }
    if let Some(frames) = args.stability_frames {
        config.stability_frames = frames;
    }
    let mut classifier = LightingClassifier::new(config)?;
    let interval = Duration::try_from_secs_f64(args.frame_interval_s)
        .map_err(|e| anyhow!("invalid frame interval: {}", e))?;

    let mut timestamp = SystemTime::now();
    for file in &files {
        let frame = match Frame::open(file) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("skipping {}: {}", file.display(), e);
                continue;
            }
        };
        let analysis = classifier.analyze(&frame, timestamp);
        let line = ProbeLine {
            file: file.display().to_string(),
            state: analysis.state,
            changed: analysis.state_changed,
            confidence: analysis.confidence,
            brightness: analysis.metrics.brightness,
            votes: &analysis.classification.votes,
        };
        println!("{}", serde_json::to_string(&line)?);
        timestamp += interval;
    }

    let state = classifier.state();
    log::info!(
        "{} frames, {} state changes, final state {}",
        state.total_frames_analyzed,
        state.state_changes_detected,
        state.current_state
    );
    Ok(())
}

fn collect_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_image_file(path))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}
