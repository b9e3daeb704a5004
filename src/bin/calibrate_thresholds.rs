//! calibrate_thresholds - derive brightness thresholds from reference images
//!
//! Takes a lights-on and a lights-off snapshot of the same scene and prints
//! threshold overrides for the `lighting.day` or `lighting.night` section.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use lightwatch::calibrate::{analyze_reference, calculate_thresholds, Section};
use lightwatch::Frame;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image taken with the lights on.
    lights_on: PathBuf,
    /// Image taken with the lights off.
    lights_off: PathBuf,
    /// Config section to calibrate (day|night).
    section: String,
    /// Also write the JSON result to this file.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let section: Section = args.section.parse()?;

    log::info!("analyzing lights-on image {}", args.lights_on.display());
    let on = analyze_reference(&Frame::open(&args.lights_on)?);
    log::info!(
        "lights on: mean={:.1} bright ratio={:.3}",
        on.mean,
        on.bright_ratio
    );
    log::info!("analyzing lights-off image {}", args.lights_off.display());
    let off = analyze_reference(&Frame::open(&args.lights_off)?);
    log::info!(
        "lights off: mean={:.1} bright ratio={:.3}",
        off.mean,
        off.bright_ratio
    );

    let calibration = calculate_thresholds(&on, &off, section);
    let json = serde_json::to_string_pretty(&calibration)?;
    println!("{json}");
    if let Some(path) = &args.output {
        std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("write calibration to {}", path.display()))?;
        log::info!("calibration written to {}", path.display());
    }
    Ok(())
}
