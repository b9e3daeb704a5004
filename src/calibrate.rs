//! Threshold calibration from a lights-on / lights-off reference pair.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::config::{LightingConfig, ThresholdOverrides};
use crate::frame::Frame;
use crate::metrics;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Day,
    Night,
}

impl Section {
    /// Day runs from 06:00 to 19:59 local time.
    pub fn for_hour(hour: u32) -> Self {
        if (6..20).contains(&hour) {
            Section::Day
        } else {
            Section::Night
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Day => "day",
            Section::Night => "night",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "day" => Ok(Section::Day),
            "night" => Ok(Section::Night),
            other => Err(anyhow!("invalid section: {}. Must be 'day' or 'night'", other)),
        }
    }
}

/// Brightness summary of one reference image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReferenceMetrics {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p95: f64,
    /// Fraction of pixels at or above the bright band start (170).
    pub bright_ratio: f64,
    pub dark_ratio: f64,
    /// Fraction of pixels strictly above 120, 140, 160, 180 and 200.
    pub pixels_above: Vec<(u8, f64)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationAnalysis {
    pub lights_on_brightness: f64,
    pub lights_off_brightness: f64,
    pub brightness_difference: f64,
    pub bright_pixel_difference: f64,
    pub section: Section,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Calibration {
    pub brightness_threshold_low: f64,
    pub brightness_threshold_high: f64,
    pub bright_pixel_ratio_on: f64,
    pub bright_pixel_ratio_off: f64,
    pub analysis: CalibrationAnalysis,
}

impl Calibration {
    pub fn overrides(&self) -> ThresholdOverrides {
        ThresholdOverrides {
            brightness_threshold_low: Some(self.brightness_threshold_low),
            brightness_threshold_high: Some(self.brightness_threshold_high),
            bright_pixel_ratio_on: Some(self.bright_pixel_ratio_on),
            bright_pixel_ratio_off: Some(self.bright_pixel_ratio_off),
        }
    }
}

/// Full-resolution analysis of a reference image.
pub fn analyze_reference(frame: &Frame) -> ReferenceMetrics {
    let config = LightingConfig {
        resize_for_analysis: false,
        histogram_bins: 256,
        roi_regions: Vec::new(),
        roi_weights: Vec::new(),
        ..LightingConfig::default()
    };
    let (m, h) = metrics::extract(frame, &config);
    let total = frame.pixels().len() as f64;
    let pixels_above = [120u8, 140, 160, 180, 200]
        .into_iter()
        .map(|cut| {
            let above = frame.pixels().iter().filter(|&&p| p > cut).count();
            (cut, above as f64 / total)
        })
        .collect();
    ReferenceMetrics {
        mean: m.mean,
        median: m.median,
        std_dev: m.std_dev,
        p95: m.p95,
        bright_ratio: h.bright_ratio,
        dark_ratio: h.dark_ratio,
        pixels_above,
    }
}

pub fn calculate_thresholds(
    on: &ReferenceMetrics,
    off: &ReferenceMetrics,
    section: Section,
) -> Calibration {
    let diff = on.mean - off.mean;
    let bright_diff = on.bright_ratio - off.bright_ratio;

    let (base_low, base_high) = match section {
        Section::Day => ((off.mean + diff * 0.2).max(30.0), (off.mean + diff * 0.7).min(200.0)),
        Section::Night => ((off.mean + diff * 0.15).max(15.0), (off.mean + diff * 0.6).min(150.0)),
    };

    let (low, high) = if diff < 30.0 {
        ((base_low - 10.0).max(10.0), (base_high - 15.0).max(25.0))
    } else if diff > 100.0 {
        ((base_low + 10.0).min(80.0), (base_high + 20.0).min(180.0))
    } else {
        (base_low, base_high)
    };

    let ratio_off = off.bright_ratio.max(0.01);
    let mut ratio_on = on.bright_ratio.min(0.95);
    if ratio_on - ratio_off < 0.05 {
        ratio_on = ratio_off + 0.05;
    }

    let low = low.min(100.0).max(10.0);
    let high = high.min(220.0).max(low + 15.0);

    log::info!(
        "{} calibration: mean diff {:.1}, bright ratio diff {:.3}",
        section,
        diff,
        bright_diff
    );

    Calibration {
        brightness_threshold_low: low.round(),
        brightness_threshold_high: high.round(),
        bright_pixel_ratio_on: round_to(ratio_on, 3),
        bright_pixel_ratio_off: round_to(ratio_off, 3),
        analysis: CalibrationAnalysis {
            lights_on_brightness: round_to(on.mean, 1),
            lights_off_brightness: round_to(off.mean, 1),
            brightness_difference: round_to(diff, 1),
            bright_pixel_difference: round_to(bright_diff, 3),
            section,
        },
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(mean: f64, bright_ratio: f64) -> ReferenceMetrics {
        ReferenceMetrics {
            mean,
            median: mean,
            std_dev: 0.0,
            p95: mean,
            bright_ratio,
            dark_ratio: 0.0,
            pixels_above: Vec::new(),
        }
    }

    #[test]
    fn normal_day_difference() {
        let c = calculate_thresholds(&reference(140.0, 0.4), &reference(60.0, 0.02), Section::Day);
        // low = max(30, 60 + 16), high = min(200, 60 + 56)
        assert_eq!(c.brightness_threshold_low, 76.0);
        assert_eq!(c.brightness_threshold_high, 116.0);
        assert_eq!(c.bright_pixel_ratio_on, 0.4);
        assert_eq!(c.bright_pixel_ratio_off, 0.02);
        assert_eq!(c.analysis.brightness_difference, 80.0);
    }

    #[test]
    fn small_night_difference_is_more_sensitive() {
        let c = calculate_thresholds(&reference(40.0, 0.0), &reference(20.0, 0.0), Section::Night);
        // base low = max(15, 23) = 23 -> 13; base high = 32 -> max(17, 25) = 25 -> >= low + 15 = 28
        assert_eq!(c.brightness_threshold_low, 13.0);
        assert_eq!(c.brightness_threshold_high, 28.0);
        assert_eq!(c.bright_pixel_ratio_off, 0.01);
        assert_eq!(c.bright_pixel_ratio_on, 0.06);
    }

    #[test]
    fn large_difference_is_capped() {
        let c = calculate_thresholds(&reference(250.0, 0.99), &reference(10.0, 0.0), Section::Day);
        // base low = max(30, 58) + 10 = 68; base high = min(200, 178) + 20 -> 180
        assert_eq!(c.brightness_threshold_low, 68.0);
        assert_eq!(c.brightness_threshold_high, 180.0);
        assert_eq!(c.bright_pixel_ratio_on, 0.95);
    }

    #[test]
    fn reference_analysis_uses_full_frame() {
        let mut pixels = vec![10u8; 300];
        pixels.extend(vec![190u8; 100]);
        let frame = Frame::from_gray(20, 20, pixels).unwrap();
        let m = analyze_reference(&frame);
        assert_eq!(m.mean, 55.0);
        assert!((m.bright_ratio - 0.25).abs() < 1e-9);
        assert!((m.dark_ratio - 0.75).abs() < 1e-9);
        assert_eq!(m.pixels_above[3], (180, 0.25));
        assert_eq!(m.pixels_above[4], (200, 0.0));
    }

    #[test]
    fn sections_parse_and_follow_the_clock() {
        assert_eq!("night".parse::<Section>().unwrap(), Section::Night);
        assert!("dusk".parse::<Section>().is_err());
        assert_eq!(Section::for_hour(6), Section::Day);
        assert_eq!(Section::for_hour(19), Section::Day);
        assert_eq!(Section::for_hour(20), Section::Night);
        assert_eq!(Section::for_hour(3), Section::Night);
    }

    #[test]
    fn calibrated_overrides_produce_valid_config() {
        let c =
            calculate_thresholds(&reference(140.0, 0.4), &reference(60.0, 0.02), Section::Night);
        let cfg = c.overrides().apply(&LightingConfig::default());
        cfg.validate().unwrap();
    }
}
