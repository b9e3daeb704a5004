//! Per-frame brightness statistics.
//!
//! `extract` is a pure function of the frame and the configuration. Large
//! frames are reduced to `analysis_width` first; all thresholds downstream are
//! expressed against that reduced frame.

use serde::Serialize;

use crate::config::LightingConfig;
use crate::frame::Frame;

/// Intensity below which a pixel is "dark" in the tri-band split.
pub const DARK_BAND_END: u32 = 85;
/// Intensity at which a pixel becomes "bright" in the tri-band split.
pub const BRIGHT_BAND_START: u32 = 170;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameMetrics {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: u8,
    pub max: u8,
    pub p25: f64,
    pub p75: f64,
    pub p95: f64,
    /// Fraction of pixels strictly above `bright_pixel_threshold`.
    pub bright_ratio: f64,
    pub mid_ratio: f64,
    pub dark_ratio: f64,
    /// Weight-averaged ROI brightness, when ROIs are configured.
    pub roi_brightness: Option<f64>,
    /// Value used by the classifier: ROI brightness if present, else mean.
    pub brightness: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistogramMetrics {
    /// Normalised histogram; bins sum to 1.
    pub histogram: Vec<f64>,
    pub weighted_brightness: f64,
    /// Shannon entropy in bits.
    pub entropy: f64,
    pub dark_ratio: f64,
    pub mid_ratio: f64,
    pub bright_ratio: f64,
}

/// Compute frame and histogram metrics for one frame.
pub fn extract(frame: &Frame, config: &LightingConfig) -> (FrameMetrics, HistogramMetrics) {
    let analysis = if config.resize_for_analysis {
        frame.downscaled_to_width(config.analysis_width)
    } else {
        frame.clone()
    };
    let counts = intensity_counts(analysis.pixels());
    let frame_metrics = frame_metrics(&analysis, &counts, config);
    let histogram = histogram_metrics(&counts, config.histogram_bins);
    (frame_metrics, histogram)
}

fn intensity_counts(pixels: &[u8]) -> [u64; 256] {
    let mut counts = [0u64; 256];
    for &p in pixels {
        counts[p as usize] += 1;
    }
    counts
}

fn frame_metrics(frame: &Frame, counts: &[u64; 256], config: &LightingConfig) -> FrameMetrics {
    let total: u64 = counts.iter().sum();
    let n = total as f64;

    let sum: f64 = counts
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();
    let mean = sum / n;
    let variance = counts
        .iter()
        .enumerate()
        .map(|(value, &count)| {
            let d = value as f64 - mean;
            d * d * count as f64
        })
        .sum::<f64>()
        / n;

    let min = counts.iter().position(|&c| c > 0).unwrap_or(0) as u8;
    let max = counts.iter().rposition(|&c| c > 0).unwrap_or(0) as u8;

    let count_where = |pred: &dyn Fn(usize) -> bool| -> f64 {
        counts
            .iter()
            .enumerate()
            .filter(|(value, _)| pred(*value))
            .map(|(_, &count)| count)
            .sum::<u64>() as f64
            / n
    };
    let cut = config.bright_pixel_threshold as usize;
    let bright_ratio = count_where(&|v| v > cut);
    let dark_ratio = count_where(&|v| v < DARK_BAND_END as usize);
    let mid_ratio =
        count_where(&|v| (DARK_BAND_END as usize..BRIGHT_BAND_START as usize).contains(&v));

    let roi_brightness = roi_brightness(frame, config);

    FrameMetrics {
        mean,
        median: percentile(counts, total, 50.0),
        std_dev: variance.sqrt(),
        min,
        max,
        p25: percentile(counts, total, 25.0),
        p75: percentile(counts, total, 75.0),
        p95: percentile(counts, total, 95.0),
        bright_ratio,
        mid_ratio,
        dark_ratio,
        roi_brightness,
        brightness: roi_brightness.unwrap_or(mean),
    }
}

/// Linear-interpolated percentile over a 256-bin count table.
fn percentile(counts: &[u64; 256], total: u64, q: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let rank = q / 100.0 * (total - 1) as f64;
    let lower = rank.floor() as u64;
    let upper = rank.ceil() as u64;
    let lo = value_at_rank(counts, lower) as f64;
    let hi = value_at_rank(counts, upper) as f64;
    lo + (hi - lo) * (rank - lower as f64)
}

fn value_at_rank(counts: &[u64; 256], rank: u64) -> u8 {
    let mut seen = 0u64;
    for (value, &count) in counts.iter().enumerate() {
        seen += count;
        if seen > rank {
            return value as u8;
        }
    }
    255
}

/// Mean of `roi_mean * weight` over configured ROIs.
///
/// An ROI that clamps to nothing contributes 0 rather than being rejected;
/// callers are expected to configure regions that fit the analysis frame.
fn roi_brightness(frame: &Frame, config: &LightingConfig) -> Option<f64> {
    if config.roi_regions.is_empty() {
        return None;
    }
    let gray = frame.as_gray();
    let weighted: Vec<f64> = config
        .roi_regions
        .iter()
        .enumerate()
        .map(|(i, roi)| match roi.clamp(frame.width(), frame.height()) {
            Some((x1, y1, x2, y2)) => {
                let mut sum = 0u64;
                for y in y1..y2 {
                    for x in x1..x2 {
                        sum += gray.get_pixel(x, y).0[0] as u64;
                    }
                }
                let area = ((x2 - x1) as u64 * (y2 - y1) as u64) as f64;
                (sum as f64 / area) * config.roi_weight(i)
            }
            None => 0.0,
        })
        .collect();
    Some(weighted.iter().sum::<f64>() / weighted.len() as f64)
}

fn histogram_metrics(counts: &[u64; 256], bins: usize) -> HistogramMetrics {
    let total: u64 = counts.iter().sum();
    let mut histogram = vec![0f64; bins];
    for (value, &count) in counts.iter().enumerate() {
        let bin = value * bins / 256;
        histogram[bin] += count as f64;
    }
    for h in histogram.iter_mut() {
        *h /= total as f64;
    }

    let step = if bins > 1 {
        255.0 / (bins - 1) as f64
    } else {
        0.0
    };
    let weighted_brightness = histogram
        .iter()
        .enumerate()
        .map(|(i, h)| h * i as f64 * step)
        .sum();

    let entropy = -histogram
        .iter()
        .filter(|h| **h > 0.0)
        .map(|h| h * h.log2())
        .sum::<f64>();

    let dark_end = DARK_BAND_END as usize * bins / 256;
    let mid_end = BRIGHT_BAND_START as usize * bins / 256;

    HistogramMetrics {
        dark_ratio: histogram[..dark_end].iter().sum(),
        mid_ratio: histogram[dark_end..mid_end].iter().sum(),
        bright_ratio: histogram[mid_end..].iter().sum(),
        weighted_brightness,
        entropy,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Roi;

    fn half_and_half(dark: u8, bright: u8) -> Frame {
        let mut pixels = vec![dark; 50];
        pixels.extend(vec![bright; 50]);
        Frame::from_gray(10, 10, pixels).unwrap()
    }

    #[test]
    fn uniform_frame_statistics() {
        let frame = Frame::uniform(64, 48, 200).unwrap();
        let (m, h) = extract(&frame, &LightingConfig::default());
        assert_eq!(m.mean, 200.0);
        assert_eq!(m.median, 200.0);
        assert_eq!(m.std_dev, 0.0);
        assert_eq!((m.min, m.max), (200, 200));
        assert_eq!(m.bright_ratio, 1.0);
        assert_eq!(m.brightness, 200.0);
        assert!(m.roi_brightness.is_none());
        assert!((h.bright_ratio - 1.0).abs() < 1e-9);
        assert_eq!(h.entropy, 0.0);
    }

    #[test]
    fn split_frame_percentiles_and_bands() {
        let frame = half_and_half(20, 220);
        let (m, h) = extract(&frame, &LightingConfig::default());
        assert_eq!(m.mean, 120.0);
        assert_eq!(m.median, 120.0);
        assert_eq!(m.std_dev, 100.0);
        assert_eq!(m.p25, 20.0);
        assert_eq!(m.p75, 220.0);
        assert_eq!(m.dark_ratio, 0.5);
        assert_eq!(m.mid_ratio, 0.0);
        assert_eq!(m.bright_ratio, 0.5);
        assert!((h.entropy - 1.0).abs() < 1e-9);
        assert!((h.histogram.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!((h.dark_ratio - 0.5).abs() < 1e-9);
        assert!((h.bright_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn roi_weighting_replaces_mean() {
        let frame = half_and_half(20, 220);
        let cfg = LightingConfig {
            roi_regions: vec![Roi::new(0, 5, 10, 10)],
            roi_weights: vec![0.5],
            ..LightingConfig::default()
        };
        let (m, _) = extract(&frame, &cfg);
        assert_eq!(m.roi_brightness, Some(110.0));
        assert_eq!(m.brightness, 110.0);
    }

    #[test]
    fn roi_outside_frame_contributes_zero() {
        let frame = Frame::uniform(10, 10, 100).unwrap();
        let cfg = LightingConfig {
            roi_regions: vec![Roi::new(0, 0, 10, 10), Roi::new(50, 50, 60, 60)],
            ..LightingConfig::default()
        };
        let (m, _) = extract(&frame, &cfg);
        assert_eq!(m.brightness, 50.0);
    }

    #[test]
    fn large_frames_are_reduced_before_analysis() {
        let frame = Frame::uniform(1280, 720, 60).unwrap();
        let cfg = LightingConfig {
            roi_regions: vec![Roi::new(0, 0, 320, 180)],
            ..LightingConfig::default()
        };
        let (m, _) = extract(&frame, &cfg);
        let roi = m.roi_brightness.unwrap();
        assert!((roi - 60.0).abs() <= 1.0, "roi brightness {roi}");
    }
}
