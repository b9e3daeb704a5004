//! Motion-gated frame sampling.
//!
//! Decides which frames are worth the expensive presence pipeline. The motion
//! score is the fraction of pixels of a downscaled frame whose absolute
//! difference to the last processed (downscaled) frame exceeds
//! `PIXEL_DIFF_THRESHOLD`.

use anyhow::Result;
use image::GrayImage;
use serde::Serialize;

use crate::config::SamplerConfig;
use crate::frame::Frame;

/// Per-pixel absolute difference that counts as changed.
pub const PIXEL_DIFF_THRESHOLD: u8 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleReason {
    FirstFrame,
    Motion,
    ForcedRefresh,
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SampleDecision {
    pub process: bool,
    pub reason: SampleReason,
    pub motion_score: f64,
    pub frame_index: u64,
}

/// Pure decision over (motion score, frames since the last processed frame).
///
/// `frames_since_last` is `None` before any frame was processed.
pub fn should_process(
    config: &SamplerConfig,
    motion_score: f64,
    frames_since_last: Option<u64>,
) -> SampleReason {
    let Some(gap) = frames_since_last else {
        return SampleReason::FirstFrame;
    };
    if gap >= config.max_frame_gap {
        return SampleReason::ForcedRefresh;
    }
    if motion_score > config.motion_threshold && gap >= config.min_frame_gap {
        return SampleReason::Motion;
    }
    SampleReason::Skipped
}

pub struct AdaptiveSampler {
    config: SamplerConfig,
    reference: Option<GrayImage>,
    last_processed: Option<u64>,
    next_index: u64,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reference: None,
            last_processed: None,
            next_index: 0,
        })
    }

    /// Score the frame against the last processed one and decide.
    pub fn observe(&mut self, frame: &Frame) -> SampleDecision {
        let frame_index = self.next_index;
        self.next_index += 1;

        let small = frame.scaled(self.config.motion_scale);
        let motion_score = match &self.reference {
            Some(reference) => motion_ratio(reference, &small),
            None => 0.0,
        };
        let frames_since_last = self
            .last_processed
            .map(|last| frame_index.saturating_sub(last));
        let reason = should_process(&self.config, motion_score, frames_since_last);
        let process = reason != SampleReason::Skipped;
        if process {
            self.last_processed = Some(frame_index);
            self.reference = Some(small);
            if reason == SampleReason::Motion {
                log::debug!(
                    "motion in frame {} (score {:.4})",
                    frame_index,
                    motion_score
                );
            }
        }

        SampleDecision {
            process,
            reason,
            motion_score,
            frame_index,
        }
    }

    pub fn reset(&mut self) {
        self.reference = None;
        self.last_processed = None;
        self.next_index = 0;
    }
}

/// Fraction of pixels differing by more than `PIXEL_DIFF_THRESHOLD`.
/// Frames of different size count as entirely changed.
pub fn motion_ratio(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 1.0;
    }
    let total = a.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let changed = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .filter(|(x, y)| x.abs_diff(**y) > PIXEL_DIFF_THRESHOLD)
        .count();
    changed as f64 / total as f64
}
