//! Lighting state classifier.
//!
//! Each analysed frame produces up to three votes (brightness, histogram,
//! temporal). Votes are grouped by candidate state and averaged; the best
//! average is the frame's instantaneous classification. A transition of the
//! committed state requires `stability_frames` consecutive frames agreeing on
//! the same new state:
//!
//! - an `unknown` frame neither advances nor breaks a pending run;
//! - a frame agreeing with the committed state drops the pending run;
//! - a frame naming a different new state restarts the run at 1.
//!
//! When the run reaches `stability_frames` the state commits and the counter
//! is left at 1.

use anyhow::Result;
use serde::Serialize;
use std::time::SystemTime;

use crate::config::{DetectionMethod, LightingConfig};
use crate::frame::Frame;
use crate::metrics::{self, FrameMetrics, HistogramMetrics};
use crate::temporal::{ChangeDirection, TemporalSignals, TemporalWindow};

const WEIGHT_BRIGHTNESS_DECISIVE: f64 = 0.8;
const WEIGHT_BRIGHTNESS_HOLD: f64 = 0.3;
const WEIGHT_BRIGHTNESS_UNCERTAIN: f64 = 0.1;
const WEIGHT_HISTOGRAM: f64 = 0.7;
const WEIGHT_TEMPORAL: f64 = 0.9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightingState {
    #[default]
    Unknown,
    On,
    Off,
}

impl LightingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightingState::Unknown => "unknown",
            LightingState::On => "on",
            LightingState::Off => "off",
        }
    }
}

impl std::fmt::Display for LightingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vote {
    pub method: DetectionMethod,
    pub state: LightingState,
    pub weight: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub state: LightingState,
    /// Average weight of the winning group, 0 when nobody voted.
    pub confidence: f64,
    pub votes: Vec<Vote>,
    /// Average weight per candidate state, in first-vote order.
    pub method_scores: Vec<(LightingState, f64)>,
    pub reasoning: Vec<String>,
}

/// Committed state and running counters of one classifier instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectorState {
    pub current_state: LightingState,
    /// Candidate collecting agreeing frames, if any.
    pub pending_state: Option<LightingState>,
    pub frames_in_current_state: u32,
    pub last_state_change: Option<SystemTime>,
    pub total_frames_analyzed: u64,
    pub state_changes_detected: u64,
    pub last_on_time: Option<SystemTime>,
    pub last_off_time: Option<SystemTime>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FrameAnalysis {
    pub timestamp: SystemTime,
    /// Committed state after this frame.
    pub state: LightingState,
    pub previous_state: LightingState,
    pub state_changed: bool,
    pub confidence: f64,
    pub metrics: FrameMetrics,
    pub histogram: HistogramMetrics,
    pub temporal: TemporalSignals,
    pub classification: ClassificationResult,
    pub detector: DetectorState,
}

pub struct LightingClassifier {
    config: LightingConfig,
    window: TemporalWindow,
    state: DetectorState,
}

impl LightingClassifier {
    pub fn new(config: LightingConfig) -> Result<Self> {
        config.validate()?;
        log::debug!("lighting classifier configured: {:?}", config);
        let window = TemporalWindow::new(
            config.temporal_window_size,
            config.brightness_change_threshold,
        );
        Ok(Self {
            config,
            window,
            state: DetectorState::default(),
        })
    }

    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn current_state(&self) -> LightingState {
        self.state.current_state
    }

    /// Analyse one frame and advance the debounce state machine.
    pub fn analyze(&mut self, frame: &Frame, timestamp: SystemTime) -> FrameAnalysis {
        let (metrics, histogram) = metrics::extract(frame, &self.config);
        let temporal = self.window.push(metrics.brightness);
        let classification = self.classify(&metrics, &histogram, &temporal);

        let previous_state = self.state.current_state;
        let state_changed = self.advance(classification.state, timestamp);
        self.state.total_frames_analyzed += 1;

        if state_changed {
            log::info!(
                "lighting state {} -> {} (confidence {:.2}, brightness {:.1})",
                previous_state,
                self.state.current_state,
                classification.confidence,
                metrics.brightness
            );
        }

        FrameAnalysis {
            timestamp,
            state: self.state.current_state,
            previous_state,
            state_changed,
            confidence: classification.confidence,
            metrics,
            histogram,
            temporal,
            classification,
            detector: self.state.clone(),
        }
    }

    /// Fuse the enabled voting methods into one instantaneous classification.
    pub fn classify(
        &self,
        metrics: &FrameMetrics,
        histogram: &HistogramMetrics,
        temporal: &TemporalSignals,
    ) -> ClassificationResult {
        let mut votes = Vec::new();
        let mut reasoning = Vec::new();

        if self.config.uses(DetectionMethod::Brightness) {
            let (vote, reason) = self.brightness_vote(metrics.brightness);
            votes.push(vote);
            reasoning.push(reason);
        }
        if self.config.uses(DetectionMethod::Histogram) {
            if let Some((vote, reason)) = self.histogram_vote(histogram.bright_ratio) {
                votes.push(vote);
                reasoning.push(reason);
            }
        }
        if self.config.uses(DetectionMethod::Temporal) {
            if let Some((vote, reason)) = temporal_vote(temporal) {
                votes.push(vote);
                reasoning.push(reason);
            }
        }

        let method_scores = aggregate(&votes);
        let mut best: Option<(LightingState, f64)> = None;
        for &(state, score) in &method_scores {
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((state, score));
            }
        }
        let (state, confidence) = best.unwrap_or((LightingState::Unknown, 0.0));

        ClassificationResult {
            state,
            confidence,
            votes,
            method_scores,
            reasoning,
        }
    }

    fn brightness_vote(&self, brightness: f64) -> (Vote, String) {
        let mut low = self.config.brightness_threshold_low;
        let mut high = self.config.brightness_threshold_high;
        match self.state.current_state {
            LightingState::Off => high += self.config.brightness_hysteresis,
            LightingState::On => low -= self.config.brightness_hysteresis,
            LightingState::Unknown => {}
        }

        let vote = |state, weight| Vote {
            method: DetectionMethod::Brightness,
            state,
            weight,
        };
        if brightness < low {
            (
                vote(LightingState::Off, WEIGHT_BRIGHTNESS_DECISIVE),
                format!("brightness {:.1} < {:.1} (lights off)", brightness, low),
            )
        } else if brightness > high {
            (
                vote(LightingState::On, WEIGHT_BRIGHTNESS_DECISIVE),
                format!("brightness {:.1} > {:.1} (lights on)", brightness, high),
            )
        } else if self.state.current_state != LightingState::Unknown {
            let held = self.state.current_state;
            (
                vote(held, WEIGHT_BRIGHTNESS_HOLD),
                format!(
                    "brightness {:.1} in hysteresis band, holding {}",
                    brightness, held
                ),
            )
        } else {
            (
                vote(LightingState::Unknown, WEIGHT_BRIGHTNESS_UNCERTAIN),
                format!("brightness {:.1} in uncertain range", brightness),
            )
        }
    }

    fn histogram_vote(&self, bright_ratio: f64) -> Option<(Vote, String)> {
        let vote = |state| Vote {
            method: DetectionMethod::Histogram,
            state,
            weight: WEIGHT_HISTOGRAM,
        };
        if bright_ratio > self.config.bright_pixel_ratio_on {
            Some((
                vote(LightingState::On),
                format!(
                    "bright pixel ratio {:.3} > {} (lights on)",
                    bright_ratio, self.config.bright_pixel_ratio_on
                ),
            ))
        } else if bright_ratio < self.config.bright_pixel_ratio_off {
            Some((
                vote(LightingState::Off),
                format!(
                    "bright pixel ratio {:.3} < {} (lights off)",
                    bright_ratio, self.config.bright_pixel_ratio_off
                ),
            ))
        } else {
            None
        }
    }

    /// Returns true when the committed state changed.
    fn advance(&mut self, instant: LightingState, timestamp: SystemTime) -> bool {
        if instant == LightingState::Unknown {
            return false;
        }
        if instant == self.state.current_state {
            self.state.frames_in_current_state = 0;
            self.state.pending_state = None;
            return false;
        }

        if self.state.pending_state == Some(instant) {
            self.state.frames_in_current_state += 1;
        } else {
            self.state.pending_state = Some(instant);
            self.state.frames_in_current_state = 1;
        }

        if self.state.frames_in_current_state < self.config.stability_frames {
            return false;
        }

        self.state.current_state = instant;
        self.state.pending_state = None;
        self.state.frames_in_current_state = 1;
        self.state.last_state_change = Some(timestamp);
        self.state.state_changes_detected += 1;
        match instant {
            LightingState::On => self.state.last_on_time = Some(timestamp),
            LightingState::Off => self.state.last_off_time = Some(timestamp),
            LightingState::Unknown => {}
        }
        true
    }

    /// Forget the committed state, counters and brightness history.
    pub fn reset(&mut self) {
        self.state = DetectorState::default();
        self.window.reset();
        log::info!("lighting classifier state reset");
    }
}

fn temporal_vote(temporal: &TemporalSignals) -> Option<(Vote, String)> {
    if !temporal.significant_change {
        return None;
    }
    let state = match temporal.direction {
        ChangeDirection::Increase => LightingState::On,
        ChangeDirection::Decrease => LightingState::Off,
        ChangeDirection::None => return None,
    };
    Some((
        Vote {
            method: DetectionMethod::Temporal,
            state,
            weight: WEIGHT_TEMPORAL,
        },
        format!(
            "significant brightness {} ({:+.1})",
            if state == LightingState::On {
                "increase"
            } else {
                "decrease"
            },
            temporal.brightness_change
        ),
    ))
}

fn aggregate(votes: &[Vote]) -> Vec<(LightingState, f64)> {
    let mut groups: Vec<(LightingState, f64, u32)> = Vec::new();
    for vote in votes {
        match groups.iter_mut().find(|(state, _, _)| *state == vote.state) {
            Some((_, sum, count)) => {
                *sum += vote.weight;
                *count += 1;
            }
            None => groups.push((vote.state, vote.weight, 1)),
        }
    }
    groups
        .into_iter()
        .map(|(state, sum, count)| (state, sum / count as f64))
        .collect()
}
