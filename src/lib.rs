//! Lightwatch
//!
//! Camera-driven room lighting detection and presence automation.
//!
//! # Architecture
//!
//! Frames flow through two independent pipelines per room:
//!
//! 1. **Lighting**: `metrics` extracts brightness statistics, `temporal`
//!    tracks recent brightness, and `classifier` turns both into a debounced
//!    on/off/unknown state. One classifier per camera lives in the
//!    `registry`.
//! 2. **Automation**: `automation` combines the committed lighting state with
//!    `presence` detections, switches lights through an `actuator`, asks the
//!    user via `notify` before switching an empty room off, and falls back to
//!    an automatic turn-off scheduled on a `timer`. Every action lands in the
//!    `storage` audit log.
//!
//! `sampler` gates expensive per-frame work on motion, `ingest` provides
//! frame sources, `api` exposes the loopback response endpoint, and
//! `calibrate` derives thresholds from reference images.
//!
//! # Module Structure
//!
//! - `frame`: validated grayscale frames and ROI rectangles
//! - `config`: typed, validated configuration (file + environment)
//! - `testing`: deterministic clock, scheduler and recording collaborators

use anyhow::{anyhow, Result};
use rand::RngCore;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod actuator;
pub mod api;
pub mod automation;
pub mod calibrate;
pub mod classifier;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod presence;
pub mod registry;
pub mod sampler;
pub mod storage;
pub mod temporal;
pub mod testing;
pub mod timer;

pub use actuator::{Actuator, ActuatorStatus, DryRunActuator, HttpActuator, LightCommand};
pub use automation::{
    AutomationAction, AutomationController, Collaborators, ProcessOutcome, ResponseOutcome,
    RoomState, RoomStatus,
};
pub use classifier::{
    ClassificationResult, DetectorState, FrameAnalysis, LightingClassifier, LightingState, Vote,
};
pub use config::{
    AutomationConfig, DaemonConfig, DetectionMethod, LightingConfig, SamplerConfig,
    ThresholdOverrides,
};
pub use frame::{Frame, Roi};
pub use metrics::{FrameMetrics, HistogramMetrics};
pub use notify::{
    HttpNotificationChannel, LogNotificationChannel, Notification, NotificationChannel, UserAction,
};
pub use presence::{
    Detection, HttpPresenceDetector, Identity, ObjectClass, PresenceDetector, PresenceResult,
    StubPresence,
};
pub use registry::ClassifierRegistry;
pub use sampler::{AdaptiveSampler, SampleDecision, SampleReason};
pub use storage::{AutomationLog, AutomationLogEntry, InMemoryAutomationLog, SqliteAutomationLog};
pub use temporal::{ChangeDirection, TemporalSignals, TemporalWindow};
pub use timer::{Clock, SystemClock, ThreadScheduler, TimerHandle, TimerScheduler};

/// Room ids are short lowercase slugs: `^[a-z0-9_-]{1,64}$`.
///
/// Ids are used verbatim as room keys, so mixed case is rejected rather than
/// folded; config loading lowercases ids before validating them.
pub fn validate_room_id(room_id: &str) -> Result<()> {
    static ROOM_ID_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = ROOM_ID_RE
        .get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").ok())
        .as_ref()
        .ok_or_else(|| anyhow!("room id pattern failed to compile"))?;
    if !re.is_match(room_id) {
        return Err(anyhow!(
            "room id '{}' must match ^[a-z0-9_-]{{1,64}}$",
            room_id
        ));
    }
    Ok(())
}

/// Seconds since the Unix epoch; times before it clamp to 0.
pub fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unique shared in-memory SQLite URI, for tests and dry runs.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:lightwatch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}
