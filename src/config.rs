use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibrate::Section;
use crate::frame::Roi;

const DEFAULT_DB_PATH: &str = "lightwatch.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8798";
const DEFAULT_ROOM_ID: &str = "default";
const DEFAULT_ROOM_SOURCE: &str = "stub://default";
const DEFAULT_TARGET_FPS: u32 = 5;
const DEFAULT_NO_PERSON_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 180;
const DEFAULT_PERSON_CONFIDENCE: f32 = 0.5;

// ----------------------------------------------------------------------------
// Lighting classifier configuration
// ----------------------------------------------------------------------------

/// Independent voting methods of the lighting classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Brightness,
    Histogram,
    Temporal,
}

/// Thresholds and windows for one classifier instance.
///
/// Brightness values are on the 0..=255 scale of the analysis frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Below this the brightness vote says off.
    pub brightness_threshold_low: f64,
    /// Above this the brightness vote says on.
    pub brightness_threshold_high: f64,
    /// Margin added to the threshold opposite the committed state.
    pub brightness_hysteresis: f64,
    pub histogram_bins: usize,
    /// Pixels strictly above this count as bright in `FrameMetrics`.
    pub bright_pixel_threshold: u8,
    pub bright_pixel_ratio_on: f64,
    pub bright_pixel_ratio_off: f64,
    pub temporal_window_size: usize,
    pub brightness_change_threshold: f64,
    /// Consecutive agreeing frames required to commit a transition.
    pub stability_frames: u32,
    pub roi_regions: Vec<Roi>,
    /// One weight per ROI; empty means all 1.0.
    pub roi_weights: Vec<f64>,
    pub resize_for_analysis: bool,
    pub analysis_width: u32,
    pub detection_methods: Vec<DetectionMethod>,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            brightness_threshold_low: 50.0,
            brightness_threshold_high: 120.0,
            brightness_hysteresis: 10.0,
            histogram_bins: 64,
            bright_pixel_threshold: 180,
            bright_pixel_ratio_on: 0.15,
            bright_pixel_ratio_off: 0.05,
            temporal_window_size: 5,
            brightness_change_threshold: 30.0,
            stability_frames: 3,
            roi_regions: Vec::new(),
            roi_weights: Vec::new(),
            resize_for_analysis: true,
            analysis_width: 320,
            detection_methods: vec![
                DetectionMethod::Brightness,
                DetectionMethod::Histogram,
                DetectionMethod::Temporal,
            ],
        }
    }
}

impl LightingConfig {
    pub fn validate(&self) -> Result<()> {
        let low = self.brightness_threshold_low;
        let high = self.brightness_threshold_high;
        if !(0.0..=255.0).contains(&low) || !(0.0..=255.0).contains(&high) {
            return Err(anyhow!(
                "brightness thresholds must lie within 0..=255 (low={}, high={})",
                low,
                high
            ));
        }
        if high <= low {
            return Err(anyhow!(
                "brightness_threshold_high ({}) must be greater than brightness_threshold_low ({})",
                high,
                low
            ));
        }
        if !self.brightness_hysteresis.is_finite() || self.brightness_hysteresis < 0.0 {
            return Err(anyhow!("brightness_hysteresis must be a non-negative number"));
        }
        if self.histogram_bins == 0 || self.histogram_bins > 256 {
            return Err(anyhow!("histogram_bins must be within 1..=256"));
        }
        let on = self.bright_pixel_ratio_on;
        let off = self.bright_pixel_ratio_off;
        if !(0.0..=1.0).contains(&on) || !(0.0..=1.0).contains(&off) {
            return Err(anyhow!("bright pixel ratios must lie within 0..=1"));
        }
        if on <= off {
            return Err(anyhow!(
                "bright_pixel_ratio_on ({}) must be greater than bright_pixel_ratio_off ({})",
                on,
                off
            ));
        }
        if self.temporal_window_size < 2 {
            return Err(anyhow!("temporal_window_size must be at least 2"));
        }
        if !self.brightness_change_threshold.is_finite() || self.brightness_change_threshold < 0.0
        {
            return Err(anyhow!(
                "brightness_change_threshold must be a non-negative number"
            ));
        }
        if self.stability_frames == 0 {
            return Err(anyhow!("stability_frames must be greater than zero"));
        }
        if !self.roi_weights.is_empty() && self.roi_weights.len() != self.roi_regions.len() {
            return Err(anyhow!(
                "roi_weights has {} entries but roi_regions has {}",
                self.roi_weights.len(),
                self.roi_regions.len()
            ));
        }
        if self.roi_weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(anyhow!("roi_weights must be positive"));
        }
        for roi in &self.roi_regions {
            if roi.x2 <= roi.x1 || roi.y2 <= roi.y1 {
                return Err(anyhow!("roi {:?} has no area", roi));
            }
        }
        if self.resize_for_analysis && self.analysis_width == 0 {
            return Err(anyhow!("analysis_width must be greater than zero"));
        }
        Ok(())
    }

    pub fn uses(&self, method: DetectionMethod) -> bool {
        self.detection_methods.contains(&method)
    }

    /// Weight of ROI `index`, 1.0 when no weights are configured.
    pub fn roi_weight(&self, index: usize) -> f64 {
        self.roi_weights.get(index).copied().unwrap_or(1.0)
    }
}

/// Per-section threshold overrides (e.g. separate day and night calibrations).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    pub brightness_threshold_low: Option<f64>,
    pub brightness_threshold_high: Option<f64>,
    pub bright_pixel_ratio_on: Option<f64>,
    pub bright_pixel_ratio_off: Option<f64>,
}

impl ThresholdOverrides {
    pub fn apply(&self, base: &LightingConfig) -> LightingConfig {
        let mut cfg = base.clone();
        if let Some(low) = self.brightness_threshold_low {
            cfg.brightness_threshold_low = low;
        }
        if let Some(high) = self.brightness_threshold_high {
            cfg.brightness_threshold_high = high;
        }
        if let Some(on) = self.bright_pixel_ratio_on {
            cfg.bright_pixel_ratio_on = on;
        }
        if let Some(off) = self.bright_pixel_ratio_off {
            cfg.bright_pixel_ratio_off = off;
        }
        cfg
    }
}

// ----------------------------------------------------------------------------
// Sampler and automation configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Fraction of changed pixels above which a frame counts as motion.
    pub motion_threshold: f64,
    /// Frames to skip after a processed frame before motion may trigger again.
    pub min_frame_gap: u64,
    /// A frame is forced through after this many skipped frames.
    pub max_frame_gap: u64,
    /// Downscale factor applied before differencing.
    pub motion_scale: f32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.05,
            min_frame_gap: 5,
            max_frame_gap: 30,
            motion_scale: 0.25,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.motion_threshold) {
            return Err(anyhow!("motion_threshold must lie within 0..=1"));
        }
        if self.max_frame_gap == 0 {
            return Err(anyhow!("max_frame_gap must be greater than zero"));
        }
        if self.max_frame_gap < self.min_frame_gap {
            return Err(anyhow!(
                "max_frame_gap ({}) must not be smaller than min_frame_gap ({})",
                self.max_frame_gap,
                self.min_frame_gap
            ));
        }
        if !(self.motion_scale > 0.0 && self.motion_scale <= 1.0) {
            return Err(anyhow!("motion_scale must lie within (0, 1]"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutomationConfig {
    /// Lights on with nobody seen for this long triggers a notification.
    pub no_person_timeout: Duration,
    /// Unanswered notifications turn the lights off after this long.
    pub user_response_timeout: Duration,
    /// Minimum detection confidence for a person to count as present.
    pub person_confidence_threshold: f32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            no_person_timeout: Duration::from_secs(DEFAULT_NO_PERSON_TIMEOUT_SECS),
            user_response_timeout: Duration::from_secs(DEFAULT_RESPONSE_TIMEOUT_SECS),
            person_confidence_threshold: DEFAULT_PERSON_CONFIDENCE,
        }
    }
}

impl AutomationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.no_person_timeout.is_zero() {
            return Err(anyhow!("no_person_timeout must be greater than zero"));
        }
        if self.user_response_timeout.is_zero() {
            return Err(anyhow!("user_response_timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.person_confidence_threshold) {
            return Err(anyhow!("person_confidence_threshold must lie within 0..=1"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration (file + environment)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    db_path: Option<String>,
    dry_run: Option<bool>,
    target_fps: Option<u32>,
    api: Option<ApiConfigFile>,
    rooms: Option<Vec<RoomConfigFile>>,
    actuator: Option<EndpointConfigFile>,
    notifications: Option<EndpointConfigFile>,
    presence: Option<EndpointConfigFile>,
    lighting: Option<LightingConfigFile>,
    sampler: Option<SamplerConfig>,
    automation: Option<AutomationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RoomConfigFile {
    id: String,
    source: String,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LightingConfigFile {
    #[serde(flatten)]
    base: LightingConfig,
    day: Option<ThresholdOverrides>,
    night: Option<ThresholdOverrides>,
}

#[derive(Debug, Deserialize, Default)]
struct AutomationConfigFile {
    no_person_timeout_secs: Option<u64>,
    user_response_timeout_secs: Option<u64>,
    person_confidence_threshold: Option<f32>,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: String,
    /// Log actuator and notification calls instead of performing them.
    pub dry_run: bool,
    pub target_fps: u32,
    pub api_addr: String,
    pub api_token_path: Option<PathBuf>,
    pub rooms: Vec<RoomSettings>,
    pub actuator: EndpointSettings,
    pub notifications: EndpointSettings,
    pub presence: EndpointSettings,
    pub lighting: LightingConfig,
    pub lighting_day: Option<ThresholdOverrides>,
    pub lighting_night: Option<ThresholdOverrides>,
    pub sampler: SamplerConfig,
    pub automation: AutomationConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomSettings {
    pub id: String,
    /// Frame source: an image directory or `stub://<name>`.
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSettings {
    pub url: Option<String>,
    pub timeout: Duration,
}

impl EndpointSettings {
    fn from_file(file: Option<EndpointConfigFile>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            url: file.url.filter(|url| !url.trim().is_empty()),
            timeout: Duration::from_millis(file.timeout_ms.unwrap_or(5_000)),
        }
    }
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LIGHTWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .as_ref()
            .and_then(|api| api.addr.clone())
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let api_token_path = file.api.and_then(|api| api.token_path);
        let rooms = match file.rooms {
            Some(rooms) => rooms
                .into_iter()
                .map(|room| RoomSettings {
                    id: room.id,
                    source: room.source,
                })
                .collect(),
            None => vec![RoomSettings {
                id: DEFAULT_ROOM_ID.to_string(),
                source: DEFAULT_ROOM_SOURCE.to_string(),
            }],
        };
        let lighting = file.lighting.unwrap_or_default();
        let automation_file = file.automation.unwrap_or_default();
        let automation = AutomationConfig {
            no_person_timeout: Duration::from_secs(
                automation_file
                    .no_person_timeout_secs
                    .unwrap_or(DEFAULT_NO_PERSON_TIMEOUT_SECS),
            ),
            user_response_timeout: Duration::from_secs(
                automation_file
                    .user_response_timeout_secs
                    .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECS),
            ),
            person_confidence_threshold: automation_file
                .person_confidence_threshold
                .unwrap_or(DEFAULT_PERSON_CONFIDENCE),
        };
        Ok(Self {
            db_path,
            dry_run: file.dry_run.unwrap_or(false),
            target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            api_addr,
            api_token_path,
            rooms,
            actuator: EndpointSettings::from_file(file.actuator),
            notifications: EndpointSettings::from_file(file.notifications),
            presence: EndpointSettings::from_file(file.presence),
            lighting: lighting.base,
            lighting_day: lighting.day,
            lighting_night: lighting.night,
            sampler: file.sampler.unwrap_or_default(),
            automation,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("LIGHTWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("LIGHTWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("LIGHTWATCH_API_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.api_token_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var("LIGHTWATCH_ACTUATOR_URL") {
            if !url.trim().is_empty() {
                self.actuator.url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("LIGHTWATCH_NOTIFY_URL") {
            if !url.trim().is_empty() {
                self.notifications.url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("LIGHTWATCH_PRESENCE_URL") {
            if !url.trim().is_empty() {
                self.presence.url = Some(url);
            }
        }
        if let Ok(rooms) = std::env::var("LIGHTWATCH_ROOMS") {
            let parsed = parse_rooms(&rooms)?;
            if !parsed.is_empty() {
                self.rooms = parsed;
            }
        }
        if let Ok(value) = std::env::var("LIGHTWATCH_DRY_RUN") {
            self.dry_run = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Ok(secs) = std::env::var("LIGHTWATCH_NO_PERSON_TIMEOUT_SECS") {
            let seconds: u64 = secs.parse().map_err(|_| {
                anyhow!("LIGHTWATCH_NO_PERSON_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.automation.no_person_timeout = Duration::from_secs(seconds);
        }
        if let Ok(secs) = std::env::var("LIGHTWATCH_RESPONSE_TIMEOUT_SECS") {
            let seconds: u64 = secs.parse().map_err(|_| {
                anyhow!("LIGHTWATCH_RESPONSE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.automation.user_response_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.rooms.is_empty() {
            return Err(anyhow!("at least one room must be configured"));
        }
        for room in &mut self.rooms {
            room.id = room.id.to_lowercase();
            crate::validate_room_id(&room.id)?;
            if room.source.trim().is_empty() {
                return Err(anyhow!("room '{}' has an empty frame source", room.id));
            }
        }
        let mut ids: Vec<&str> = self.rooms.iter().map(|room| room.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.rooms.len() {
            return Err(anyhow!("room ids must be unique"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        for endpoint in [&self.actuator, &self.notifications, &self.presence] {
            if let Some(url) = &endpoint.url {
                url::Url::parse(url).map_err(|e| anyhow!("invalid endpoint url {}: {}", url, e))?;
            }
        }
        if !self.dry_run && self.actuator.url.is_none() {
            return Err(anyhow!(
                "actuator url must be configured unless dry_run is enabled"
            ));
        }
        self.lighting.validate()?;
        for section in [&self.lighting_day, &self.lighting_night].into_iter().flatten() {
            section.apply(&self.lighting).validate()?;
        }
        self.sampler.validate()?;
        self.automation.validate()?;
        Ok(())
    }

    /// Lighting configuration for the given local hour: day overrides apply
    /// from 06:00 to 19:59, night overrides otherwise.
    pub fn lighting_for_hour(&self, hour: u32) -> LightingConfig {
        let section = match Section::for_hour(hour) {
            Section::Day => &self.lighting_day,
            Section::Night => &self.lighting_night,
        };
        match section {
            Some(overrides) => overrides.apply(&self.lighting),
            None => self.lighting.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parses `room=source,room=source`.
fn parse_rooms(value: &str) -> Result<Vec<RoomSettings>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, source) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("LIGHTWATCH_ROOMS entry '{}' must be room=source", entry))?;
            Ok(RoomSettings {
                id: id.trim().to_string(),
                source: source.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lighting_config_is_valid() {
        LightingConfig::default().validate().unwrap();
        SamplerConfig::default().validate().unwrap();
        AutomationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let cfg = LightingConfig {
            brightness_threshold_low: 120.0,
            brightness_threshold_high: 120.0,
            ..LightingConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("must be greater than"), "{err}");

        let cfg = LightingConfig {
            bright_pixel_ratio_on: 0.05,
            bright_pixel_ratio_off: 0.10,
            ..LightingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_mismatched_roi_weights() {
        let cfg = LightingConfig {
            roi_regions: vec![Roi::new(0, 0, 10, 10)],
            roi_weights: vec![1.0, 2.0],
            ..LightingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_sampler_gap_inversion() {
        let cfg = SamplerConfig {
            min_frame_gap: 10,
            max_frame_gap: 5,
            ..SamplerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = ThresholdOverrides {
            brightness_threshold_low: Some(20.0),
            ..ThresholdOverrides::default()
        };
        let cfg = overrides.apply(&LightingConfig::default());
        assert_eq!(cfg.brightness_threshold_low, 20.0);
        assert_eq!(cfg.brightness_threshold_high, 120.0);
    }

    #[test]
    fn parses_room_list() {
        let rooms = parse_rooms("kitchen=stub://a, hall=/var/frames/hall").unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[1].id, "hall");
        assert_eq!(rooms[1].source, "/var/frames/hall");
        assert!(parse_rooms("kitchen").is_err());
    }
}
