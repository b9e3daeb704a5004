//! User notifications asking whether lights in an empty room may go off.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::Serialize;

use crate::epoch_secs;

pub const NOTIFICATION_TYPE: &str = "light_control";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    TurnOff,
    KeepOn,
    Dismiss,
}

impl UserAction {
    pub const ALL: [UserAction; 3] = [UserAction::TurnOff, UserAction::KeepOn, UserAction::Dismiss];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::TurnOff => "turn_off",
            UserAction::KeepOn => "keep_on",
            UserAction::Dismiss => "dismiss",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "turn_off" => Ok(UserAction::TurnOff),
            "keep_on" => Ok(UserAction::KeepOn),
            "dismiss" => Ok(UserAction::Dismiss),
            other => Err(anyhow!("unknown user action: {}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: String,
    pub room: String,
    pub message: String,
    pub issued_at: SystemTime,
    pub response_timeout: Duration,
    pub actions: Vec<UserAction>,
}

#[derive(Serialize)]
struct NotificationPayload<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    room: &'a str,
    message: &'a str,
    timestamp: u64,
    timeout: u64,
    actions: &'a [UserAction],
}

impl Notification {
    /// Build the "nobody seems to be here" prompt for a room.
    pub fn no_person(
        room: &str,
        idle: Duration,
        issued_at: SystemTime,
        response_timeout: Duration,
    ) -> Self {
        let minutes = idle.as_secs() / 60;
        let message = if minutes >= 1 {
            format!(
                "Lights are on in {} but nobody has been seen for {} min. Turn them off?",
                room, minutes
            )
        } else {
            format!(
                "Lights are on in {} but nobody has been seen for {} s. Turn them off?",
                room,
                idle.as_secs()
            )
        };
        Self {
            id: new_notification_id(room),
            room: room.to_string(),
            message,
            issued_at,
            response_timeout,
            actions: UserAction::ALL.to_vec(),
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let payload = NotificationPayload {
            id: &self.id,
            kind: NOTIFICATION_TYPE,
            room: &self.room,
            message: &self.message,
            timestamp: epoch_secs(self.issued_at),
            timeout: self.response_timeout.as_secs(),
            actions: &self.actions,
        };
        serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
    }
}

fn new_notification_id(room: &str) -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", room, hex::encode(bytes))
}

pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver the notification. `Ok` means the receiver accepted it.
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Posts the JSON payload to a notification endpoint.
pub struct HttpNotificationChannel {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpNotificationChannel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("invalid notification url {endpoint}"))?;
        Ok(Self {
            endpoint: parsed.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }
}

impl NotificationChannel for HttpNotificationChannel {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_string(&notification.payload()).context("encode notification")?;
        self.agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| anyhow!("notification post to {} failed: {}", self.endpoint, e))?;
        log::info!("notification {} delivered", notification.id);
        Ok(())
    }
}

/// Writes notifications to the log; used in dry-run mode and when no
/// endpoint is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotificationChannel;

impl NotificationChannel for LogNotificationChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "notification {} for room '{}': {}",
            notification.id,
            notification.room,
            notification.message
        );
        Ok(())
    }
}
