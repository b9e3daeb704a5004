//! Light actuator clients.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightCommand {
    On,
    Off,
}

impl LightCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightCommand::On => "on",
            LightCommand::Off => "off",
        }
    }
}

impl fmt::Display for LightCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the relay reported back, if anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorStatus {
    pub lights_on: Option<bool>,
    pub detail: Option<String>,
}

pub trait Actuator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue the command. `Ok` means the relay accepted it.
    fn send(&self, room: &str, command: LightCommand) -> Result<ActuatorStatus>;
}

/// Relay controller reachable over HTTP: `POST <base>/light` with form
/// fields `state` and `room`.
pub struct HttpActuator {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpActuator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut endpoint = url::Url::parse(base_url)
            .with_context(|| format!("invalid actuator url {base_url}"))?;
        // `light` goes after any base path: /relay1 -> /relay1/light.
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("actuator url {base_url} cannot take a path"))?
            .pop_if_empty()
            .push("light");
        let endpoint = endpoint.to_string();
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { endpoint, agent })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Actuator for HttpActuator {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&self, room: &str, command: LightCommand) -> Result<ActuatorStatus> {
        let response = self
            .agent
            .post(&self.endpoint)
            .send_form(&[("state", command.as_str()), ("room", room)])
            .map_err(|e| anyhow!("actuator request to {} failed: {}", self.endpoint, e))?;
        let body = response.into_string().context("read actuator response")?;
        Ok(parse_status(&body))
    }
}

/// The relay answers with JSON when it can; anything else is kept as detail.
fn parse_status(body: &str) -> ActuatorStatus {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return ActuatorStatus::default();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => ActuatorStatus {
            lights_on: value
                .get("lights_on")
                .and_then(|v| v.as_bool())
                .or_else(|| value.get("state").and_then(|v| v.as_str()).map(|s| s == "on")),
            detail: value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        },
        Err(_) => ActuatorStatus {
            lights_on: None,
            detail: Some(trimmed.to_string()),
        },
    }
}

/// Logs commands instead of sending them.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunActuator;

impl Actuator for DryRunActuator {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn send(&self, room: &str, command: LightCommand) -> Result<ActuatorStatus> {
        log::info!("dry run: would switch lights {} in room '{}'", command, room);
        Ok(ActuatorStatus {
            lights_on: Some(command == LightCommand::On),
            detail: Some("dry run".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_joined_onto_base() {
        let a = HttpActuator::new("http://192.168.1.40/", Duration::from_secs(5)).unwrap();
        assert_eq!(a.endpoint(), "http://192.168.1.40/light");
        let a = HttpActuator::new("http://192.168.1.40", Duration::from_secs(5)).unwrap();
        assert_eq!(a.endpoint(), "http://192.168.1.40/light");
        let a = HttpActuator::new("http://192.168.1.40/relay1", Duration::from_secs(5)).unwrap();
        assert_eq!(a.endpoint(), "http://192.168.1.40/relay1/light");
        let a = HttpActuator::new("http://192.168.1.40/relay1/", Duration::from_secs(5)).unwrap();
        assert_eq!(a.endpoint(), "http://192.168.1.40/relay1/light");
        assert!(HttpActuator::new("not a url", Duration::from_secs(5)).is_err());
        assert!(HttpActuator::new("mailto:relay@example.com", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(
            parse_status(r#"{"state":"on","message":"ok"}"#),
            ActuatorStatus {
                lights_on: Some(true),
                detail: Some("ok".to_string())
            }
        );
        assert_eq!(parse_status(r#"{"lights_on":false}"#).lights_on, Some(false));
        assert_eq!(parse_status("OK").detail.as_deref(), Some("OK"));
        assert_eq!(parse_status(""), ActuatorStatus::default());
    }

    #[test]
    fn dry_run_reports_requested_state() {
        let status = DryRunActuator.send("kitchen", LightCommand::Off).unwrap();
        assert_eq!(status.lights_on, Some(false));
    }
}
