use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use lightwatch::api::{ApiConfig, ApiHandle, ApiServer};
use lightwatch::testing::{
    ManualClock, ManualScheduler, RecordingActuator, RecordingNotifier, ScriptedPresence,
};
use lightwatch::{
    AutomationConfig, AutomationController, ClassifierRegistry, Collaborators, Frame,
    InMemoryAutomationLog, LightCommand, LightingConfig,
};

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

struct TestApi {
    controller: AutomationController,
    scheduler: ManualScheduler,
    actuator: RecordingActuator,
    notifier: RecordingNotifier,
    presence: ScriptedPresence,
    _dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(clock.clone());
        let actuator = RecordingActuator::new();
        let notifier = RecordingNotifier::new();
        let presence = ScriptedPresence::new();
        let controller = AutomationController::new(
            AutomationConfig::default(),
            ClassifierRegistry::new(LightingConfig::default())?,
            Collaborators {
                presence: Box::new(presence.clone()),
                actuator: Arc::new(actuator.clone()),
                notifier: Arc::new(notifier.clone()),
                scheduler: Arc::new(scheduler.clone()),
                clock: Arc::new(clock),
                log: Box::new(InMemoryAutomationLog::new()),
            },
        )?;

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            token_path: Some(dir.path().join("api.token")),
        };
        let api_handle = ApiServer::new(api_config, controller.clone()).spawn()?;

        Ok(Self {
            controller,
            scheduler,
            actuator,
            notifier,
            presence,
            _dir: dir,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(&self, method: &str, path: &str, token: Option<&str>) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let auth = token
            .map(|t| format!("Authorization: Bearer {t}\r\n"))
            .unwrap_or_default();
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\n{auth}Content-Length: 0\r\n\r\n"
        );
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    /// Drive the den into a pending "turn the lights off?" prompt.
    fn pending_notification(&self) -> String {
        let frame = Frame::uniform(32, 24, 200).expect("frame");
        self.presence.set_present(true);
        self.controller.process("den", &frame).expect("process");
        self.presence.set_present(false);
        self.scheduler.advance(Duration::from_secs(130));
        self.controller.process("den", &frame).expect("process");
        self.notifier.last_id().expect("notification sent")
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_needs_no_token() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.request("GET", "/health", None)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(serde_json::from_str::<Value>(&body)?["status"], "ok");
    Ok(())
}

#[test]
fn token_is_written_to_configured_path() -> Result<()> {
    let api = TestApi::new()?;
    let path = api.handle().token_path.clone().expect("token path");
    let stored = std::fs::read_to_string(path)?;
    assert_eq!(stored.trim(), api.handle().token);
    Ok(())
}

#[test]
fn api_rejects_missing_and_invalid_tokens() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.request("GET", "/status", None)?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("missing_token"));

    let (headers, body) = api.request("GET", "/status", Some(&"00".repeat(32)))?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("invalid_token"));

    let (headers, _) = api.request("GET", "/status", Some("not-hex"))?;
    assert!(headers.contains("401 Unauthorized"));
    Ok(())
}

#[test]
fn api_rejects_query_param_token() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.handle().token.clone();
    let (headers, body) = api.request("GET", &format!("/status?token={token}"), None)?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("token_query_param_not_allowed"));
    Ok(())
}

#[test]
fn status_lists_tracked_rooms() -> Result<()> {
    let api = TestApi::new()?;
    let id = api.pending_notification();
    let token = api.handle().token.clone();

    let (headers, body) = api.request("GET", "/status", Some(&token))?;
    assert!(headers.contains("200 OK"));
    let json: Value = serde_json::from_str(&body)?;
    let rooms = json["rooms"].as_array().expect("rooms array");
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["room"], "den");
    assert_eq!(rooms[0]["lights_on"], true);
    assert_eq!(rooms[0]["pending_notification"], Value::String(id));
    Ok(())
}

#[test]
fn responding_turns_lights_off_once() -> Result<()> {
    let api = TestApi::new()?;
    let id = api.pending_notification();
    let token = api.handle().token.clone();

    let (headers, body) =
        api.request("POST", &format!("/notifications/{id}/turn_off"), Some(&token))?;
    assert!(headers.contains("200 OK"), "{headers}");
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["outcome"], "handled");
    assert_eq!(json["lights_on"], false);
    assert_eq!(api.actuator.count(LightCommand::Off), 1);
    assert_eq!(api.scheduler.pending(), 0);

    let (headers, body) =
        api.request("POST", &format!("/notifications/{id}/turn_off"), Some(&token))?;
    assert!(headers.contains("404 Not Found"));
    assert!(body.contains("unknown_notification"));

    let (headers, body) = api.request("GET", "/log?limit=1", Some(&token))?;
    assert!(headers.contains("200 OK"));
    let entries: Value = serde_json::from_str(&body)?;
    assert_eq!(entries[0]["action"], "user_turn_off");
    Ok(())
}

#[test]
fn rejects_unknown_actions_and_wrong_methods() -> Result<()> {
    let api = TestApi::new()?;
    let id = api.pending_notification();
    let token = api.handle().token.clone();

    let (headers, body) =
        api.request("POST", &format!("/notifications/{id}/snooze"), Some(&token))?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("unknown_action"));

    let (headers, _) = api.request("GET", &format!("/notifications/{id}/turn_off"), Some(&token))?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = api.request("GET", "/events", Some(&token))?;
    assert!(headers.contains("404 Not Found"));

    assert_eq!(api.actuator.count(LightCommand::Off), 0);
    Ok(())
}
