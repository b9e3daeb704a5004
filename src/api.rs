//! Loopback HTTP API for notification responses and status.
//!
//! Routes:
//! - `GET /health` (no token)
//! - `GET /status` room summaries
//! - `GET /log` recent automation log entries
//! - `POST /notifications/<id>/<turn_off|keep_on|dismiss>`
//!
//! Everything but `/health` needs `Authorization: Bearer <token>`; tokens in
//! the query string are refused.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::Serialize;

use crate::automation::{AutomationController, ResponseOutcome, RoomStatus};
use crate::notify::UserAction;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8798".to_string(),
            token_path: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// Random bearer token valid for the lifetime of the server.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        let diff = presented
            .iter()
            .zip(self.token.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    controller: AutomationController,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, controller: AutomationController) -> Self {
        Self { cfg, controller }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let capability = CapabilityToken::generate();
        let token = capability.token_hex();
        match &self.cfg.token_path {
            Some(path) => write_token_file(path, &token)?,
            None => log::warn!(
                "response api token not persisted; set LIGHTWATCH_API_TOKEN_PATH to store it"
            ),
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let controller = self.controller;
        let join = std::thread::Builder::new()
            .name("lightwatch-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &controller, &capability, shutdown_thread) {
                    log::error!("response api stopped: {}", err);
                }
            })?;
        log::info!("response api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            token,
            token_path: self.cfg.token_path,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    controller: &AutomationController,
    capability: &CapabilityToken,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, controller, capability) {
                    log::warn!("response api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusBody {
    rooms: Vec<RoomStatus>,
}

fn handle_connection(
    mut stream: TcpStream,
    controller: &AutomationController,
    capability: &CapabilityToken,
) -> Result<()> {
    // Accepted sockets may inherit the listener's nonblocking flag.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let route = Route::parse(&request.method, &request.path);
    match route {
        Route::Health => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
            return Ok(());
        }
        Route::MethodNotAllowed => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        Route::NotFound => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
        Route::Status | Route::Log | Route::Respond { .. } => {}
    }

    if request.has_query_param("token") {
        write_json_response(
            &mut stream,
            400,
            r#"{"error":"token_query_param_not_allowed"}"#,
        )?;
        return Ok(());
    }
    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
            return Ok(());
        }
    };
    if let Err(err) = capability.validate(&token) {
        write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
        return Err(err);
    }

    match route {
        Route::Status => {
            let rooms = controller
                .rooms()
                .iter()
                .filter_map(|room| controller.status(room))
                .collect();
            let payload = serde_json::to_vec(&StatusBody { rooms })?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        Route::Log => {
            let limit = request
                .query_param("limit")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_LOG_LIMIT);
            let entries = controller.recent_log(limit)?;
            let payload = serde_json::to_vec(&entries)?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        Route::Respond { id, action } => {
            let action: UserAction = match action.parse() {
                Ok(action) => action,
                Err(_) => {
                    write_json_response(&mut stream, 400, r#"{"error":"unknown_action"}"#)?;
                    return Ok(());
                }
            };
            match controller.respond(&id, action)? {
                ResponseOutcome::Ignored => {
                    write_json_response(
                        &mut stream,
                        404,
                        r#"{"error":"unknown_notification"}"#,
                    )?;
                }
                outcome => {
                    let payload = serde_json::to_vec(&outcome)?;
                    write_response(&mut stream, 200, "application/json", &payload)?;
                }
            }
        }
        Route::Health | Route::MethodNotAllowed | Route::NotFound => {}
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Health,
    Status,
    Log,
    Respond { id: String, action: String },
    MethodNotAllowed,
    NotFound,
}

impl Route {
    fn parse(method: &str, path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let (expected, route) = match segments.as_slice() {
            ["health"] => ("GET", Route::Health),
            ["status"] => ("GET", Route::Status),
            ["log"] => ("GET", Route::Log),
            ["notifications", id, action] if !id.is_empty() && !action.is_empty() => (
                "POST",
                Route::Respond {
                    id: id.to_string(),
                    action: action.to_string(),
                },
            ),
            _ => return Route::NotFound,
        };
        if method != expected {
            return Route::MethodNotAllowed;
        }
        route
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        raw_path: raw_path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    raw_path: String,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        let value = self.headers.get("authorization")?;
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
            return Some(parts[1].to_string());
        }
        None
    }

    fn query_param(&self, key: &str) -> Option<&str> {
        let query = self.raw_path.split('?').nth(1)?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    fn has_query_param(&self, key: &str) -> bool {
        self.query_param(key).is_some()
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
