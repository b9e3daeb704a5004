use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;
use crate::presence::backend::PresenceDetector;
use crate::presence::result::PresenceResult;

/// Remote person detector: frames are POSTed as PNG, the service answers
/// with a JSON `PresenceResult`.
pub struct HttpPresenceDetector {
    endpoint: String,
    agent: ureq::Agent,
    requests: AtomicU64,
}

impl HttpPresenceDetector {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let parsed = url::Url::parse(endpoint)
            .with_context(|| format!("invalid presence url {endpoint}"))?;
        Ok(Self {
            endpoint: parsed.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            requests: AtomicU64::new(0),
        })
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl PresenceDetector for HttpPresenceDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, frame: &Frame) -> Result<PresenceResult> {
        let png = frame.to_png()?;
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "image/png")
            .send_bytes(&png)
            .map_err(|e| anyhow!("presence request to {} failed: {}", self.endpoint, e))?;
        let body = response.into_string().context("read presence response")?;
        serde_json::from_str(&body).context("parse presence response")
    }
}
