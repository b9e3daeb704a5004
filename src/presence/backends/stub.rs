use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::frame::Frame;
use crate::presence::backend::PresenceDetector;
use crate::presence::result::{Detection, PresenceResult};

/// Stub backend for testing and dry runs. Reports a person whenever its
/// switch is set; the switch can be flipped from another thread.
pub struct StubPresence {
    present: Arc<AtomicBool>,
    confidence: f32,
}

impl StubPresence {
    pub fn new(present: bool) -> Self {
        Self {
            present: Arc::new(AtomicBool::new(present)),
            confidence: 0.9,
        }
    }

    /// Shared switch controlling what the backend reports.
    pub fn handle(&self) -> Arc<AtomicBool> {
        self.present.clone()
    }
}

impl Default for StubPresence {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PresenceDetector for StubPresence {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _frame: &Frame) -> Result<PresenceResult> {
        if self.present.load(Ordering::SeqCst) {
            Ok(PresenceResult {
                detections: vec![Detection::person(self.confidence)],
            })
        } else {
            Ok(PresenceResult::empty())
        }
    }
}
