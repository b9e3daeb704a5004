use anyhow::Result;

use crate::frame::Frame;
use crate::presence::result::PresenceResult;

/// Person detector backend.
///
/// Backends receive the full grayscale frame and must not keep it past the
/// `detect` call. One detector is shared by every room worker, so `detect`
/// must be callable concurrently.
pub trait PresenceDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&self, frame: &Frame) -> Result<PresenceResult>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
