mod backend;
mod backends;
mod result;

pub use backend::PresenceDetector;
pub use backends::{HttpPresenceDetector, StubPresence};
pub use result::{Detection, Identity, ObjectClass, PresenceResult};
