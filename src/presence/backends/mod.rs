mod http;
mod stub;

pub use http::HttpPresenceDetector;
pub use stub::StubPresence;
