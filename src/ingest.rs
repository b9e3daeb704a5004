//! Frame sources for the daemon and tools.
//!
//! A room's source string selects the backend:
//! - `stub://<name>`: synthetic scene alternating between dark and lit;
//! - `http://` / `https://`: JPEG snapshot endpoint polled once per frame;
//! - anything else: a local directory of PNG/JPEG images, played in file
//!   name order.

use std::path::{Path, PathBuf};
use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

const SYNTHETIC_WIDTH: u32 = 160;
const SYNTHETIC_HEIGHT: u32 = 120;
/// Frames per synthetic dark/lit cycle.
const SYNTHETIC_PERIOD: u64 = 40;
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

pub struct FrameSource {
    backend: Backend,
    frames_captured: u64,
    description: String,
}

enum Backend {
    Synthetic(SyntheticSource),
    Directory(DirectorySource),
    Snapshot(SnapshotSource),
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

impl FrameSource {
    pub fn open(source: &str, timeout: Duration) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("frame source must not be empty"));
        }
        let backend = if let Some(name) = trimmed.strip_prefix("stub://") {
            Backend::Synthetic(SyntheticSource::new(name))
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Backend::Snapshot(SnapshotSource::new(trimmed, timeout)?)
        } else if trimmed.contains("://") {
            return Err(anyhow!("unsupported frame source scheme: {}", trimmed));
        } else {
            Backend::Directory(DirectorySource::scan(Path::new(trimmed))?)
        };
        log::info!("frame source opened: {}", trimmed);
        Ok(Self {
            backend,
            frames_captured: 0,
            description: trimmed.to_string(),
        })
    }

    /// Next frame, or `None` once a finite source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match &mut self.backend {
            Backend::Synthetic(source) => Some(source.next_frame()?),
            Backend::Directory(source) => source.next_frame()?,
            Backend::Snapshot(source) => Some(source.next_frame()?),
        };
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            source: self.description.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticSource {
    name: String,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let lit = (self.frame_count / (SYNTHETIC_PERIOD / 2)) % 2 == 1;
        let base: u8 = if lit { 190 } else { 25 };
        self.frame_count += 1;
        let mut pixels = Vec::with_capacity((SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT) as usize);
        for y in 0..SYNTHETIC_HEIGHT {
            for x in 0..SYNTHETIC_WIDTH {
                // Mild gradient so the scene is not perfectly flat.
                let offset = ((x + y) % 16) as u8;
                pixels.push(base.saturating_add(offset));
            }
        }
        log::trace!("synthetic source {} frame {}", self.name, self.frame_count);
        Frame::from_gray(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, pixels)
    }
}

// ----------------------------------------------------------------------------
// Image directory
// ----------------------------------------------------------------------------

struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    fn scan(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no PNG or JPEG images in {}", dir.display()));
        }
        Ok(Self { files, next: 0 })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Frame::open(path).map(Some)
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .is_some_and(|ext| matches!(ext.as_str(), "png" | "jpg" | "jpeg"))
}

// ----------------------------------------------------------------------------
// HTTP snapshot camera
// ----------------------------------------------------------------------------

struct SnapshotSource {
    url: String,
    agent: ureq::Agent,
}

impl SnapshotSource {
    fn new(url: &str, timeout: Duration) -> Result<Self> {
        url::Url::parse(url).with_context(|| format!("invalid snapshot url {url}"))?;
        Ok(Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .context("read snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot from {}", self.url));
        }
        Frame::decode(&bytes)
    }
}
