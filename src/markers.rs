//! Crash-resilient job markers.
//!
//! Four files in the company directory record a job's lifecycle:
//! `.running` (started), `.heartbeat` (last liveness touch), `.done` and
//! `.aborted` (terminal). Each file holds the unix timestamp of its last
//! write; readers only look at existence and mtime.
//!
//! There is no locking. Only one job runs per process, and only that job's
//! runner writes its markers.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{BriefrunError, Result};

/// Write the current unix timestamp to `path`, overwriting.
pub fn touch(path: &Path) -> std::io::Result<()> {
    fs::write(path, Utc::now().timestamp().to_string())
}

/// Delete `path`, ignoring absence and permission problems.
pub fn remove_silent(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove marker");
    }
}

pub fn mtime_or_none(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Running,
    Heartbeat,
    Done,
    Aborted,
}

impl MarkerKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Running => ".running",
            Self::Heartbeat => ".heartbeat",
            Self::Done => ".done",
            Self::Aborted => ".aborted",
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Terminal {
    Done,
    Aborted,
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminal::Done => write!(f, "DONE"),
            Terminal::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Marker mtimes at one point in time. `None` means the file is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerSnapshot {
    pub running: Option<SystemTime>,
    pub heartbeat: Option<SystemTime>,
    pub done: Option<SystemTime>,
    pub aborted: Option<SystemTime>,
}

impl MarkerSnapshot {
    /// The terminal marker present, if any. Should both exist, the more
    /// recent one wins.
    pub fn terminal(&self) -> Option<Terminal> {
        match (self.done, self.aborted) {
            (Some(d), Some(a)) if a > d => Some(Terminal::Aborted),
            (Some(_), _) => Some(Terminal::Done),
            (None, Some(_)) => Some(Terminal::Aborted),
            (None, None) => None,
        }
    }
}

/// The markers of one company directory.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    dir: PathBuf,
}

impl MarkerSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: MarkerKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn snapshot(&self) -> MarkerSnapshot {
        MarkerSnapshot {
            running: mtime_or_none(&self.path(MarkerKind::Running)),
            heartbeat: mtime_or_none(&self.path(MarkerKind::Heartbeat)),
            done: mtime_or_none(&self.path(MarkerKind::Done)),
            aborted: mtime_or_none(&self.path(MarkerKind::Aborted)),
        }
    }

    /// Job start: clear stale terminal markers, then write running and
    /// heartbeat.
    pub fn begin(&self) -> Result<()> {
        remove_silent(&self.path(MarkerKind::Done));
        remove_silent(&self.path(MarkerKind::Aborted));
        for kind in [MarkerKind::Running, MarkerKind::Heartbeat] {
            let path = self.path(kind);
            touch(&path)
                .map_err(|e| BriefrunError::storage(format!("touch {}", path.display()), e))?;
        }
        Ok(())
    }

    /// Refresh the heartbeat. Failures are logged, never fatal.
    pub fn touch_heartbeat(&self) {
        let path = self.path(MarkerKind::Heartbeat);
        if let Err(e) = touch(&path) {
            warn!(path = %path.display(), error = %e, "heartbeat touch failed");
        }
    }

    /// Job end: write the terminal marker and drop running and heartbeat.
    /// Runs on cleanup paths, so it never fails.
    pub fn finish(&self, terminal: Terminal) {
        let (write, clear) = match terminal {
            Terminal::Done => (MarkerKind::Done, MarkerKind::Aborted),
            Terminal::Aborted => (MarkerKind::Aborted, MarkerKind::Done),
        };
        let path = self.path(write);
        if let Err(e) = touch(&path) {
            warn!(path = %path.display(), error = %e, "could not write terminal marker");
        }
        remove_silent(&self.path(clear));
        remove_silent(&self.path(MarkerKind::Running));
        remove_silent(&self.path(MarkerKind::Heartbeat));
    }
}

/// Rate-limits heartbeat touches to one per `interval`.
///
/// The first call always touches.
#[derive(Debug)]
pub struct HeartbeatThrottle {
    markers: Option<MarkerSet>,
    interval: Duration,
    last: Option<Instant>,
    touches: u64,
}

impl HeartbeatThrottle {
    pub fn new(markers: MarkerSet, interval: Duration) -> Self {
        Self {
            markers: Some(markers),
            interval,
            last: None,
            touches: 0,
        }
    }

    /// A throttle that never writes anything.
    pub fn disabled() -> Self {
        Self {
            markers: None,
            interval: Duration::MAX,
            last: None,
            touches: 0,
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last
            && now.duration_since(last) < self.interval
        {
            return;
        }
        self.last = Some(now);
        self.touches += 1;
        if let Some(markers) = &self.markers {
            markers.touch_heartbeat();
        }
    }

    /// Number of touches issued so far.
    pub fn touches(&self) -> u64 {
        self.touches
    }
}
