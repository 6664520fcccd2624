//! Milestone status reporting.
//!
//! Appends one line per lifecycle event to `studip-status.txt` in the user
//! data directory, so tooling outside the mount (shell prompts, the desktop
//! integration) can tell what state the filesystem is in without touching
//! FUSE. The per-node counterpart is the `studip-fuse.contents-status`
//! extended attribute.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use crate::fs::tree::NodeStatus;

/// File name of the status log inside the data directory.
pub const STATUS_FILE_NAME: &str = "studip-status.txt";

/// Per-node contents state, served via `studip-fuse.contents-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentsStatus {
    /// Expansion has not completed yet.
    Pending,
    /// Children (or file metadata) are available.
    Available,
    /// Expansion failed; see `studip-fuse.contents-exception`.
    Failed,
    /// The node is not known.
    Unknown,
    /// The node can never be materialized.
    Unavailable,
}

impl From<NodeStatus> for ContentsStatus {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Pending => Self::Pending,
            NodeStatus::Available => Self::Available,
            NodeStatus::Failed => Self::Failed,
            NodeStatus::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for ContentsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Append-only milestone log.
pub struct StatusReporter {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl StatusReporter {
    /// Open (creating if needed) the status file under `data_dir`.
    pub fn open(data_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STATUS_FILE_NAME);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Where the status file lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `<ISO-8601-UTC> <level> <message>` line. Best effort: a
    /// full disk must not take the filesystem down with it.
    pub fn event(&self, level: &str, message: &str) {
        let line = format!(
            "{} {level} {message}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let result = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("status file lock poisoned"))
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, "could not append to status file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_one_line_each() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reporter = StatusReporter::open(dir.path()).expect("open");
        reporter.event("INFO", "session open");
        reporter.event("INFO", "mount ready");

        let content = std::fs::read_to_string(reporter.path()).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO session open"));
        assert!(lines[1].ends_with("INFO mount ready"));
        // ISO-8601 UTC timestamp up front.
        assert!(lines[0].split(' ').next().expect("ts").ends_with('Z'));
    }

    #[test]
    fn contents_status_renders_the_wire_words() {
        for (status, word) in [
            (ContentsStatus::Pending, "pending"),
            (ContentsStatus::Available, "available"),
            (ContentsStatus::Failed, "failed"),
            (ContentsStatus::Unknown, "unknown"),
            (ContentsStatus::Unavailable, "unavailable"),
        ] {
            assert_eq!(status.to_string(), word);
        }
    }
}
