// src/session/record.rs

//! Session records, identities and read-only snapshots.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::registry::CommandDescriptor;
use crate::types::{KillReason, SessionStatus};

/// Opaque, globally unique session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(SessionId)
    }
}

/// One captured line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogLine {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

/// Live handle to a session's OS process.
///
/// The process itself is owned by its supervisor task; this is the control
/// end the registry holds while the session is running. Sending on `stop`
/// asks the supervisor to run the SIGTERM/grace/SIGKILL sequence.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop: oneshot::Sender<KillReason>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, stop: oneshot::Sender<KillReason>) -> Self {
        Self { pid, stop }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the supervisor to stop the process. Returns `false` if the
    /// supervisor has already gone away.
    pub fn request_stop(self, reason: KillReason) -> bool {
        self.stop.send(reason).is_ok()
    }
}

/// Mutable session record. Only `SessionStore` touches these fields.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) category: String,
    pub(crate) command: String,
    pub(crate) status: SessionStatus,
    pub(crate) output: Vec<LogLine>,
    pub(crate) error: Vec<LogLine>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) exit_code: Option<i32>,
    pub(crate) handle: Option<ProcessHandle>,
    /// Text bytes stored across both logs, for the per-session cap.
    pub(crate) log_bytes: usize,
    pub(crate) truncated: bool,
}

impl Session {
    pub(crate) fn start(id: SessionId, descriptor: &CommandDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id,
            category: descriptor.category.clone(),
            command: descriptor.command.clone(),
            status: SessionStatus::Running,
            output: Vec::new(),
            error: Vec::new(),
            started_at: now,
            ended_at: None,
            exit_code: None,
            handle: None,
            log_bytes: 0,
            truncated: false,
        }
    }

    pub fn output(&self) -> &[LogLine] {
        &self.output
    }

    pub fn error(&self) -> &[LogLine] {
        &self.error
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let end = self.ended_at.unwrap_or(now);
        let duration_ms = (end - self.started_at).num_milliseconds().max(0) as u64;

        SessionSnapshot {
            id: self.id,
            category: self.category.clone(),
            command: self.command.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            exit_code: self.exit_code,
            duration_ms,
            output_lines: self.output.len(),
            error_lines: self.error.len(),
        }
    }
}

/// Read-only view of a session handed to callers outside the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub category: String,
    pub command: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Wall-clock time from start to end (or to the snapshot, while running).
    pub duration_ms: u64,
    pub output_lines: usize,
    pub error_lines: usize,
}
