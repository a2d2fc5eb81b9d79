// src/types.rs

//! Small shared enums used across the registry, events and boundary API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// `Running` is the only non-terminal state. Every other state is final:
/// once reached, the session's logs are frozen and it only waits for the
/// garbage collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Running)
    }

    /// Status for a process that exited on its own with `code`.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Killed => "killed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which captured stream to read back from a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Output,
    Error,
    #[default]
    All,
}

impl FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "output" | "stdout" => Ok(LogStream::Output),
            "error" | "stderr" => Ok(LogStream::Error),
            "all" => Ok(LogStream::All),
            other => Err(format!(
                "invalid log stream: {other} (expected \"output\", \"error\" or \"all\")"
            )),
        }
    }
}

/// Filter for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFilter {
    #[default]
    All,
    Running,
}

impl FromStr for ListFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ListFilter::All),
            "running" => Ok(ListFilter::Running),
            other => Err(format!(
                "invalid session filter: {other} (expected \"all\" or \"running\")"
            )),
        }
    }
}

/// What triggered a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillReason {
    /// Explicit `kill_session` / `kill_all_running`.
    Manual,
    /// The descriptor's wall-clock timeout elapsed.
    Timeout,
}

/// Outcome of a kill request at the orchestrator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "camelCase")]
pub enum KillOutcome {
    /// The session was running and is now `Killed`.
    Killed,
    /// Nothing to do: the session had already finished with this status.
    AlreadyTerminal(SessionStatus),
}
