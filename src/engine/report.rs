// src/engine/report.rs

//! Aggregate statistics and the JSON export of the registry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::{LogLine, SessionSnapshot, SessionStore};
use crate::types::{ListFilter, SessionStatus};

/// Session counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub killed: usize,
}

impl SessionStats {
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a SessionSnapshot>) -> Self {
        let mut stats = SessionStats::default();
        for snap in snapshots {
            stats.total += 1;
            match snap.status {
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Failed => stats.failed += 1,
                SessionStatus::Killed => stats.killed += 1,
            }
        }
        stats
    }
}

/// One session with its full captured logs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExport {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub output: Vec<LogLine>,
    pub error: Vec<LogLine>,
}

/// Everything the registry holds at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryExport {
    pub exported_at: DateTime<Utc>,
    pub stats: SessionStats,
    pub sessions: Vec<SessionExport>,
}

impl RegistryExport {
    pub fn capture(store: &SessionStore, now: DateTime<Utc>) -> Self {
        let sessions: Vec<SessionExport> = store
            .list(ListFilter::All, now)
            .into_iter()
            .filter_map(|snapshot| {
                let session = store.session(snapshot.id)?;
                Some(SessionExport {
                    output: session.output().to_vec(),
                    error: session.error().to_vec(),
                    snapshot,
                })
            })
            .collect();

        Self {
            exported_at: now,
            stats: SessionStats::from_snapshots(sessions.iter().map(|s| &s.snapshot)),
            sessions,
        }
    }
}
