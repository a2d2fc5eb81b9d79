// src/session/store.rs

//! Pure session registry.
//!
//! `SessionStore` is the single source of truth for what is running and what
//! has run. It is a synchronous, deterministic state machine:
//! - no Tokio runtime, no channels to drive, no processes, no clock
//!   (every operation that needs the time takes `now` explicitly);
//! - every status change goes through one compare-and-set on `Running`, so
//!   the first terminal transition wins and later ones are silent no-ops.
//!
//! The async shell (`engine::Orchestrator`) owns the store behind a single
//! mutex and performs all IO around it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{OrchestratorError, Result};
use crate::registry::{CommandDescriptor, CommandRegistry};
use crate::session::governor::ConcurrencyGovernor;
use crate::session::record::{LogLine, ProcessHandle, Session, SessionId, SessionSnapshot};
use crate::types::{KillReason, ListFilter, LogStream, SessionStatus};

/// Result of a cancellation attempt against the registry.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The session moved to `Killed`. Carries the released process handle,
    /// if one had been attached yet, so the caller can stop the process.
    Killed(Option<ProcessHandle>),
    /// The session had already reached this terminal state; nothing changed.
    AlreadyTerminal(SessionStatus),
}

/// What became of a line handed to [`SessionStore::append_output`] or
/// [`SessionStore::append_error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// The line was stored.
    Stored,
    /// The session's log cap was reached and the line dropped. The first
    /// dropped line carries the notice that was stored in the error log in
    /// its place; later ones carry nothing.
    Truncated(Option<LogLine>),
    /// Unknown or terminal session; nothing stored.
    Closed,
}

/// Captured log bytes kept per session unless configured otherwise.
pub const DEFAULT_MAX_LOG_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionId, Session>,
    governor: ConcurrencyGovernor,
    max_log_bytes: usize,
}

impl SessionStore {
    pub fn new(governor: ConcurrencyGovernor) -> Self {
        Self {
            sessions: HashMap::new(),
            governor,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }

    /// Cap the stdout plus stderr text kept for each session.
    pub fn with_log_limit(mut self, max_log_bytes: usize) -> Self {
        self.max_log_bytes = max_log_bytes;
        self
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions currently `Running`.
    pub fn live_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Running)
            .count()
    }

    pub fn running_ids(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Running)
            .map(|s| s.id)
            .collect()
    }

    /// Admit, resolve and insert a new `Running` session.
    ///
    /// The governor is consulted exactly once, against the live count seen
    /// here, before the command is resolved; any rejection leaves the store
    /// untouched. Returns the new id and the descriptor the session copied.
    pub fn create<'r>(
        &mut self,
        registry: &'r CommandRegistry,
        category: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<(SessionId, &'r CommandDescriptor)> {
        self.governor.admit(self.live_count())?;
        let descriptor = registry.resolve(category, index)?;

        let mut id = SessionId::new();
        while self.sessions.contains_key(&id) {
            id = SessionId::new();
        }

        self.sessions.insert(id, Session::start(id, descriptor, now));
        debug!(session_id = %id, category = %descriptor.category, "session created");
        Ok((id, descriptor))
    }

    /// Direct access to a record (crate-internal and tests).
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get(&self, id: SessionId, now: DateTime<Utc>) -> Result<SessionSnapshot> {
        self.sessions
            .get(&id)
            .map(|s| s.snapshot(now))
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Snapshot listing, oldest first.
    pub fn list(&self, filter: ListFilter, now: DateTime<Utc>) -> Vec<SessionSnapshot> {
        let mut out: Vec<SessionSnapshot> = self
            .sessions
            .values()
            .filter(|s| match filter {
                ListFilter::All => true,
                ListFilter::Running => s.status == SessionStatus::Running,
            })
            .map(|s| s.snapshot(now))
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Captured lines for one stream, or both merged by timestamp.
    ///
    /// The merge is stable with output lines first on equal timestamps; the
    /// relative order of the two streams is best effort only.
    pub fn logs(&self, id: SessionId, stream: LogStream) -> Result<Vec<LogLine>> {
        let session = self.sessions.get(&id).ok_or(OrchestratorError::NotFound(id))?;

        let lines = match stream {
            LogStream::Output => session.output.clone(),
            LogStream::Error => session.error.clone(),
            LogStream::All => {
                let mut merged: Vec<LogLine> = session
                    .output
                    .iter()
                    .chain(session.error.iter())
                    .cloned()
                    .collect();
                merged.sort_by_key(|l| l.timestamp);
                merged
            }
        };
        Ok(lines)
    }

    /// Hand the live process handle to a running session.
    ///
    /// If the session already left `Running` (a kill raced the spawn), the
    /// handle is given back so the caller can stop the process itself.
    pub fn attach_handle(
        &mut self,
        id: SessionId,
        handle: ProcessHandle,
    ) -> std::result::Result<(), ProcessHandle> {
        match self.sessions.get_mut(&id) {
            Some(session) if session.status == SessionStatus::Running => {
                assert!(
                    session.handle.is_none(),
                    "session {id} already has a live process handle"
                );
                session.handle = Some(handle);
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Append a stdout line to a running session.
    pub fn append_output(&mut self, id: SessionId, line: LogLine) -> Appended {
        self.append(id, line, LogStream::Output)
    }

    /// Append a stderr line to a running session.
    pub fn append_error(&mut self, id: SessionId, line: LogLine) -> Appended {
        self.append(id, line, LogStream::Error)
    }

    fn append(&mut self, id: SessionId, line: LogLine, stream: LogStream) -> Appended {
        let max = self.max_log_bytes;
        let Some(session) = self.sessions.get_mut(&id) else {
            return Appended::Closed;
        };
        if session.status != SessionStatus::Running {
            return Appended::Closed;
        }

        if session.truncated {
            return Appended::Truncated(None);
        }
        let len = line.text.len();
        if session.log_bytes.saturating_add(len) > max {
            session.truncated = true;
            let notice = LogLine::new(
                line.timestamp,
                format!("Output truncated after {max} bytes; further lines were dropped"),
            );
            session.error.push(notice.clone());
            debug!(session_id = %id, max_log_bytes = max, "log cap reached; dropping further lines");
            return Appended::Truncated(Some(notice));
        }

        session.log_bytes += len;
        match stream {
            LogStream::Output | LogStream::All => session.output.push(line),
            LogStream::Error => session.error.push(line),
        }
        Appended::Stored
    }

    /// Record a natural process exit.
    ///
    /// Compare-and-set on `Running`: returns `true` only for the caller that
    /// performed the transition. Panics if asked to transition *to* `Running`.
    pub fn mark_terminal(
        &mut self,
        id: SessionId,
        status: SessionStatus,
        exit_code: Option<i32>,
        now: DateTime<Utc>,
    ) -> bool {
        assert!(status.is_terminal(), "mark_terminal called with non-terminal status");

        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.status != SessionStatus::Running {
            debug!(session_id = %id, status = %session.status, "already terminal; ignoring transition");
            return false;
        }

        // Dropping the handle here closes the stop channel; the supervisor
        // that reported the exit no longer listens on it.
        let _released = finish(session, status, exit_code, now);
        true
    }

    /// The process could not be started, or could not be waited on.
    ///
    /// Records `message` as a final error line and moves to `Failed` without
    /// an exit code.
    pub fn fail_with_error(&mut self, id: SessionId, message: &str, now: DateTime<Utc>) -> bool {
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        if session.status != SessionStatus::Running {
            return false;
        }

        session.error.push(LogLine::new(now, message));
        let _released = finish(session, SessionStatus::Failed, None, now);
        true
    }

    /// First half of the cancellation protocol: the registry transition.
    ///
    /// Appends `message` as a final error line and moves the session to
    /// `Killed` immediately; stopping the OS process is the caller's job
    /// with the returned handle.
    pub fn cancel(
        &mut self,
        id: SessionId,
        reason: KillReason,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(OrchestratorError::NotFound(id))?;

        if session.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(session.status));
        }

        session.error.push(LogLine::new(now, message));
        let handle = finish(session, SessionStatus::Killed, None, now);
        debug!(session_id = %id, ?reason, has_handle = handle.is_some(), "session killed");
        Ok(CancelOutcome::Killed(handle))
    }

    /// Remove terminal sessions that ended strictly more than `retention`
    /// before `now`. Running sessions are never removed, whatever their age.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.status.is_terminal())
            .filter(|s| match s.ended_at {
                Some(ended) => (now - ended).to_std().is_ok_and(|age| age > retention),
                None => panic!("terminal session {} has no end time", s.id),
            })
            .map(|s| s.id)
            .collect();

        for id in &expired {
            self.sessions.remove(id);
        }
        expired
    }
}

/// The one place a session leaves `Running`.
fn finish(
    session: &mut Session,
    status: SessionStatus,
    exit_code: Option<i32>,
    now: DateTime<Utc>,
) -> Option<ProcessHandle> {
    assert_eq!(session.status, SessionStatus::Running);
    assert!(
        status != SessionStatus::Killed || exit_code.is_none(),
        "killed sessions never carry an exit code"
    );

    session.status = status;
    session.ended_at = Some(now);
    session.exit_code = exit_code;
    session.handle.take()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use tokio::sync::oneshot;

    use super::*;
    use crate::config::{CategoryConfig, CommandConfig, ConfigFile, RawConfigFile};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn registry() -> CommandRegistry {
        let mut raw = RawConfigFile::default();
        raw.category.insert(
            "security".to_string(),
            CategoryConfig {
                description: "Security checks".to_string(),
                commands: vec![CommandConfig {
                    cmd: "npm run test:security".to_string(),
                    description: "Security audit".to_string(),
                    timeout: None,
                }],
            },
        );
        CommandRegistry::from_config(&ConfigFile::try_from(raw).unwrap())
    }

    fn store(max: usize) -> SessionStore {
        SessionStore::new(ConcurrencyGovernor::new(max))
    }

    fn create(s: &mut SessionStore, reg: &CommandRegistry, at: DateTime<Utc>) -> Result<SessionId> {
        s.create(reg, "security", 0, at).map(|(id, _)| id)
    }

    #[test]
    fn create_inserts_running_session_with_copied_command() {
        let mut s = store(2);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        let snap = s.get(id, t(3)).unwrap();

        assert_eq!(snap.status, SessionStatus::Running);
        assert_eq!(snap.command, "npm run test:security");
        assert_eq!(snap.category, "security");
        assert_eq!(snap.ended_at, None);
        assert_eq!(snap.exit_code, None);
        assert_eq!(snap.duration_ms, 3000);
    }

    #[test]
    fn capacity_rejection_creates_nothing() {
        let mut s = store(2);
        let reg = registry();
        create(&mut s, &reg, t(0)).unwrap();
        create(&mut s, &reg, t(0)).unwrap();

        let err = create(&mut s, &reg, t(1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::CapacityExceeded { max: 2 }));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn terminal_sessions_free_capacity() {
        let mut s = store(1);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        assert!(create(&mut s, &reg, t(1)).is_err());

        assert!(s.mark_terminal(id, SessionStatus::Completed, Some(0), t(2)));
        assert!(create(&mut s, &reg, t(3)).is_ok());
    }

    #[test]
    fn mark_terminal_is_first_writer_wins() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();

        assert!(s.mark_terminal(id, SessionStatus::Failed, Some(2), t(5)));
        assert!(!s.mark_terminal(id, SessionStatus::Completed, Some(0), t(6)));

        let snap = s.get(id, t(10)).unwrap();
        assert_eq!(snap.status, SessionStatus::Failed);
        assert_eq!(snap.exit_code, Some(2));
        assert_eq!(snap.ended_at, Some(t(5)));
        assert_eq!(snap.duration_ms, 5000);
    }

    #[test]
    fn logs_are_frozen_after_terminal() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();

        assert_eq!(s.append_output(id, LogLine::new(t(1), "one")), Appended::Stored);
        assert_eq!(s.append_error(id, LogLine::new(t(2), "warn")), Appended::Stored);
        s.mark_terminal(id, SessionStatus::Completed, Some(0), t(3));
        assert_eq!(s.append_output(id, LogLine::new(t(4), "late")), Appended::Closed);
        assert_eq!(s.append_error(id, LogLine::new(t(4), "late")), Appended::Closed);

        let all = s.logs(id, LogStream::All).unwrap();
        let texts: Vec<_> = all.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "warn"]);
        assert_eq!(s.logs(id, LogStream::Output).unwrap().len(), 1);
        assert_eq!(s.logs(id, LogStream::Error).unwrap().len(), 1);
    }

    #[test]
    fn log_cap_drops_lines_and_notes_truncation_once() {
        let mut s = SessionStore::new(ConcurrencyGovernor::new(4)).with_log_limit(10);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();

        assert_eq!(s.append_output(id, LogLine::new(t(1), "12345")), Appended::Stored);
        assert_eq!(s.append_error(id, LogLine::new(t(1), "678")), Appended::Stored);

        let notice = match s.append_output(id, LogLine::new(t(2), "overflow")) {
            Appended::Truncated(Some(notice)) => notice,
            other => panic!("expected truncation notice, got {other:?}"),
        };
        assert_eq!(
            notice.text,
            "Output truncated after 10 bytes; further lines were dropped"
        );
        // A line that would still fit is dropped too once truncation started.
        assert_eq!(s.append_error(id, LogLine::new(t(3), "9")), Appended::Truncated(None));
        assert_eq!(s.append_output(id, LogLine::new(t(3), "more")), Appended::Truncated(None));

        let output: Vec<_> = s.logs(id, LogStream::Output).unwrap().into_iter().map(|l| l.text).collect();
        let error: Vec<_> = s.logs(id, LogStream::Error).unwrap().into_iter().map(|l| l.text).collect();
        assert_eq!(output, vec!["12345"]);
        assert_eq!(error, vec!["678".to_string(), notice.text]);

        // The cap does not stand in the way of the final transition.
        assert!(s.mark_terminal(id, SessionStatus::Completed, Some(0), t(4)));
    }

    #[test]
    fn cancel_kills_once_and_releases_handle() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        let (tx, mut rx) = oneshot::channel();
        s.attach_handle(id, ProcessHandle::new(Some(42), tx)).unwrap();

        let outcome = s
            .cancel(id, KillReason::Manual, "Process terminated by request", t(1))
            .unwrap();
        let handle = match outcome {
            CancelOutcome::Killed(Some(h)) => h,
            other => panic!("expected Killed with handle, got {other:?}"),
        };
        assert_eq!(handle.pid(), Some(42));
        assert!(handle.request_stop(KillReason::Manual));
        assert_eq!(rx.try_recv().unwrap(), KillReason::Manual);

        let again = s
            .cancel(id, KillReason::Manual, "Process terminated by request", t(2))
            .unwrap();
        assert!(matches!(again, CancelOutcome::AlreadyTerminal(SessionStatus::Killed)));

        let snap = s.get(id, t(3)).unwrap();
        assert_eq!(snap.status, SessionStatus::Killed);
        assert_eq!(snap.exit_code, None);
        assert_eq!(snap.ended_at, Some(t(1)));
        assert_eq!(snap.error_lines, 1);
    }

    #[test]
    fn natural_exit_after_kill_is_ignored() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        s.cancel(id, KillReason::Timeout, "timed out", t(1)).unwrap();

        assert!(!s.mark_terminal(id, SessionStatus::Failed, Some(143), t(2)));
        let snap = s.get(id, t(2)).unwrap();
        assert_eq!(snap.status, SessionStatus::Killed);
        assert_eq!(snap.exit_code, None);
    }

    #[test]
    fn attach_after_kill_returns_handle() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        s.cancel(id, KillReason::Manual, "stop", t(1)).unwrap();

        let (tx, _rx) = oneshot::channel();
        let back = s.attach_handle(id, ProcessHandle::new(Some(7), tx));
        assert!(back.is_err());
    }

    #[test]
    fn spawn_failure_is_failed_without_exit_code() {
        let mut s = store(4);
        let reg = registry();
        let id = create(&mut s, &reg, t(0)).unwrap();
        assert!(s.fail_with_error(id, "No such file or directory", t(0)));

        let snap = s.get(id, t(1)).unwrap();
        assert_eq!(snap.status, SessionStatus::Failed);
        assert_eq!(snap.exit_code, None);
        assert_eq!(s.logs(id, LogStream::Error).unwrap()[0].text, "No such file or directory");
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut s = store(4);
        let ghost = SessionId::new();
        assert!(matches!(s.get(ghost, t(0)), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(s.logs(ghost, LogStream::All), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(
            s.cancel(ghost, KillReason::Manual, "x", t(0)),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(!s.mark_terminal(ghost, SessionStatus::Completed, Some(0), t(0)));
    }

    #[test]
    fn list_filters_running_and_orders_by_start() {
        let mut s = store(4);
        let reg = registry();
        let a = create(&mut s, &reg, t(0)).unwrap();
        let b = create(&mut s, &reg, t(1)).unwrap();
        let c = create(&mut s, &reg, t(2)).unwrap();
        s.mark_terminal(b, SessionStatus::Completed, Some(0), t(3));

        let all: Vec<_> = s.list(ListFilter::All, t(4)).iter().map(|x| x.id).collect();
        assert_eq!(all, vec![a, b, c]);

        let running: Vec<_> = s.list(ListFilter::Running, t(4)).iter().map(|x| x.id).collect();
        assert_eq!(running, vec![a, c]);
        assert_eq!(s.live_count(), 2);
    }

    #[test]
    fn sweep_removes_only_expired_terminal_sessions() {
        let retention = Duration::from_secs(60);
        let mut s = store(4);
        let reg = registry();
        let old_running = create(&mut s, &reg, t(-10_000)).unwrap();
        let expired = create(&mut s, &reg, t(0)).unwrap();
        let boundary = create(&mut s, &reg, t(0)).unwrap();
        let fresh = create(&mut s, &reg, t(0)).unwrap();

        s.mark_terminal(expired, SessionStatus::Completed, Some(0), t(10));
        s.cancel(boundary, KillReason::Manual, "stop", t(40)).unwrap();
        s.mark_terminal(fresh, SessionStatus::Failed, Some(1), t(90));

        // now = 100: expired ended 90s ago, boundary exactly 60s ago.
        let removed = s.sweep(t(100), retention);
        assert_eq!(removed, vec![expired]);
        assert!(s.session(old_running).is_some());
        assert!(s.session(boundary).is_some());
        assert!(s.session(fresh).is_some());

        let removed = s.sweep(t(101), retention);
        assert_eq!(removed, vec![boundary]);
        assert_eq!(s.len(), 2);
    }
}
