// src/exec/cancel.rs

//! Cancellation protocol.
//!
//! Killing a session happens in two halves:
//!
//! 1. [`cancel_session`] performs the registry transition to `Killed` under
//!    the registry lock. From that moment every caller observes `Killed`,
//!    whatever the OS process is still doing.
//! 2. The released process handle asks the session's supervisor to stop the
//!    process, which runs [`terminate`]: SIGTERM to the process group, a
//!    grace period, then SIGKILL.
//!
//! Manual kills and timeouts both go through here.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::format_duration;
use crate::engine::Shared;
use crate::errors::{OrchestratorError, Result};
use crate::events::SessionEvent;
use crate::session::{CancelOutcome, LogLine, SessionId};
use crate::types::{KillOutcome, KillReason};

/// Final error line of a manually killed session.
pub const MANUAL_KILL_MESSAGE: &str = "Process terminated by request";

/// Final error line of a session that ran past its timeout.
pub fn timeout_kill_message(timeout: Duration) -> String {
    format!(
        "Process forcibly terminated after exceeding timeout of {}",
        format_duration(timeout)
    )
}

/// Move `id` to `Killed` and ask its supervisor to stop the process.
pub(crate) fn cancel_session(
    shared: &Shared,
    id: SessionId,
    reason: KillReason,
    message: &str,
) -> Result<KillOutcome> {
    let outcome = shared.with_store(|store, bus| {
        let now = Utc::now();
        let outcome = store.cancel(id, reason, message, now)?;
        if matches!(outcome, CancelOutcome::Killed(_)) {
            bus.publish(SessionEvent::Error {
                session_id: id,
                line: LogLine::new(now, message),
            });
            bus.publish(SessionEvent::SessionKilled {
                session_id: id,
                reason,
            });
        }
        Ok::<_, OrchestratorError>(outcome)
    })?;

    match outcome {
        CancelOutcome::Killed(handle) => {
            info!(session_id = %id, ?reason, "session killed");
            match handle {
                Some(handle) => {
                    let pid = handle.pid();
                    if !handle.request_stop(reason) {
                        debug!(session_id = %id, ?pid, "supervisor already gone; nothing to stop");
                    }
                }
                // Spawn still in flight: the supervisor sees the session is
                // no longer running when it tries to attach, and stops the
                // process itself.
                None => debug!(session_id = %id, "killed before process handle was attached"),
            }
            Ok(KillOutcome::Killed)
        }
        CancelOutcome::AlreadyTerminal(status) => {
            debug!(session_id = %id, %status, "kill requested for finished session");
            Ok(KillOutcome::AlreadyTerminal(status))
        }
    }
}

/// How a process ended once we started stopping it.
#[derive(Debug)]
pub(crate) enum Termination {
    /// The process and everything it forked exited within the grace period.
    Graceful(ExitStatus),
    /// Something in the process group had to be force-killed.
    Forced,
}

/// Poll interval while waiting for a process group to empty.
#[cfg(unix)]
const GROUP_POLL: Duration = Duration::from_millis(25);

/// Stop `child` and its process group: polite signal, `grace` to comply,
/// then force.
///
/// The leader exiting is not enough. Whatever it forked gets the rest of the
/// grace period and is then SIGKILLed along with the group.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> io::Result<Termination> {
    // `child.id()` is gone once the leader is reaped; the group id is not.
    let group = child.id();
    let deadline = tokio::time::Instant::now() + grace;

    if let Some(status) = child.try_wait()? {
        // The leader is gone already; its group still gets the polite signal.
        #[cfg(unix)]
        if let Some(pgid) = group {
            kill_group(pgid, libc::SIGTERM);
        }
        return Ok(settle_group(group, deadline, status).await);
    }

    #[cfg(unix)]
    {
        if let Some(pid) = group {
            signal_group(pid, libc::SIGTERM);
        }

        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => return Ok(settle_group(group, deadline, status?).await),
            Err(_) => {
                warn!(
                    pid = ?group,
                    grace_ms = grace.as_millis() as u64,
                    "process ignored SIGTERM; sending SIGKILL"
                );
                if let Some(pid) = group {
                    signal_group(pid, libc::SIGKILL);
                }
            }
        }
    }

    child.kill().await?;
    Ok(Termination::Forced)
}

/// The leader has exited with `status`; wait until `deadline` for the rest of
/// its group, then kill whatever is left.
async fn settle_group(
    group: Option<u32>,
    deadline: tokio::time::Instant,
    status: ExitStatus,
) -> Termination {
    #[cfg(unix)]
    if let Some(pgid) = group {
        while group_alive(pgid) {
            if tokio::time::Instant::now() >= deadline {
                warn!(pgid, "process group outlived its leader; sending SIGKILL");
                kill_group(pgid, libc::SIGKILL);
                return Termination::Forced;
            }
            tokio::time::sleep(GROUP_POLL).await;
        }
    }

    #[cfg(not(unix))]
    let _ = (group, deadline);

    Termination::Graceful(status)
}

/// SIGKILL whatever is left in the process group `pgid` after its leader
/// exited on its own. Returns whether anything was left.
pub(crate) fn kill_leftovers(pgid: Option<u32>) -> bool {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        if group_alive(pgid) {
            return kill_group(pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    let _ = pgid;

    false
}

/// Signal the process group led by `pid`, falling back to the process alone
/// if the group is already gone. Only valid while `pid` is unreaped.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    if kill_group(pid, signal) {
        return;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        debug!(pid, signal, error = %io::Error::last_os_error(), "signal not delivered");
    }
}

/// Signal every member of process group `pgid`. Returns whether the group
/// existed.
#[cfg(unix)]
fn kill_group(pgid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    // SAFETY: as in `signal_group`.
    unsafe { libc::kill(-pgid, signal) == 0 }
}

/// Whether any process, zombies included, is still in group `pgid`.
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    kill_group(pgid, 0)
}
