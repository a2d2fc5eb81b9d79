// src/exec/supervisor.rs

//! Per-session process supervisor.
//!
//! [`launch`] spawns the OS process for a freshly created session and hands
//! it to a background task that:
//! - waits for a natural exit and records `Completed`/`Failed` with the
//!   exit code;
//! - arms the session's wall-clock timeout, which goes through the same
//!   cancellation path as a manual kill;
//! - runs the SIGTERM/grace/SIGKILL sequence when a stop is requested.

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::engine::Shared;
use crate::events::SessionEvent;
use crate::exec::cancel::{self, Termination};
use crate::exec::streams::StreamReaders;
use crate::registry::{split_command_line, CommandDescriptor};
use crate::session::{ProcessHandle, SessionId};
use crate::types::{KillReason, SessionStatus};

/// How long to wait for the pipes to close once the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawn the process for session `id` and start supervising it.
///
/// Must run inside a Tokio runtime. A spawn failure is recorded on the
/// session (status `Failed`, reason in the error log, a `SessionError`
/// event) rather than returned: the session exists either way.
pub(crate) fn launch(shared: &Arc<Shared>, id: SessionId, descriptor: &CommandDescriptor) {
    let mut child = match spawn_child(shared, descriptor) {
        Ok(child) => child,
        Err(err) => {
            let message = format!("{err:#}");
            error!(
                session_id = %id,
                cmd = %descriptor.command,
                error = %message,
                "failed to start process"
            );
            fail_session(shared, id, &message);
            return;
        }
    };

    let pid = child.id();
    info!(
        session_id = %id,
        category = %descriptor.category,
        cmd = %descriptor.command,
        ?pid,
        "process started"
    );

    let readers = StreamReaders::spawn(shared, id, child.stdout.take(), child.stderr.take());

    let (stop_tx, stop_rx) = oneshot::channel();
    let attached = shared.with_store(|store, _| store.attach_handle(id, ProcessHandle::new(pid, stop_tx)));

    let shared = shared.clone();
    let timeout = descriptor.timeout;
    match attached {
        Ok(()) => {
            tokio::spawn(supervise(shared, id, child, pid, readers, stop_rx, timeout));
        }
        Err(_handle) => {
            // Killed between creation and spawn: the registry already says
            // `Killed`, only the process is left to stop.
            debug!(session_id = %id, "session left running state before attach; stopping process");
            tokio::spawn(async move {
                stop_process(&shared, id, &mut child).await;
                readers.drain(id, DRAIN_TIMEOUT).await;
            });
        }
    }
}

fn spawn_child(shared: &Shared, descriptor: &CommandDescriptor) -> anyhow::Result<Child> {
    let (program, args) = split_command_line(&descriptor.command)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .current_dir(shared.service_root())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so termination reaches anything the command forks.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .with_context(|| format!("failed to start '{}'", program))
}

async fn supervise(
    shared: Arc<Shared>,
    id: SessionId,
    mut child: Child,
    pgid: Option<u32>,
    readers: StreamReaders,
    stop_rx: oneshot::Receiver<KillReason>,
    timeout: Duration,
) {
    match supervise_inner(&shared, id, child.wait(), stop_rx, timeout).await {
        Ok(Exit::Natural(code)) => {
            readers.drain(id, DRAIN_TIMEOUT).await;
            if cancel::kill_leftovers(pgid) {
                warn!(session_id = %id, ?pgid, "killed processes left behind by exited command");
            }
            record_exit(&shared, id, code);
        }
        Ok(Exit::Stopped) => {
            stop_process(&shared, id, &mut child).await;
            readers.drain(id, DRAIN_TIMEOUT).await;
        }
        Err(err) => {
            error!(session_id = %id, error = %format!("{err:#}"), "lost track of process");
            stop_process(&shared, id, &mut child).await;
            readers.drain(id, DRAIN_TIMEOUT).await;
            fail_session(&shared, id, &format!("{err:#}"));
        }
    }
}

#[derive(Debug)]
enum Exit {
    /// The process exited on its own with this code (-1 if signalled).
    Natural(i32),
    /// A stop was requested, or nobody can request one any more.
    Stopped,
}

/// Wait for whichever comes first: the exit (`wait`), a stop request, or the
/// timeout. An exit that is already observable wins over the other two.
async fn supervise_inner(
    shared: &Shared,
    id: SessionId,
    wait: impl Future<Output = io::Result<ExitStatus>>,
    mut stop_rx: oneshot::Receiver<KillReason>,
    timeout: Duration,
) -> anyhow::Result<Exit> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    tokio::pin!(wait);
    let mut timer_armed = true;

    loop {
        tokio::select! {
            biased;

            status = &mut wait => {
                let status = status.context("waiting for process")?;
                let code = status.code().unwrap_or(-1);
                info!(session_id = %id, exit_code = code, success = status.success(), "process exited");
                return Ok(Exit::Natural(code));
            }

            stop = &mut stop_rx => {
                match stop {
                    Ok(reason) => {
                        debug!(session_id = %id, ?reason, "stop requested");
                    }
                    Err(_) => {
                        // The session was finished elsewhere and its handle
                        // released without a stop request.
                        debug!(session_id = %id, "stop channel closed; stopping process");
                    }
                }
                return Ok(Exit::Stopped);
            }

            _ = &mut deadline, if timer_armed => {
                timer_armed = false;
                warn!(
                    session_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "session exceeded its timeout"
                );
                let message = cancel::timeout_kill_message(timeout);
                // On success the stop request arrives on `stop_rx` next turn.
                // If something else finished the session first, this is a
                // no-op and that path already owns the outcome.
                cancel::cancel_session(shared, id, KillReason::Timeout, &message)?;
            }
        }
    }
}

async fn stop_process(shared: &Shared, id: SessionId, child: &mut Child) {
    match cancel::terminate(child, shared.settings().grace_period).await {
        Ok(Termination::Graceful(status)) => {
            debug!(session_id = %id, exit_code = ?status.code(), "process stopped");
        }
        Ok(Termination::Forced) => {
            warn!(session_id = %id, "process force-killed after grace period");
        }
        Err(e) => {
            warn!(session_id = %id, error = %e, "failed to stop process");
        }
    }
}

fn record_exit(shared: &Shared, id: SessionId, code: i32) {
    let status = SessionStatus::from_exit_code(code);
    shared.with_store(|store, bus| {
        if store.mark_terminal(id, status, Some(code), Utc::now()) {
            bus.publish(SessionEvent::SessionCompleted {
                session_id: id,
                status,
                exit_code: code,
            });
        } else {
            debug!(session_id = %id, exit_code = code, "exit observed after session was finished");
        }
    });
}

fn fail_session(shared: &Shared, id: SessionId, message: &str) {
    shared.with_store(|store, bus| {
        if store.fail_with_error(id, message, Utc::now()) {
            bus.publish(SessionEvent::SessionError {
                session_id: id,
                message: message.to_string(),
            });
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;
    use crate::config::{CategoryConfig, CommandConfig, ConfigFile, RawConfigFile};
    use crate::engine::Orchestrator;

    fn orchestrator() -> Orchestrator {
        let mut raw = RawConfigFile::default();
        raw.category.insert(
            "unit".to_string(),
            CategoryConfig {
                description: String::new(),
                commands: vec![CommandConfig {
                    cmd: "true".to_string(),
                    description: String::new(),
                    timeout: None,
                }],
            },
        );
        Orchestrator::new(&ConfigFile::try_from(raw).unwrap(), std::env::temp_dir())
    }

    #[tokio::test]
    async fn observed_exit_beats_stop_and_deadline() {
        let orch = orchestrator();
        for _ in 0..32 {
            let (stop_tx, stop_rx) = oneshot::channel();
            stop_tx.send(KillReason::Manual).unwrap();
            let exited = std::future::ready(Ok(ExitStatus::from_raw(0)));

            let exit = supervise_inner(orch.shared(), SessionId::new(), exited, stop_rx, Duration::ZERO)
                .await
                .unwrap();
            assert!(matches!(exit, Exit::Natural(0)), "got {exit:?}");
        }
    }

    #[tokio::test]
    async fn released_handle_stops_the_process() {
        let orch = orchestrator();
        let (stop_tx, stop_rx) = oneshot::channel::<KillReason>();
        drop(stop_tx);

        let exit = supervise_inner(
            orch.shared(),
            SessionId::new(),
            std::future::pending(),
            stop_rx,
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(matches!(exit, Exit::Stopped));
    }
}
