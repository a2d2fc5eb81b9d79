//! Polling helpers for asserting on asynchronous session state.

use std::time::Duration;

use anyhow::{bail, Result};
use testvisor::engine::Orchestrator;
use testvisor::session::{SessionId, SessionSnapshot};
use testvisor::types::SessionStatus;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Poll until `id` leaves `Running`, failing after `limit`.
pub async fn wait_for_terminal(
    orchestrator: &Orchestrator,
    id: SessionId,
    limit: Duration,
) -> Result<SessionSnapshot> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let snapshot = orchestrator.get_status(id)?;
        if snapshot.status.is_terminal() {
            return Ok(snapshot);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("session {id} still running after {limit:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll until `id` is terminal and check it ended as `expected`.
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    id: SessionId,
    expected: SessionStatus,
    limit: Duration,
) -> Result<SessionSnapshot> {
    let snapshot = wait_for_terminal(orchestrator, id, limit).await?;
    if snapshot.status != expected {
        bail!(
            "session {id} ended as {} (exit {:?}), expected {expected}",
            snapshot.status,
            snapshot.exit_code
        );
    }
    Ok(snapshot)
}

/// Poll `condition` until it holds, failing after `limit`.
pub async fn wait_until<F>(mut condition: F, limit: Duration) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {limit:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}
