// src/exec/streams.rs

//! stdout/stderr observers.
//!
//! Each pipe gets its own task that splits the byte stream into lines and
//! appends them to the session record as they arrive. Lines that arrive after
//! the session went terminal are dropped by the registry, so a killed
//! session's log ends at its termination line. Past the per-session log cap
//! the pipes are still read to the end but nothing more is kept.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::engine::Shared;
use crate::events::SessionEvent;
use crate::session::{Appended, LogLine, SessionId};

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

impl Pipe {
    fn name(self) -> &'static str {
        match self {
            Pipe::Stdout => "stdout",
            Pipe::Stderr => "stderr",
        }
    }
}

/// The reader tasks of one session.
#[derive(Debug, Default)]
pub(crate) struct StreamReaders {
    tasks: Vec<JoinHandle<()>>,
}

impl StreamReaders {
    /// Start observers for whichever pipes the child exposes.
    pub(crate) fn spawn(
        shared: &Arc<Shared>,
        id: SessionId,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    ) -> Self {
        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            tasks.push(tokio::spawn(read_lines(shared.clone(), id, stdout, Pipe::Stdout)));
        }
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(read_lines(shared.clone(), id, stderr, Pipe::Stderr)));
        }
        Self { tasks }
    }

    /// Wait for both pipes to reach EOF, giving up after `limit`.
    ///
    /// A grandchild that inherited the pipes can keep them open after the
    /// direct child exited; such readers are aborted once `limit` passes.
    pub(crate) async fn drain(self, id: SessionId, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(session_id = %id, error = %e, "stream reader task failed"),
                Err(_) => {
                    debug!(session_id = %id, "stream still open after exit; abandoning reader");
                    task.abort();
                }
            }
        }
    }
}

async fn read_lines<R>(shared: Arc<Shared>, id: SessionId, pipe: R, which: Pipe)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = decode_line(&buf);
                trace!(session_id = %id, stream = which.name(), "{}", text);
                record(&shared, id, which, LogLine::new(Utc::now(), text));
            }
            Err(e) => {
                debug!(session_id = %id, stream = which.name(), error = %e, "stream read failed");
                break;
            }
        }
    }
}

/// Append under the registry lock and publish while still holding it, so
/// subscribers see a session's lines in the order they were recorded.
fn record(shared: &Shared, id: SessionId, which: Pipe, line: LogLine) {
    shared.with_store(|store, bus| {
        let appended = match which {
            Pipe::Stdout => store.append_output(id, line.clone()),
            Pipe::Stderr => store.append_error(id, line.clone()),
        };
        match appended {
            Appended::Stored => bus.publish(match which {
                Pipe::Stdout => SessionEvent::Output { session_id: id, line },
                Pipe::Stderr => SessionEvent::Error { session_id: id, line },
            }),
            Appended::Truncated(Some(notice)) => {
                warn!(session_id = %id, "log cap reached; further output is dropped");
                bus.publish(SessionEvent::Error {
                    session_id: id,
                    line: notice,
                });
            }
            Appended::Truncated(None) | Appended::Closed => {}
        }
    });
}

/// Strip the line terminator and replace invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"windows\r\n"), "windows");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{fffd} byte");
    }
}
