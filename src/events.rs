// src/events.rs

//! Session lifecycle events and the fan-out bus that carries them.
//!
//! Publishing never blocks and never fails from the orchestrator's point of
//! view: with no subscribers the event is dropped, and a subscriber that
//! falls more than `capacity` events behind skips ahead (it sees
//! `RecvError::Lagged`). Session state never depends on who is listening.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::session::{LogLine, SessionId};
use crate::types::{KillReason, SessionStatus};

/// Everything the orchestrator announces about a session.
///
/// Events of one session are emitted in the order the registry applied
/// them; there is no ordering guarantee across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    SessionCreated {
        session_id: SessionId,
        category: String,
        command: String,
    },
    Output {
        session_id: SessionId,
        line: LogLine,
    },
    Error {
        session_id: SessionId,
        line: LogLine,
    },
    /// The process exited on its own.
    SessionCompleted {
        session_id: SessionId,
        status: SessionStatus,
        exit_code: i32,
    },
    /// The process could not be started.
    SessionError {
        session_id: SessionId,
        message: String,
    },
    SessionKilled {
        session_id: SessionId,
        reason: KillReason,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::SessionCreated { session_id, .. }
            | SessionEvent::Output { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::SessionCompleted { session_id, .. }
            | SessionEvent::SessionError { session_id, .. }
            | SessionEvent::SessionKilled { session_id, .. } => *session_id,
        }
    }

    /// Whether this is the last event a session will ever emit.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionCompleted { .. }
                | SessionEvent::SessionError { .. }
                | SessionEvent::SessionKilled { .. }
        )
    }
}

/// Fire-and-forget publish/subscribe channel for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            trace!("no event subscribers; event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn output(id: SessionId, text: &str) -> SessionEvent {
        SessionEvent::Output {
            session_id: id,
            line: LogLine::new(Utc::now(), text),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(output(SessionId::new(), "nobody listens"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    fn text_of(event: SessionEvent) -> String {
        match event {
            SessionEvent::Output { line, .. } => line.text,
            other => panic!("expected output event, got {other:?}"),
        }
    }

    #[test]
    fn subscribers_see_events_in_emission_order() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let id = SessionId::new();

        bus.publish(output(id, "one"));
        bus.publish(output(id, "two"));

        for rx in [&mut a, &mut b] {
            assert_eq!(text_of(rx.try_recv().unwrap()), "one");
            assert_eq!(text_of(rx.try_recv().unwrap()), "two");
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        let id = SessionId::new();

        for i in 0..5 {
            bus.publish(output(id, &i.to_string()));
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert_eq!(text_of(rx.try_recv().unwrap()), "3");
    }

    #[test]
    fn terminal_events_are_flagged() {
        let id = SessionId::new();
        assert!(
            SessionEvent::SessionKilled {
                session_id: id,
                reason: KillReason::Timeout
            }
            .is_terminal()
        );
        assert!(!output(id, "x").is_terminal());
        assert_eq!(output(id, "x").session_id(), id);
    }

    #[test]
    fn serializes_with_event_tag() {
        let id = SessionId::new();
        let json = serde_json::to_value(SessionEvent::SessionCompleted {
            session_id: id,
            status: SessionStatus::Completed,
            exit_code: 0,
        })
        .unwrap();
        assert_eq!(json["event"], "sessionCompleted");
        assert_eq!(json["status"], "completed");
    }
}
