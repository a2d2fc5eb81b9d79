// src/session/mod.rs

//! Session registry: records, admission, state transitions, retention.
//!
//! - [`record`] defines `Session`, `SessionId`, `LogLine`, `SessionSnapshot`
//!   and the live `ProcessHandle`.
//! - [`store`] is the pure registry state machine.
//! - [`governor`] is the concurrency ceiling consulted on creation.
//! - [`gc`] runs the retention sweep periodically.

pub mod gc;
pub mod governor;
pub mod record;
pub mod store;

pub use governor::ConcurrencyGovernor;
pub use record::{LogLine, ProcessHandle, Session, SessionId, SessionSnapshot};
pub use store::{Appended, CancelOutcome, SessionStore, DEFAULT_MAX_LOG_BYTES};
