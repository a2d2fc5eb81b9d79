// src/exec/mod.rs

//! Process execution layer.
//!
//! Everything that touches OS processes lives here:
//!
//! - [`supervisor`] spawns a session's process and owns it until it ends.
//! - [`streams`] turns stdout/stderr into log lines and output events.
//! - [`cancel`] implements kills and timeouts: the registry transition first,
//!   then SIGTERM, a grace period and SIGKILL.

pub mod cancel;
pub(crate) mod streams;
pub(crate) mod supervisor;

pub use cancel::{timeout_kill_message, MANUAL_KILL_MESSAGE};
