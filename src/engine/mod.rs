// src/engine/mod.rs

//! Orchestration engine for testvisor.
//!
//! The pure registry state machine lives in [`crate::session::store`]; this
//! module is the async/IO shell around it:
//! - [`orchestrator`] exposes the boundary operations (start, status, list,
//!   logs, kill, categories, garbage collection, shutdown);
//! - [`report`] builds statistics and the JSON export;
//! - [`readiness`] checks that every configured program can be found.

pub mod orchestrator;
pub mod readiness;
pub mod report;

pub(crate) use orchestrator::Shared;
pub use orchestrator::Orchestrator;
pub use readiness::{CommandReadiness, ReadinessReport, ReadinessStatus, ReadinessSummary};
pub use report::{RegistryExport, SessionExport, SessionStats};
