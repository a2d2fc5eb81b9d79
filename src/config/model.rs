// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::session::DEFAULT_MAX_LOG_BYTES;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [orchestrator]
/// max_sessions = 10
/// default_timeout = "5m"
///
/// [rate_limit]
/// window = "10s"
/// max_requests = 5
///
/// [category.security]
/// description = "Security audit"
///
/// [[category.security.commands]]
/// cmd = "npm run test:security"
/// description = "Security audit"
/// timeout = "5m"
/// ```
///
/// Only the `category` tables are required; everything else has defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Session limits and lifetimes from `[orchestrator]`.
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// Listing throttle from `[rate_limit]`.
    #[serde(default)]
    pub rate_limit: RateLimitSection,

    /// All categories from `[category.<name>]`, keyed by category name.
    #[serde(default)]
    pub category: BTreeMap<String, CategoryConfig>,
}

/// Validated configuration.
///
/// Build it through `ConfigFile::try_from(raw)` (see `validate.rs`), which
/// parses every duration string and checks the command table.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub orchestrator: OrchestratorSettings,
    pub rate_limit: RateLimitSettings,
    pub category: BTreeMap<String, CategoryConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        orchestrator: OrchestratorSettings,
        rate_limit: RateLimitSettings,
        category: BTreeMap<String, CategoryConfig>,
    ) -> Self {
        Self {
            orchestrator,
            rate_limit,
            category,
        }
    }
}

/// `[orchestrator]` section as written in TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Ceiling on simultaneously running sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Timeout applied to commands that do not set their own.
    #[serde(default = "default_timeout")]
    pub default_timeout: String,

    /// Time between SIGTERM and SIGKILL when stopping a process.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// How long terminal sessions are kept before the collector drops them.
    #[serde(default = "default_retention")]
    pub retention: String,

    /// Period of the garbage collection sweep.
    #[serde(default = "default_gc_interval")]
    pub gc_interval: String,

    /// Buffer size of the lifecycle event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Captured stdout plus stderr kept per session. Lines past the cap are
    /// dropped.
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: usize,
}

fn default_max_sessions() -> usize {
    10
}

fn default_timeout() -> String {
    "5m".to_string()
}

fn default_grace_period() -> String {
    "5s".to_string()
}

fn default_retention() -> String {
    "24h".to_string()
}

fn default_gc_interval() -> String {
    "30m".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_log_bytes() -> usize {
    DEFAULT_MAX_LOG_BYTES
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            default_timeout: default_timeout(),
            grace_period: default_grace_period(),
            retention: default_retention(),
            gc_interval: default_gc_interval(),
            event_capacity: default_event_capacity(),
            max_log_bytes: default_max_log_bytes(),
        }
    }
}

/// `[rate_limit]` section as written in TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_window")]
    pub window: String,

    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_true() -> bool {
    true
}

fn default_window() -> String {
    "10s".to_string()
}

fn default_max_requests() -> u32 {
    5
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window: default_window(),
            max_requests: default_max_requests(),
        }
    }
}

/// `[category.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CategoryConfig {
    /// Human description shown in listings.
    #[serde(default)]
    pub description: String,

    /// Ordered commands; callers select one by index.
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

/// One `[[category.<name>.commands]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Executable followed by its arguments. Never run through a shell.
    pub cmd: String,

    #[serde(default)]
    pub description: String,

    /// Optional override of `orchestrator.default_timeout`.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Parsed `[orchestrator]` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_sessions: usize,
    pub default_timeout: Duration,
    pub grace_period: Duration,
    pub retention: Duration,
    pub gc_interval: Duration,
    pub event_capacity: usize,
    pub max_log_bytes: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            default_timeout: Duration::from_secs(5 * 60),
            grace_period: Duration::from_secs(5),
            retention: Duration::from_secs(24 * 60 * 60),
            gc_interval: Duration::from_secs(30 * 60),
            event_capacity: default_event_capacity(),
            max_log_bytes: default_max_log_bytes(),
        }
    }
}

/// Parsed `[rate_limit]` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(10),
            max_requests: default_max_requests(),
        }
    }
}
