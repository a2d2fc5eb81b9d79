// src/registry/descriptor.rs

//! Command descriptors and their categories.

use std::time::Duration;

use serde::Serialize;

use crate::config::{CommandConfig, duration::parse_duration};

/// One runnable command, as selected by `(category, index)`.
///
/// Immutable once the registry is built; sessions copy the command line out
/// of it at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    pub category: String,
    /// Executable followed by its arguments.
    pub command: String,
    pub description: String,
    /// Effective timeout (per-command override or the global default).
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout: Duration,
}

impl CommandDescriptor {
    /// Build from a validated config entry, falling back to `default_timeout`.
    pub(crate) fn from_config(
        category: &str,
        cfg: &CommandConfig,
        default_timeout: Duration,
    ) -> Self {
        let timeout = cfg
            .timeout
            .as_deref()
            .and_then(|s| parse_duration(s).ok())
            .unwrap_or(default_timeout);

        Self {
            category: category.to_string(),
            command: cfg.cmd.trim().to_string(),
            description: cfg.description.clone(),
            timeout,
        }
    }
}

/// A named group of descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryInfo {
    pub name: String,
    pub description: String,
    pub commands: Vec<CommandDescriptor>,
}

fn serialize_millis<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(d.as_millis() as u64)
}
