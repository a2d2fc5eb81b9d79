// src/config/validate.rs

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, OrchestratorSettings, RateLimitSettings, RawConfigFile,
};
use crate::errors::{OrchestratorError, Result};
use crate::registry::command_line::split_command_line;

/// Category names double as request keys, so keep them to a safe alphabet.
static CATEGORY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static regex"));

const MAX_CATEGORY_NAME_LEN: usize = 50;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = OrchestratorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let orchestrator = validate_orchestrator(&raw)?;
        let rate_limit = validate_rate_limit(&raw)?;
        ensure_has_categories(&raw)?;
        validate_categories(&raw)?;
        Ok(ConfigFile::new_unchecked(orchestrator, rate_limit, raw.category))
    }
}

fn ensure_has_categories(cfg: &RawConfigFile) -> Result<()> {
    if cfg.category.is_empty() {
        return Err(OrchestratorError::ConfigError(
            "config must contain at least one [category.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_orchestrator(cfg: &RawConfigFile) -> Result<OrchestratorSettings> {
    let section = &cfg.orchestrator;

    if section.max_sessions == 0 {
        return Err(OrchestratorError::ConfigError(
            "[orchestrator].max_sessions must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.event_capacity == 0 {
        return Err(OrchestratorError::ConfigError(
            "[orchestrator].event_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if section.max_log_bytes == 0 {
        return Err(OrchestratorError::ConfigError(
            "[orchestrator].max_log_bytes must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(OrchestratorSettings {
        max_sessions: section.max_sessions,
        default_timeout: non_zero_duration(
            "[orchestrator].default_timeout",
            &section.default_timeout,
        )?,
        grace_period: non_zero_duration("[orchestrator].grace_period", &section.grace_period)?,
        retention: non_zero_duration("[orchestrator].retention", &section.retention)?,
        gc_interval: non_zero_duration("[orchestrator].gc_interval", &section.gc_interval)?,
        event_capacity: section.event_capacity,
        max_log_bytes: section.max_log_bytes,
    })
}

fn validate_rate_limit(cfg: &RawConfigFile) -> Result<RateLimitSettings> {
    let section = &cfg.rate_limit;

    if section.max_requests == 0 {
        return Err(OrchestratorError::ConfigError(
            "[rate_limit].max_requests must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(RateLimitSettings {
        enabled: section.enabled,
        window: non_zero_duration("[rate_limit].window", &section.window)?,
        max_requests: section.max_requests,
    })
}

fn validate_categories(cfg: &RawConfigFile) -> Result<()> {
    for (name, category) in cfg.category.iter() {
        if !CATEGORY_NAME.is_match(name) || name.len() > MAX_CATEGORY_NAME_LEN {
            return Err(OrchestratorError::ConfigError(format!(
                "category name '{}' must match [a-zA-Z0-9_-]+ and be at most {} characters",
                name, MAX_CATEGORY_NAME_LEN
            )));
        }

        if category.commands.is_empty() {
            return Err(OrchestratorError::ConfigError(format!(
                "category '{}' must define at least one command",
                name
            )));
        }

        for (index, command) in category.commands.iter().enumerate() {
            split_command_line(&command.cmd).map_err(|e| {
                OrchestratorError::ConfigError(format!(
                    "category '{}' command #{}: {}",
                    name, index, e
                ))
            })?;

            if let Some(ref timeout) = command.timeout {
                non_zero_duration(&format!("category '{}' command #{} timeout", name, index), timeout)?;
            }
        }
    }
    Ok(())
}

fn non_zero_duration(field: &str, value: &str) -> Result<Duration> {
    let parsed = parse_duration(value)
        .map_err(|e| OrchestratorError::ConfigError(format!("{field}: {e}")))?;
    if parsed.is_zero() {
        return Err(OrchestratorError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{CategoryConfig, CommandConfig};

    fn raw_with(name: &str, cmds: &[&str]) -> RawConfigFile {
        let mut raw = RawConfigFile::default();
        raw.category.insert(
            name.to_string(),
            CategoryConfig {
                description: String::new(),
                commands: cmds
                    .iter()
                    .map(|c| CommandConfig {
                        cmd: c.to_string(),
                        description: String::new(),
                        timeout: None,
                    })
                    .collect(),
            },
        );
        raw
    }

    #[test]
    fn accepts_minimal_config_with_defaults() {
        let cfg = ConfigFile::try_from(raw_with("security", &["echo ok"])).unwrap();
        assert_eq!(cfg.orchestrator, OrchestratorSettings::default());
        assert_eq!(cfg.rate_limit, RateLimitSettings::default());
    }

    #[test]
    fn rejects_unsafe_category_names() {
        let err = ConfigFile::try_from(raw_with("rm -rf", &["echo ok"])).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(msg) if msg.contains("rm -rf")));
    }

    #[test]
    fn rejects_empty_command_lists_and_lines() {
        assert!(ConfigFile::try_from(raw_with("api", &[])).is_err());
        assert!(ConfigFile::try_from(raw_with("api", &["   "])).is_err());
        assert!(ConfigFile::try_from(raw_with("api", &["echo 'unterminated"])).is_err());
    }

    #[test]
    fn rejects_zero_limits_and_durations() {
        let mut raw = raw_with("api", &["echo ok"]);
        raw.orchestrator.max_sessions = 0;
        assert!(ConfigFile::try_from(raw).is_err());

        let mut raw = raw_with("api", &["echo ok"]);
        raw.orchestrator.grace_period = "0s".to_string();
        assert!(ConfigFile::try_from(raw).is_err());

        let mut raw = raw_with("api", &["echo ok"]);
        raw.rate_limit.max_requests = 0;
        assert!(ConfigFile::try_from(raw).is_err());

        let mut raw = raw_with("api", &["echo ok"]);
        raw.orchestrator.max_log_bytes = 0;
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(msg) if msg.contains("max_log_bytes")));
    }

    #[test]
    fn rejects_durations_too_large_to_represent() {
        let mut raw = raw_with("api", &["echo ok"]);
        raw.orchestrator.retention = "99999999999999999h".to_string();
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(msg) if msg.contains("retention")));
    }

    #[test]
    fn rejects_bad_command_timeout() {
        let mut raw = raw_with("api", &["echo ok"]);
        raw.category.get_mut("api").unwrap().commands[0].timeout = Some("soon".to_string());
        let err = ConfigFile::try_from(raw).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(msg) if msg.contains("timeout")));
    }
}
