#![allow(dead_code)]

use testvisor::config::{CategoryConfig, CommandConfig, ConfigFile, RawConfigFile};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Durations are given as config strings ("250ms", "5s") so tests exercise
/// the same parsing path as real config files.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_category(mut self, name: &str, category: CategoryBuilder) -> Self {
        self.config
            .category
            .insert(name.to_string(), category.build());
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.orchestrator.max_sessions = max;
        self
    }

    pub fn default_timeout(mut self, timeout: &str) -> Self {
        self.config.orchestrator.default_timeout = timeout.to_string();
        self
    }

    pub fn grace_period(mut self, grace: &str) -> Self {
        self.config.orchestrator.grace_period = grace.to_string();
        self
    }

    pub fn retention(mut self, retention: &str) -> Self {
        self.config.orchestrator.retention = retention.to_string();
        self
    }

    pub fn gc_interval(mut self, interval: &str) -> Self {
        self.config.orchestrator.gc_interval = interval.to_string();
        self
    }

    pub fn max_log_bytes(mut self, max: usize) -> Self {
        self.config.orchestrator.max_log_bytes = max;
        self
    }

    pub fn rate_limit(mut self, max_requests: u32, window: &str) -> Self {
        self.config.rate_limit.enabled = true;
        self.config.rate_limit.max_requests = max_requests;
        self.config.rate_limit.window = window.to_string();
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.config.rate_limit.enabled = false;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `[category.<name>]` section.
pub struct CategoryBuilder {
    category: CategoryConfig,
}

impl CategoryBuilder {
    pub fn new(description: &str) -> Self {
        Self {
            category: CategoryConfig {
                description: description.to_string(),
                commands: vec![],
            },
        }
    }

    /// Append a command using the default timeout.
    pub fn command(mut self, cmd: &str) -> Self {
        self.category.commands.push(CommandConfig {
            cmd: cmd.to_string(),
            description: String::new(),
            timeout: None,
        });
        self
    }

    /// Append a command with its own timeout.
    pub fn command_with_timeout(mut self, cmd: &str, timeout: &str) -> Self {
        self.category.commands.push(CommandConfig {
            cmd: cmd.to_string(),
            description: String::new(),
            timeout: Some(timeout.to_string()),
        });
        self
    }

    pub fn build(self) -> CategoryConfig {
        self.category
    }
}
