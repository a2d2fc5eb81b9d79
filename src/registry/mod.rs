// src/registry/mod.rs

//! Static command catalog.
//!
//! The registry is built once from validated configuration and never mutated
//! afterwards: every command a session can run comes from here, never from
//! request input.
//!
//! - [`descriptor`] holds `CommandDescriptor` / `CategoryInfo`.
//! - [`command_line`] splits a command line into program + arguments.

pub mod command_line;
pub mod descriptor;

use std::collections::BTreeMap;

use crate::config::ConfigFile;
use crate::errors::{OrchestratorError, Result};

pub use command_line::split_command_line;
pub use descriptor::{CategoryInfo, CommandDescriptor};

/// Read-only map of category name to ordered command descriptors.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    categories: BTreeMap<String, CategoryInfo>,
}

impl CommandRegistry {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let default_timeout = cfg.orchestrator.default_timeout;

        let categories = cfg
            .category
            .iter()
            .map(|(name, category)| {
                let commands = category
                    .commands
                    .iter()
                    .map(|cmd| CommandDescriptor::from_config(name, cmd, default_timeout))
                    .collect();
                let info = CategoryInfo {
                    name: name.clone(),
                    description: category.description.clone(),
                    commands,
                };
                (name.clone(), info)
            })
            .collect();

        Self { categories }
    }

    /// The full category → descriptors map.
    pub fn list_categories(&self) -> &BTreeMap<String, CategoryInfo> {
        &self.categories
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(|s| s.as_str())
    }

    /// Look up the descriptor at `index` within `category`.
    pub fn resolve(&self, category: &str, index: usize) -> Result<&CommandDescriptor> {
        let info = self
            .categories
            .get(category)
            .ok_or_else(|| OrchestratorError::UnknownCategory(category.to_string()))?;

        info.commands
            .get(index)
            .ok_or_else(|| OrchestratorError::IndexOutOfRange {
                category: category.to_string(),
                index,
                len: info.commands.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{CategoryConfig, CommandConfig, RawConfigFile};

    fn registry() -> CommandRegistry {
        let mut raw = RawConfigFile::default();
        raw.orchestrator.default_timeout = "2m".to_string();
        raw.category.insert(
            "security".to_string(),
            CategoryConfig {
                description: "Security checks".to_string(),
                commands: vec![
                    CommandConfig {
                        cmd: "npm run test:security".to_string(),
                        description: "Security audit".to_string(),
                        timeout: None,
                    },
                    CommandConfig {
                        cmd: "npm run test:vulnerabilities".to_string(),
                        description: "Vulnerability scan".to_string(),
                        timeout: Some("10m".to_string()),
                    },
                ],
            },
        );
        let cfg = ConfigFile::try_from(raw).unwrap();
        CommandRegistry::from_config(&cfg)
    }

    #[test]
    fn resolves_by_category_and_index() {
        let reg = registry();
        let d = reg.resolve("security", 1).unwrap();
        assert_eq!(d.command, "npm run test:vulnerabilities");
        assert_eq!(d.category, "security");
        assert_eq!(d.timeout, Duration::from_secs(600));
    }

    #[test]
    fn falls_back_to_default_timeout() {
        let reg = registry();
        assert_eq!(
            reg.resolve("security", 0).unwrap().timeout,
            Duration::from_secs(120)
        );
    }

    #[test]
    fn reports_unknown_category_and_bad_index() {
        let reg = registry();
        assert!(matches!(
            reg.resolve("nope", 0),
            Err(OrchestratorError::UnknownCategory(c)) if c == "nope"
        ));
        assert!(matches!(
            reg.resolve("security", 2),
            Err(OrchestratorError::IndexOutOfRange { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn lists_all_categories() {
        let reg = registry();
        let names: Vec<_> = reg.category_names().collect();
        assert_eq!(names, vec!["security"]);
        assert_eq!(reg.list_categories()["security"].commands.len(), 2);
    }
}
