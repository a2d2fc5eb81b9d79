// src/engine/readiness.rs

//! Pre-flight check that every configured command can actually be started.
//!
//! Each descriptor's program is resolved the way the spawn will resolve it:
//! a program containing a path separator is taken relative to the service
//! root, anything else is searched on `PATH`. Nothing is executed.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::registry::{split_command_line, CommandRegistry};

/// Overall verdict: every command resolvable, or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStatus {
    Ready,
    Incomplete,
}

/// Resolution result for one configured command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReadiness {
    pub category: String,
    pub index: usize,
    pub command: String,
    /// First word of the command line.
    pub program: String,
    pub ready: bool,
    /// Where the program was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessSummary {
    pub total: usize,
    pub ready: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    pub summary: ReadinessSummary,
    pub commands: Vec<CommandReadiness>,
}

impl ReadinessReport {
    /// Check every command of `registry`, in category then index order.
    ///
    /// `search_path` is the `PATH` value to search bare program names on.
    pub fn check(
        registry: &CommandRegistry,
        service_root: &Path,
        search_path: Option<&OsStr>,
    ) -> Self {
        let mut commands = Vec::new();
        for (name, info) in registry.list_categories() {
            for (index, descriptor) in info.commands.iter().enumerate() {
                // Validated at load time; an unsplittable line simply counts
                // as missing.
                let program = split_command_line(&descriptor.command)
                    .map(|(program, _)| program)
                    .unwrap_or_default();
                let resolved = if program.is_empty() {
                    None
                } else {
                    resolve_program(&program, service_root, search_path)
                };

                commands.push(CommandReadiness {
                    category: name.clone(),
                    index,
                    command: descriptor.command.clone(),
                    program,
                    ready: resolved.is_some(),
                    resolved,
                });
            }
        }

        let ready = commands.iter().filter(|c| c.ready).count();
        let summary = ReadinessSummary {
            total: commands.len(),
            ready,
            missing: commands.len() - ready,
        };
        let status = if summary.missing == 0 {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::Incomplete
        };

        Self {
            status,
            summary,
            commands,
        }
    }
}

/// Locate `program` as a child started in `service_root` would.
///
/// Relative `PATH` entries are taken relative to `service_root`, since that
/// is the working directory the child resolves them from.
pub fn resolve_program(
    program: &str,
    service_root: &Path,
    search_path: Option<&OsStr>,
) -> Option<PathBuf> {
    if program.contains('/') || program.contains(std::path::MAIN_SEPARATOR) {
        let candidate = service_root.join(program);
        return is_executable_file(&candidate).then_some(candidate);
    }

    std::env::split_paths(search_path?)
        .map(|dir| service_root.join(dir).join(program))
        .find(|candidate| is_executable_file(candidate))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
