// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `testvisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "testvisor",
    version,
    about = "Run whitelisted test commands as supervised, observable sessions.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Commands run in the directory that contains it.
    #[arg(long, global = true, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TESTVISOR_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the command registry, but don't execute anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// List categories and their commands.
    Categories,

    /// Run one command and stream its output until it finishes.
    Run {
        /// Category name, e.g. `security`.
        category: String,

        /// Position of the command within the category.
        #[arg(long, default_value_t = 0)]
        index: usize,

        /// Emit events and the final snapshot as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Check that every configured command's program can be found.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Run the same command index of every category concurrently.
    RunAll {
        #[arg(long, default_value_t = 0)]
        index: usize,

        #[arg(long)]
        json: bool,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_run_with_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "testvisor", "run", "security", "--index", "2", "--config", "ci/Testvisor.toml",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("ci/Testvisor.toml"));
        match args.command {
            Some(CliCommand::Run { category, index, json }) => {
                assert_eq!(category, "security");
                assert_eq!(index, 2);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn defaults_without_subcommand() {
        let args = CliArgs::try_parse_from(["testvisor", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert!(args.command.is_none());
        assert_eq!(args.config, default_config_path());
    }

    #[test]
    fn parses_status_subcommand() {
        let args = CliArgs::try_parse_from(["testvisor", "status", "--json"]).unwrap();
        assert!(matches!(args.command, Some(CliCommand::Status { json: true })));
    }
}
