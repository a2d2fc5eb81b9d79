// src/config/mod.rs

//! Configuration loading and validation for testvisor.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate limits, durations and the command table (`validate.rs`).
//! - Parse human duration strings (`duration.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::{format_duration, parse_duration};
pub use loader::{default_config_path, load_and_validate, load_from_path, service_root_dir};
pub use model::{
    CategoryConfig, CommandConfig, ConfigFile, OrchestratorSection, OrchestratorSettings,
    RateLimitSection, RateLimitSettings, RawConfigFile,
};
