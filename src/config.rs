//! Configuration loading and schema definitions for volley.
//!
//! This module provides types and functions for loading volley configuration
//! from TOML files or strings. The configuration schema defines all settings
//! for test selection, subprocess launch, remote servers, reporting and the
//! external event scheduler.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads volley configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use volley::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("volley.toml"))?;
/// println!("Pause: {:?}", config.run.post_test_pause());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads volley configuration from a TOML string.
///
/// # Example
///
/// ```
/// use volley::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [run]
///     test_files_directory = "load-tests"
///     post_test_pause_secs = 2
///
///     [remote]
///     servers = ["10.0.0.1"]
///     start_servers_before_tests = true
/// "#)?;
///
/// assert_eq!(config.remote.servers.len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
