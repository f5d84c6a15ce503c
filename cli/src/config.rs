//! CLI configuration
//!
//! Optional toml file carrying defaults shared by the subcommands;
//! command-line flags always win.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Default listen address for the intercepting proxy.
    pub listen: String,

    /// Per-read timeout applied to outbound connections.
    pub read_timeout_secs: u64,

    /// Process label announced during handshakes.
    pub process_label: String,

    /// Hostname label announced during handshakes.
    pub hostname_label: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3200".to_string(),
            read_timeout_secs: 30,
            process_label: "tapwire".to_string(),
            hostname_label: String::new(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, or fall back to defaults when no file was given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
