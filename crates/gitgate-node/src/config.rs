//! Node configuration types.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gitgate::AuthMode;
use serde::Deserialize;

/// Configuration for the gitgate node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub listen: SocketAddr,
    /// Directory holding bare repositories as `<repo_root>/<org>/<repo>.git`.
    pub repo_root: PathBuf,
    /// Git executable to invoke.
    pub git_executable: PathBuf,
    /// Auth policy applied to every repository.
    pub auth_mode: AuthMode,
    /// Enables side-band messages and the push hook.
    pub side_band_messages: bool,
    /// Seconds the push hook may take before a push is denied.
    pub push_timeout_secs: u64,
    /// Username to password map for basic auth.
    pub users: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            repo_root: PathBuf::from("./repositories"),
            git_executable: PathBuf::from("git"),
            auth_mode: AuthMode::Never,
            side_band_messages: true,
            push_timeout_secs: 30,
            users: HashMap::new(),
        }
    }
}

impl Config {
    /// Reads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}
