//! Configuration for the stub daemon, read once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    /// TLS termination is out of scope for the daemon itself; front it with
    /// a TLS proxy when encrypted transport is needed.
    pub fn is_supported(&self) -> bool {
        matches!(self, Protocol::Http)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            protocol: Protocol::default(),
        }
    }
}

/// Matcher behavior switches.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Allow a trailing `/*` suffix in stub paths to match any sub-path.
    #[serde(default)]
    pub wildcard_paths: bool,
    /// Refuse to register a stub that collides with an active stub of equal
    /// priority on the same method and path.
    #[serde(default)]
    pub reject_duplicate_intent: bool,
}

fn default_management_prefix() -> String {
    "/api/mock".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    /// Requests whose path is under this prefix go to the registration API;
    /// everything else is matched against registered stubs.
    #[serde(default = "default_management_prefix")]
    pub management_prefix: String,
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Optional YAML/JSON file of stub payloads to register at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_stubs: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            management_prefix: default_management_prefix(),
            matching: MatchingConfig::default(),
            seed_stubs: None,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.listen.protocol.is_supported() {
            anyhow::bail!(
                "listener protocol '{}' is not supported; terminate TLS in a fronting proxy \
                 and use 'http' here",
                self.listen.protocol.as_str()
            );
        }

        if !self.management_prefix.starts_with('/') || self.management_prefix.len() < 2 {
            anyhow::bail!(
                "management_prefix must be a non-root path starting with '/', got '{}'",
                self.management_prefix
            );
        }
        if self.management_prefix.ends_with('/') {
            anyhow::bail!("management_prefix must not end with '/'");
        }

        Ok(())
    }
}
