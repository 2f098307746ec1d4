use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub repository_root: PathBuf,
    /// Age beyond which a repository lock is considered abandoned.
    pub lock_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9876".parse().unwrap(),
            repository_root: PathBuf::from("."),
            lock_ttl_secs: 900,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> ServerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9876".parse::<SocketAddr>().unwrap());
        assert_eq!(config.lock_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn toml_roundtrip() {
        let config = ServerConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.bind_addr, config.bind_addr);
        assert_eq!(parsed.lock_ttl_secs, config.lock_ttl_secs);
    }
}
