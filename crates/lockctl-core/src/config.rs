//! Configuration shared by the CLI and the HTTP server.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::keys::{KeyError, OfflineKey, OfflineKeyMaterial};
use crate::session::LockOptions;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "LOCKCTL_CONFIG";

/// Config file looked up in the working directory as a last resort.
pub const DEFAULT_CONFIG_FILE: &str = "lockctl.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("lock {lock}: {source}")]
    Key {
        lock: String,
        #[source]
        source: KeyError,
    },
    #[error("unknown lock: {0}")]
    UnknownLock(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One configured lock.
#[derive(Clone, Deserialize)]
pub struct LockEntry {
    /// Peripheral id or address. `None` matches the first lock found.
    #[serde(default)]
    pub address: Option<String>,
    pub offline_key: String,
    pub offline_key_slot: u8,
}

impl LockEntry {
    pub fn key_material(&self) -> Result<OfflineKeyMaterial, KeyError> {
        let key = OfflineKey::from_hex(self.offline_key.trim())?;
        Ok(OfflineKeyMaterial::new(key, self.offline_key_slot))
    }

    /// Address filter for scanning; blank counts as none.
    pub fn address_filter(&self) -> Option<&str> {
        self.address.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }
}

impl fmt::Debug for LockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockEntry")
            .field("address", &self.address)
            .field("offline_key", &"<redacted>")
            .field("offline_key_slot", &self.offline_key_slot)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub scan_seconds: u64,
    pub connect_seconds: u64,
    pub response_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            scan_seconds: 30,
            connect_seconds: 15,
            response_seconds: 10,
        }
    }
}

impl Timeouts {
    pub fn scan(&self) -> Duration {
        Duration::from_secs(self.scan_seconds)
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            connect_timeout: Duration::from_secs(self.connect_seconds),
            response_timeout: Duration::from_secs(self.response_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: SocketAddr,
    pub status_cache_seconds: u64,
    pub action_cache_seconds: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            status_cache_seconds: 5,
            action_cache_seconds: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub locks: BTreeMap<String, LockEntry>,
    pub timeouts: Timeouts,
    pub server: ServerSection,
    pub logging: Logging,
}

impl Config {
    /// Load from `explicit`, else `$LOCKCTL_CONFIG`, else `./lockctl.toml`.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locks.is_empty() {
            return Err(ConfigError::Invalid("no locks configured".to_string()));
        }
        for (name, entry) in &self.locks {
            entry.key_material().map_err(|source| ConfigError::Key {
                lock: name.clone(),
                source,
            })?;
        }
        let t = &self.timeouts;
        if t.scan_seconds == 0 || t.connect_seconds == 0 || t.response_seconds == 0 {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn lock(&self, name: &str) -> Result<&LockEntry, ConfigError> {
        self.locks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownLock(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[locks.front-door]
address = "AA:BB:CC:DD:EE:FF"
offline_key = "00112233445566778899aabbccddeeff"
offline_key_slot = 1

[locks.garage]
offline_key = "ffeeddccbbaa99887766554433221100"
offline_key_slot = 3

[timeouts]
response_seconds = 4

[server]
listen_addr = "0.0.0.0:8080"
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.locks.len(), 2);

        let front = config.lock("front-door").unwrap();
        assert_eq!(front.address_filter(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(front.key_material().unwrap().slot(), 1);
        assert_eq!(config.lock("garage").unwrap().address_filter(), None);

        assert_eq!(config.timeouts.scan_seconds, 30);
        assert_eq!(config.timeouts.lock_options().response_timeout, Duration::from_secs(4));
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.status_cache_seconds, 5);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_rejects_bad_key() {
        let err = Config::parse(
            r#"
[locks.door]
offline_key = "0011"
offline_key_slot = 1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Key { ref lock, .. } if lock == "door"));
    }

    #[test]
    fn test_rejects_empty_and_zero_timeouts() {
        assert!(matches!(Config::parse(""), Err(ConfigError::Invalid(_))));

        let zero = format!("{SAMPLE}\n");
        let zero = zero.replace("response_seconds = 4", "response_seconds = 0");
        assert!(matches!(Config::parse(&zero), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_lock() {
        let config = Config::parse(SAMPLE).unwrap();
        assert!(matches!(config.lock("attic"), Err(ConfigError::UnknownLock(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::parse(SAMPLE).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("00112233"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockctl.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert!(Config::load_from(Some(&path)).is_ok());
        assert!(matches!(
            Config::load_from(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }
}
