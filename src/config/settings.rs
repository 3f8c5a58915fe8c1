use crate::{RelayshareError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub identity: IdentitySettings,
    pub network: NetworkSettings,
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Fresh identifier on every launch.
    Random,
    /// Derived from host identity, survives restarts.
    HostDerived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub strategy: IdentityStrategy,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    pub server_address: String,
    pub base_port: u16,
    pub relay_path: String,
    pub shard_count: u32,
    pub directory_url: String,
    pub max_retries: u32,
    pub reconnect_delay_ms: u64,
    /// Honoured by `relayshare run`; the engine never reconnects on its own.
    pub auto_reconnect: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub ready_timeout_secs: u64,
    pub pacing_delay_ms: u64,
    /// Not enforced. The engine runs at most one outbound and one inbound
    /// transfer at a time.
    pub max_concurrent_transfers: usize,
    pub download_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            identity: IdentitySettings {
                strategy: IdentityStrategy::Random,
                display_name: gethostname::gethostname().to_string_lossy().to_string(),
            },
            network: NetworkSettings {
                server_address: "ws://127.0.0.1".to_string(),
                base_port: 5000,
                relay_path: "/player".to_string(),
                shard_count: 3,
                directory_url: "http://127.0.0.1:5003".to_string(),
                max_retries: 5,
                reconnect_delay_ms: 2000,
                auto_reconnect: true,
                request_timeout_secs: 10,
            },
            transfer: TransferSettings {
                chunk_size: 32 * 1024, // 32KB chunks
                ready_timeout_secs: 10,
                pacing_delay_ms: 10,
                max_concurrent_transfers: 3,
                download_dir: None,
            },
        }
    }
}

impl Settings {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };

        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| RelayshareError::Config(format!("Failed to read config: {}", e)))?;

            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            let settings = Self::default();
            settings.save(Some(&path))?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RelayshareError::Config(format!("Failed to create config dir: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        fs::write(&path, content)
            .map_err(|e| RelayshareError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "relayshare", "relayshare").ok_or_else(|| {
            RelayshareError::Config("Failed to get project directories".to_string())
        })?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.shard_count == 0 {
            return Err(RelayshareError::Config(
                "network.shard_count must be at least 1".to_string(),
            ));
        }
        if self.network.max_retries == 0 {
            return Err(RelayshareError::Config(
                "network.max_retries must be at least 1".to_string(),
            ));
        }
        if self.transfer.chunk_size == 0 {
            return Err(RelayshareError::Config(
                "transfer.chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.network.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.ready_timeout_secs)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.transfer.pacing_delay_ms)
    }

    /// Where received files are written: the configured directory, else the
    /// desktop, else the working directory.
    pub fn download_dir(&self) -> PathBuf {
        self.transfer
            .download_dir
            .clone()
            .or_else(dirs::desktop_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.network.shard_count = 7;
        settings.identity.strategy = IdentityStrategy::HostDerived;
        settings.save(Some(&path)).unwrap();

        let loaded = Settings::load(path.to_str()).unwrap();
        assert_eq!(loaded.network.shard_count, 7);
        assert_eq!(loaded.identity.strategy, IdentityStrategy::HostDerived);
        assert_eq!(loaded.transfer.chunk_size, 32 * 1024);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let settings = Settings::load(path.to_str()).unwrap();
        assert!(path.exists());
        assert_eq!(settings.network.base_port, 5000);
        assert_eq!(settings.ready_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.network.shard_count = 0;
        settings.save(Some(&path)).unwrap();

        assert!(matches!(
            Settings::load(path.to_str()),
            Err(RelayshareError::Config(_))
        ));
    }

    #[test]
    fn test_configured_download_dir_wins() {
        let mut settings = Settings::default();
        settings.transfer.download_dir = Some(PathBuf::from("/tmp/incoming"));
        assert_eq!(settings.download_dir(), PathBuf::from("/tmp/incoming"));
    }
}
