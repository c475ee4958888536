use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub site: SiteConfigPath,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub advertise: AdvertiseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Hard bound on every scan, whether or not the listener honors it
    #[serde(default = "default_scan_timeout")]
    pub timeout_secs: u64,
    /// How long the UDP listener collects announcements
    #[serde(default = "default_listen_secs")]
    pub listen_secs: u64,
    #[serde(default = "default_true")]
    pub startup_scan: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_device_timeout")]
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfigPath {
    #[serde(default = "default_site_config_path")]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvertiseConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Instance name, defaults to `outlet-bridge-<hostname>`
    pub instance: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_scan_timeout() -> u64 {
    30
}

fn default_listen_secs() -> u64 {
    18
}

fn default_true() -> bool {
    true
}

fn default_device_timeout() -> u64 {
    5000
}

fn default_site_config_path() -> PathBuf {
    PathBuf::from("/var/lib/outlet-bridge/config.json")
}

fn default_cloud_timeout() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scan_timeout(),
            listen_secs: default_listen_secs(),
            startup_scan: default_true(),
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn listen_window(&self) -> Duration {
        Duration::from_secs(self.listen_secs)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_device_timeout(),
            io_timeout_ms: default_device_timeout(),
        }
    }
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Default for SiteConfigPath {
    fn default() -> Self {
        Self {
            config_path: default_site_config_path(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_cloud_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.listen, "0.0.0.0:8000");
        assert_eq!(config.scan.timeout(), Duration::from_secs(30));
        assert_eq!(config.scan.listen_window(), Duration::from_secs(18));
        assert!(config.scan.startup_scan);
        assert!(!config.advertise.enabled);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            timeout_secs = 5

            [device]
            io_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.timeout_secs, 5);
        assert_eq!(config.scan.listen_secs, 18);
        assert_eq!(config.device.io_timeout(), Duration::from_millis(1500));
        assert_eq!(config.device.connect_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.api.listen, "0.0.0.0:8000");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridged.toml");
        std::fs::write(&path, "[scan]\ntimeout_secs = \"soon\"\n").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }
}
