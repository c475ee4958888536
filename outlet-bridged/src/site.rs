use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

/// Mutable per-site settings, persisted as JSON and rewritten on every change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_name")]
    pub site_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase: Option<SupabaseConfig>,
    /// Tried in order when a device secret has to come from the cloud
    #[serde(default)]
    pub tuya_accounts: Vec<TuyaAccount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
    #[serde(default = "default_table")]
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuyaAccount {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_site_name() -> String {
    "SITE_UNKNOWN".to_string()
}

pub fn default_table() -> String {
    "tuya_devices".to_string()
}

pub fn default_endpoint() -> String {
    "https://openapi.tuyaus.com".to_string()
}

impl SiteConfig {
    fn new(site_name: String) -> Self {
        Self {
            site_name,
            supabase: None,
            tuya_accounts: Vec::new(),
        }
    }
}

fn host_site_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| default_site_name())
}

/// Write to a sibling temp file, then rename over the target
fn write_atomic(path: &Path, config: &SiteConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(config).context("Failed to serialize site config")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// In-memory copy of the site config backed by its JSON file
pub struct SiteStore {
    path: PathBuf,
    current: RwLock<SiteConfig>,
    changes: watch::Sender<SiteConfig>,
}

impl SiteStore {
    /// Load the site config, creating it with the host name as site name if absent
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read site config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse site config: {}", path.display()))?
        } else {
            let config = SiteConfig::new(host_site_name());
            write_atomic(&path, &config)?;
            tracing::info!(
                "Created {} with site_name = {}",
                path.display(),
                config.site_name
            );
            config
        };

        let (changes, _) = watch::channel(config.clone());
        Ok(Self {
            path,
            current: RwLock::new(config),
            changes,
        })
    }

    pub async fn snapshot(&self) -> SiteConfig {
        self.current.read().await.clone()
    }

    pub async fn site_name(&self) -> String {
        self.current.read().await.site_name.clone()
    }

    /// Every accepted change, starting from the config as it is now
    pub fn subscribe(&self) -> watch::Receiver<SiteConfig> {
        self.changes.subscribe()
    }

    /// Apply `change`, persist, and only then make it visible.
    /// Updates are serialized by the write guard; the file write runs on the blocking pool.
    pub async fn update(&self, change: impl FnOnce(&mut SiteConfig)) -> Result<SiteConfig> {
        let mut current = self.current.write().await;
        let mut next = current.clone();
        change(&mut next);

        let path = self.path.clone();
        let written = next.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &written))
            .await
            .context("Site config writer panicked")??;

        *current = next.clone();
        self.changes.send_replace(next.clone());
        Ok(next)
    }
}
