//! Reconciles what is on the LAN with the remote device table

pub mod cloud;
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use shared::types::DeviceRecord;
use crate::discovery::DiscoveryService;
use crate::site::SiteConfig;
use self::cloud::{SecretLookup, TuyaCloud};
use self::store::{DeviceRow, DeviceStore, SupabaseStore};

/// Caller-supplied details for one device
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceHints {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub local_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Created,
    Updated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncedDevice {
    pub id: String,
    pub name: Option<String>,
    pub ip: Option<String>,
    pub version: Option<String>,
    pub status: SyncStatus,
    pub has_local_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub ok: bool,
    pub site_id: String,
    pub updated: usize,
    pub created: usize,
    pub total: usize,
    pub devices: Vec<SyncedDevice>,
}

/// Builds the remote collaborators from the current site config
pub trait Collaborators: Send + Sync {
    /// `None` while no remote store is configured
    fn store(&self, site: &SiteConfig) -> Option<Arc<dyn DeviceStore>>;
    fn secrets(&self, site: &SiteConfig) -> Arc<dyn SecretLookup>;
}

/// Supabase plus Tuya cloud, sharing one HTTP client
pub struct RemoteCollaborators {
    client: reqwest::Client,
}

impl RemoteCollaborators {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Collaborators for RemoteCollaborators {
    fn store(&self, site: &SiteConfig) -> Option<Arc<dyn DeviceStore>> {
        let config = site.supabase.as_ref()?;
        Some(Arc::new(SupabaseStore::new(self.client.clone(), config)))
    }

    fn secrets(&self, site: &SiteConfig) -> Arc<dyn SecretLookup> {
        Arc::new(TuyaCloud::new(self.client.clone(), site.tuya_accounts.clone()))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

pub struct SyncOrchestrator {
    discovery: Arc<DiscoveryService>,
    store: Arc<dyn DeviceStore>,
    secrets: Arc<dyn SecretLookup>,
}

impl SyncOrchestrator {
    pub fn new(
        discovery: Arc<DiscoveryService>,
        store: Arc<dyn DeviceStore>,
        secrets: Arc<dyn SecretLookup>,
    ) -> Self {
        Self {
            discovery,
            store,
            secrets,
        }
    }

    /// Scan once, then upsert every candidate concurrently.
    /// Candidates are the hinted ids when any are given, otherwise everything scanned.
    pub async fn run(
        &self,
        site_id: String,
        hints: Option<BTreeMap<String, DeviceHints>>,
    ) -> SyncReport {
        let scanned = self.discovery.list_all().await;

        let candidates: Vec<(String, DeviceHints)> = match hints {
            Some(hints) if !hints.is_empty() => hints.into_iter().collect(),
            _ => scanned
                .keys()
                .map(|id| (id.clone(), DeviceHints::default()))
                .collect(),
        };
        tracing::info!(
            "Syncing {} device(s) for site {} ({} on the LAN)",
            candidates.len(),
            site_id,
            scanned.len()
        );

        let devices = join_all(
            candidates
                .iter()
                .map(|(id, hints)| self.reconcile(&site_id, id, hints, scanned.get(id))),
        )
        .await;

        let count = |status| devices.iter().filter(|d| d.status == status).count();
        let report = SyncReport {
            ok: devices.iter().all(|d| d.status != SyncStatus::Failed),
            updated: count(SyncStatus::Updated),
            created: count(SyncStatus::Created),
            total: devices.len(),
            site_id,
            devices,
        };
        tracing::info!(
            "Sync finished: {} created, {} updated, {} total",
            report.created,
            report.updated,
            report.total
        );
        report
    }

    async fn reconcile(
        &self,
        site_id: &str,
        id: &str,
        hints: &DeviceHints,
        seen: Option<&DeviceRecord>,
    ) -> SyncedDevice {
        let mut device = SyncedDevice {
            id: id.to_string(),
            name: non_empty(&hints.name),
            ip: seen.map(|r| r.address.clone()),
            version: seen.and_then(|r| r.protocol_version.clone()),
            status: SyncStatus::Failed,
            has_local_key: non_empty(&hints.local_key).is_some(),
            error: None,
        };

        match self.upsert(site_id, hints, &mut device).await {
            Ok(status) => device.status = status,
            Err(e) => {
                tracing::error!("Sync of {} failed: {:#}", id, e);
                device.error = Some(format!("{:#}", e));
            }
        }
        device
    }

    /// Writes the row for `device`, filling in the name and key state it learns on the way
    async fn upsert(
        &self,
        site_id: &str,
        hints: &DeviceHints,
        device: &mut SyncedDevice,
    ) -> Result<SyncStatus> {
        let id = device.id.clone();
        let existing = self.store.find(&id).await?;

        if device.name.is_none() {
            device.name = existing.as_ref().and_then(|row| non_empty(&row.name));
        }

        let mut local_key = non_empty(&hints.local_key)
            .or_else(|| existing.as_ref().and_then(|row| non_empty(&row.local_key)));
        if local_key.is_none() {
            match self.secrets.local_key(&id).await {
                Ok(key) => local_key = key,
                Err(e) => tracing::warn!("No local_key for {}: {:#}", id, e),
            }
        }
        device.has_local_key = local_key.is_some();

        // Only hinted names are written, so a stored name is never overwritten
        let row = DeviceRow {
            tuya_device_id: id,
            site_id: Some(site_id.to_string()),
            name: non_empty(&hints.name),
            lan_ip: device.ip.clone(),
            version: device.version.clone(),
            local_key,
            updated_at: Some(Utc::now().to_rfc3339()),
        };

        if existing.is_some() {
            self.store.update(&row).await?;
            Ok(SyncStatus::Updated)
        } else {
            self.store.insert(&row).await?;
            Ok(SyncStatus::Created)
        }
    }
}
