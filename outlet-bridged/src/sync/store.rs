use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use crate::site::SupabaseConfig;

/// One device row in the remote store. `None` fields are left out of writes
/// so a PATCH never clears what is already there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRow {
    pub tuya_device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lan_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find(&self, device_id: &str) -> Result<Option<DeviceRow>>;
    async fn insert(&self, row: &DeviceRow) -> Result<()>;
    async fn update(&self, row: &DeviceRow) -> Result<()>;
}

/// Supabase (PostgREST) table of devices
pub struct SupabaseStore {
    client: reqwest::Client,
    url: String,
    key: String,
    table: String,
}

impl SupabaseStore {
    pub fn new(client: reqwest::Client, config: &SupabaseConfig) -> Self {
        Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            table: config.table.clone(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("store returned {}: {}", status, body)
}

#[async_trait]
impl DeviceStore for SupabaseStore {
    async fn find(&self, device_id: &str) -> Result<Option<DeviceRow>> {
        let filter = format!("eq.{}", device_id);
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[("tuya_device_id", filter.as_str()), ("select", "*")])
            .send()
            .await
            .with_context(|| format!("Failed to query store for {}", device_id))?;

        let rows: Vec<DeviceRow> = check(response)
            .await?
            .json()
            .await
            .context("Store returned an unexpected body")?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, row: &DeviceRow) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.table_url()))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .with_context(|| format!("Failed to insert {}", row.tuya_device_id))?;
        check(response).await?;
        Ok(())
    }

    async fn update(&self, row: &DeviceRow) -> Result<()> {
        let filter = format!("eq.{}", row.tuya_device_id);
        let response = self
            .authorized(self.client.patch(self.table_url()))
            .query(&[("tuya_device_id", filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .with_context(|| format!("Failed to update {}", row.tuya_device_id))?;
        check(response).await?;
        Ok(())
    }
}
