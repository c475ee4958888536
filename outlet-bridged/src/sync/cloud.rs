use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use crate::site::TuyaAccount;

type HmacSha256 = Hmac<Sha256>;

/// Where a device's local key comes from when nobody supplied it
#[async_trait]
pub trait SecretLookup: Send + Sync {
    /// `Ok(None)` when there is nothing to ask; `Err` when every source failed
    async fn local_key(&self, device_id: &str) -> Result<Option<String>>;
}

/// Tuya OpenAPI, trying each configured account in order
pub struct TuyaCloud {
    client: reqwest::Client,
    accounts: Vec<TuyaAccount>,
}

#[derive(Debug, Deserialize)]
struct CloudResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    result: Option<T>,
}

impl<T> CloudResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.success {
            bail!(
                "cloud error {}: {}",
                self.code.unwrap_or_default(),
                self.msg.unwrap_or_default()
            );
        }
        self.result.context("cloud response has no result")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DeviceDetails {
    #[serde(default)]
    local_key: Option<String>,
}

/// Uppercase hex HMAC-SHA256 over `client_id + access_token + t + stringToSign`,
/// for a body-less GET with no signed headers
fn sign(account: &TuyaAccount, access_token: Option<&str>, t: &str, path: &str) -> Result<String> {
    let content_hash = hex::encode(Sha256::digest(b""));
    let string_to_sign = format!("GET\n{}\n\n{}", content_hash, path);
    let payload = format!(
        "{}{}{}{}",
        account.client_id,
        access_token.unwrap_or_default(),
        t,
        string_to_sign
    );

    let mut mac = HmacSha256::new_from_slice(account.client_secret.as_bytes())
        .map_err(|e| anyhow!("invalid client secret: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

impl TuyaCloud {
    pub fn new(client: reqwest::Client, accounts: Vec<TuyaAccount>) -> Self {
        Self { client, accounts }
    }

    async fn signed_get<T: DeserializeOwned>(
        &self,
        account: &TuyaAccount,
        access_token: Option<&str>,
        path: &str,
    ) -> Result<T> {
        let t = Utc::now().timestamp_millis().to_string();
        let signature = sign(account, access_token, &t, path)?;
        let url = format!("{}{}", account.endpoint.trim_end_matches('/'), path);

        let mut request = self
            .client
            .get(&url)
            .header("client_id", &account.client_id)
            .header("sign", signature)
            .header("t", &t)
            .header("sign_method", "HMAC-SHA256");
        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }

        let response: CloudResponse<T> = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .json()
            .await
            .with_context(|| format!("Unexpected response from {}", url))?;
        response.into_result()
    }

    async fn lookup_with(&self, account: &TuyaAccount, device_id: &str) -> Result<String> {
        let token: TokenResult = self
            .signed_get(account, None, "/v1.0/token?grant_type=1")
            .await
            .context("token request failed")?;

        let device: DeviceDetails = self
            .signed_get(
                account,
                Some(&token.access_token),
                &format!("/v1.0/devices/{}", device_id),
            )
            .await?;

        device
            .local_key
            .filter(|k| !k.is_empty())
            .context("device has no local_key")
    }
}

#[async_trait]
impl SecretLookup for TuyaCloud {
    async fn local_key(&self, device_id: &str) -> Result<Option<String>> {
        let mut last_error = None;

        for account in &self.accounts {
            match self.lookup_with(account, device_id).await {
                Ok(key) => {
                    tracing::info!(
                        "Fetched local_key for {} with account {}",
                        device_id,
                        account.client_id
                    );
                    return Ok(Some(key));
                }
                Err(e) => {
                    tracing::warn!(
                        "Account {} could not fetch local_key for {}: {:#}",
                        account.client_id,
                        device_id,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.context(format!("no cloud account could supply the local_key for {}", device_id))),
            None => Ok(None),
        }
    }
}
