use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use shared::protocol::{
    PATH_COMMAND, PATH_CONFIG_SITE, PATH_CONFIG_SUPABASE, PATH_CONFIG_TUYA, PATH_DEVICES,
    PATH_HEALTH, PATH_SYNC,
};
use shared::types::{DeviceRecord, PowerAction};
use crate::directory::hash::compute_hash;
use crate::discovery::DiscoveryService;
use crate::dispatcher::{CommandDispatcher, CommandRequest};
use crate::error::{BridgeError, Result};
use crate::site::{default_endpoint, default_table, SiteStore, SupabaseConfig, TuyaAccount};
use crate::sync::{Collaborators, DeviceHints, SyncOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<DiscoveryService>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub site: Arc<SiteStore>,
    pub collaborators: Arc<dyn Collaborators>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub site: String,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct DevicesResponse {
    pub ok: bool,
    pub devices: Vec<DeviceRecord>,
    pub hash: String,
}

/// Fields are loose so that each gets its own validation message
#[derive(Debug, Default, Deserialize)]
pub struct CommandBody {
    pub action: Option<Value>,
    pub tuya_device_id: Option<String>,
    pub local_key: Option<String>,
    pub lan_ip: Option<String>,
    pub version: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncBody {
    pub site_id: Option<String>,
    pub devices: Option<BTreeMap<String, DeviceHints>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SiteBody {
    pub site_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SupabaseBody {
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TuyaBody {
    #[serde(default)]
    pub accounts: Vec<AccountBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountBody {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub endpoint: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_HEALTH, get(health))
        .route(PATH_COMMAND, post(send_command))
        .route(PATH_DEVICES, get(list_devices))
        .route(PATH_SYNC, post(sync_devices))
        .route(PATH_CONFIG_SITE, post(set_site))
        .route(PATH_CONFIG_SUPABASE, post(set_supabase))
        .route(PATH_CONFIG_TUYA, post(set_tuya))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Parse a JSON body regardless of Content-Type; an empty body reads as `{}`
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    match serde_json::from_slice::<Option<T>>(body) {
        Ok(parsed) => Ok(parsed.unwrap_or_default()),
        Err(e) => Err(BridgeError::InvalidBody(e.to_string())),
    }
}

/// Accepts `3.3` as well as `"3.3"`; anything else means "use the default"
fn lenient_version(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BridgeError::Validation(format!("{} is required", field)))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        site: state.site.site_name().await,
    })
}

async fn send_command(State(state): State<AppState>, body: Bytes) -> Result<Json<OkResponse>> {
    let body: CommandBody = parse_body(&body)?;

    let action: PowerAction = body
        .action
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse()
        .map_err(BridgeError::Validation)?;

    let request = CommandRequest {
        action,
        device_id: body.tuya_device_id.unwrap_or_default(),
        secret_key: body.local_key.unwrap_or_default(),
        address: body.lan_ip,
        protocol_version: lenient_version(body.version.as_ref()),
    };

    state.dispatcher.dispatch(request).await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn list_devices(State(state): State<AppState>) -> Json<DevicesResponse> {
    let devices: Vec<DeviceRecord> = state.discovery.list_all().await.into_values().collect();
    let hash = compute_hash(&devices);
    Json(DevicesResponse {
        ok: true,
        devices,
        hash,
    })
}

async fn sync_devices(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let body: SyncBody = parse_body(&body)?;
    let site = state.site.snapshot().await;

    let store = state
        .collaborators
        .store(&site)
        .ok_or(BridgeError::NotConfigured("supabase"))?;
    let secrets = state.collaborators.secrets(&site);

    let site_id = body
        .site_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(site.site_name);

    let report = SyncOrchestrator::new(state.discovery.clone(), store, secrets)
        .run(site_id, body.devices)
        .await;

    let status = if report.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)).into_response())
}

async fn set_site(State(state): State<AppState>, body: Bytes) -> Result<Json<OkResponse>> {
    let body: SiteBody = parse_body(&body)?;
    let site_name = required(body.site_name, "site_name")?;

    state
        .site
        .update(|cfg| cfg.site_name = site_name.clone())
        .await
        .map_err(|e| BridgeError::Config(format!("{:#}", e)))?;

    tracing::info!("Site name set to {}", site_name);
    Ok(Json(OkResponse { ok: true }))
}

async fn set_supabase(State(state): State<AppState>, body: Bytes) -> Result<Json<OkResponse>> {
    let body: SupabaseBody = parse_body(&body)?;
    let url = required(body.url, "url")?;
    let key = required(body.key, "key")?;

    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(BridgeError::Validation(format!(
            "url must start with http:// or https://, got '{}'",
            url
        )));
    }

    let supabase = SupabaseConfig {
        url,
        key,
        table: body
            .table
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(default_table),
    };
    tracing::info!("Remote store set to {} (table {})", supabase.url, supabase.table);

    state
        .site
        .update(move |cfg| cfg.supabase = Some(supabase))
        .await
        .map_err(|e| BridgeError::Config(format!("{:#}", e)))?;
    Ok(Json(OkResponse { ok: true }))
}

async fn set_tuya(State(state): State<AppState>, body: Bytes) -> Result<Json<OkResponse>> {
    let body: TuyaBody = parse_body(&body)?;

    let accounts = body
        .accounts
        .into_iter()
        .enumerate()
        .map(|(i, account)| -> Result<TuyaAccount> {
            Ok(TuyaAccount {
                client_id: required(account.client_id, &format!("accounts[{}].client_id", i))?,
                client_secret: required(
                    account.client_secret,
                    &format!("accounts[{}].client_secret", i),
                )?,
                endpoint: account
                    .endpoint
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(default_endpoint),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!("{} cloud account(s) configured", accounts.len());

    state
        .site
        .update(move |cfg| cfg.tuya_accounts = accounts)
        .await
        .map_err(|e| BridgeError::Config(format!("{:#}", e)))?;
    Ok(Json(OkResponse { ok: true }))
}
