use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use serde_json::Value;
use shared::protocol::{AUTO_ADDRESS, DEFAULT_PROTOCOL_VERSION};
use shared::types::PowerAction;
use crate::discovery::DiscoveryService;
use crate::error::{BridgeError, Result};
use crate::lan::OutletConnector;

/// One power command as received from a caller
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub action: PowerAction,
    pub device_id: String,
    pub secret_key: String,
    /// Absent or "auto" means discover it
    pub address: Option<String>,
    pub protocol_version: Option<f64>,
}

/// Validates, resolves and executes power commands.
///
/// No retries here. A failed command evicts the device's cached address so that a
/// retry by the caller scans again.
pub struct CommandDispatcher {
    discovery: Arc<DiscoveryService>,
    connector: Arc<dyn OutletConnector>,
}

impl CommandDispatcher {
    pub fn new(discovery: Arc<DiscoveryService>, connector: Arc<dyn OutletConnector>) -> Self {
        Self {
            discovery,
            connector,
        }
    }

    pub async fn dispatch(&self, request: CommandRequest) -> Result<()> {
        if request.device_id.trim().is_empty() {
            return Err(BridgeError::Validation("tuya_device_id is required".to_string()));
        }
        if request.secret_key.is_empty() {
            return Err(BridgeError::Validation("local_key is required".to_string()));
        }

        let address = self.target_address(&request).await?;
        check_bare_address(&address)?;

        let version = request
            .protocol_version
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        tracing::info!(
            "Sending '{}' to {} @ {} (version {})",
            request.action,
            request.device_id,
            address,
            version
        );

        let connector = self.connector.clone();
        let device_id = request.device_id.clone();
        let secret_key = request.secret_key.clone();
        let action = request.action;

        let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Value>> {
            let mut session = connector.open(&device_id, &address, &secret_key)?;
            session.set_version(version);
            if action.is_on() {
                session.turn_on()
            } else {
                session.turn_off()
            }
        })
        .await
        .unwrap_or_else(|e| Err(anyhow!("command worker failed: {}", e)));

        match outcome {
            Ok(reply) => {
                tracing::debug!("Reply from {}: {:?}", request.device_id, reply);
                Ok(())
            }
            Err(e) => {
                self.discovery.invalidate(&request.device_id);
                Err(BridgeError::CommandFailed {
                    device_id: request.device_id,
                    cause: format!("{:#}", e),
                })
            }
        }
    }

    async fn target_address(&self, request: &CommandRequest) -> Result<String> {
        match request.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() && !address.eq_ignore_ascii_case(AUTO_ADDRESS) => {
                Ok(address.to_string())
            }
            _ => {
                tracing::info!("No lan_ip for {}, discovering it", request.device_id);
                self.discovery
                    .resolve(&request.device_id)
                    .await
                    .ok_or_else(|| BridgeError::AddressUnresolvable(request.device_id.clone()))
            }
        }
    }
}

/// Reject URLs and `host:port` pasted where a bare address belongs
fn check_bare_address(address: &str) -> Result<()> {
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("http://")
        || lower.starts_with("https://")
        || address.parse::<SocketAddr>().is_ok()
    {
        return Err(BridgeError::MalformedAddress(address.to_string()));
    }
    Ok(())
}
