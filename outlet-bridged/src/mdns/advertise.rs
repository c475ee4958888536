use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use shared::protocol::{BRIDGE_SERVICE_TYPE, TXT_SITE, TXT_VERSION};
use crate::site::SiteConfig;

/// Instance name used when none is configured
pub fn default_instance(hostname: &str) -> String {
    format!("outlet-bridge-{}", hostname)
}

fn txt_records(site_name: &str) -> HashMap<String, String> {
    HashMap::from([
        (TXT_SITE.to_string(), site_name.to_string()),
        (TXT_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ])
}

pub fn register_bridge(
    daemon: &ServiceDaemon,
    instance: Option<&str>,
    site_name: &str,
    api_port: u16,
) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let instance_name = instance
        .map(str::to_string)
        .unwrap_or_else(|| default_instance(&hostname));

    // Addresses are filled in from every enabled interface
    let service_info = ServiceInfo::new(
        BRIDGE_SERVICE_TYPE,
        &instance_name,
        &format!("{}.local.", hostname),
        "",
        api_port,
        txt_records(site_name),
    )
    .context("Failed to create ServiceInfo")?
    .enable_addr_auto();

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} on port {}",
        BRIDGE_SERVICE_TYPE,
        instance_name,
        api_port
    );

    Ok(service_info)
}

pub fn unregister_bridge(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}

/// Calls `on_name` with the current site name and again whenever it changes,
/// until cancelled or the site store goes away
pub async fn follow_site_name(
    mut site: watch::Receiver<SiteConfig>,
    cancel: CancellationToken,
    mut on_name: impl FnMut(&str),
) {
    let mut current = site.borrow_and_update().site_name.clone();
    on_name(&current);

    loop {
        tokio::select! {
            changed = site.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = site.borrow_and_update().site_name.clone();
                if next != current {
                    current = next;
                    on_name(&current);
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Advertise the bridge until cancelled, re-registering when the site name changes.
/// Registering the same instance again replaces its TXT records.
pub async fn run_advertiser(
    daemon: ServiceDaemon,
    instance: Option<String>,
    api_port: u16,
    site: watch::Receiver<SiteConfig>,
    cancel: CancellationToken,
) {
    let mut registered: Option<ServiceInfo> = None;

    follow_site_name(site, cancel, |site_name| {
        match register_bridge(&daemon, instance.as_deref(), site_name, api_port) {
            Ok(info) => {
                tracing::info!("Advertising site {}", site_name);
                registered = Some(info);
            }
            Err(e) => tracing::error!("Failed to advertise site {}: {:#}", site_name, e),
        }
    })
    .await;

    if let Some(info) = registered {
        if let Err(e) = unregister_bridge(&daemon, &info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
    }
    if let Err(e) = daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }
}
