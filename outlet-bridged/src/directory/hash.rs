use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::DeviceRecord;

#[derive(Serialize)]
struct HashView<'a> {
    id: &'a str,
    ip: &'a str,
    version: Option<&'a str>,
}

/// Computes a SHA-256 fingerprint of a device list.
/// Devices are sorted by id so the fingerprint does not depend on scan order.
pub fn compute_hash<'a>(devices: impl IntoIterator<Item = &'a DeviceRecord>) -> String {
    let mut views: Vec<HashView<'_>> = devices
        .into_iter()
        .map(|d| HashView {
            id: &d.id,
            ip: &d.address,
            version: d.protocol_version.as_deref(),
        })
        .collect();
    views.sort_by(|a, b| a.id.cmp(b.id));

    let json = serde_json::to_vec(&views).unwrap_or_default();

    hex::encode(Sha256::digest(&json))
}
