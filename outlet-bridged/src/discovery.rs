use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use shared::types::DeviceRecord;
use crate::directory::DirectoryCache;
use crate::scanner::{BoundedScanner, ScanResult};

/// Answers "where is device X now" and "what is on the LAN right now".
///
/// Sole writer of the directory cache.
pub struct DiscoveryService {
    scanner: BoundedScanner,
    cache: Arc<DirectoryCache>,
    scan_timeout: Duration,
}

impl DiscoveryService {
    pub fn new(scanner: BoundedScanner, cache: Arc<DirectoryCache>, scan_timeout: Duration) -> Self {
        Self {
            scanner,
            cache,
            scan_timeout,
        }
    }

    /// Cache first; on a miss, one bounded scan.
    /// A device that moved is not noticed until a command to it fails.
    pub async fn resolve(&self, id: &str) -> Option<String> {
        if let Some(address) = self.cache.lookup(id) {
            tracing::info!("Using cached address for {}: {}", id, address);
            return Some(address);
        }

        tracing::info!("Scanning the LAN for device {}", id);
        let devices = match self.scanner.scan(self.scan_timeout).await {
            ScanResult::Found(devices) => devices,
            other => {
                tracing::warn!("Could not resolve {}: scan gave {:?}", id, other);
                return None;
            }
        };

        // Every device in the result was just seen, so all of them may be cached
        for record in devices.values() {
            self.cache.remember(&record.id, &record.address);
        }
        tracing::debug!("Directory holds {} address(es)", self.cache.len());

        match devices.get(id) {
            Some(record) => {
                tracing::info!("Resolved {} to {}", id, record.address);
                Some(record.address.clone())
            }
            None => {
                tracing::warn!("No device with id {} on the LAN", id);
                None
            }
        }
    }

    /// Fresh scan, cache neither read nor written.
    /// A failed or timed out scan is indistinguishable from an empty LAN here.
    pub async fn list_all(&self) -> BTreeMap<String, DeviceRecord> {
        match self.scanner.scan(self.scan_timeout).await {
            ScanResult::Found(devices) => devices,
            ScanResult::Empty => BTreeMap::new(),
            other => {
                tracing::warn!("Device listing is empty because the scan gave {:?}", other);
                BTreeMap::new()
            }
        }
    }

    /// Seed the cache from one bounded scan; returns how many devices were seen
    pub async fn warm_up(&self) -> usize {
        let devices = self.scanner.scan(self.scan_timeout).await.into_devices();
        for record in devices.values() {
            self.cache.remember(&record.id, &record.address);
        }
        devices.len()
    }

    /// Drop the cached address so the next resolve scans again
    pub fn invalidate(&self, id: &str) {
        if self.cache.forget(id) {
            tracing::info!("Dropped cached address for {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use serde_json::json;
    use crate::scanner::tests::{FakeDiscovery, FakeOutcome};

    fn service(fake: Arc<FakeDiscovery>, timeout: Duration) -> (DiscoveryService, Arc<DirectoryCache>) {
        let cache = Arc::new(DirectoryCache::new());
        let scanner = BoundedScanner::new(fake);
        (DiscoveryService::new(scanner, cache.clone(), timeout), cache)
    }

    fn one_device() -> serde_json::Value {
        json!({"192.168.1.5": {"gwId": "abc123", "version": 3.3}})
    }

    #[tokio::test]
    async fn test_resolve_scans_and_caches() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));

        assert_eq!(discovery.resolve("abc123").await.as_deref(), Some("192.168.1.5"));
        assert_eq!(cache.lookup("abc123").as_deref(), Some("192.168.1.5"));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_performs_no_scan() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));
        cache.remember("abc123", "192.168.1.5");

        assert_eq!(discovery.resolve("abc123").await.as_deref(), Some("192.168.1.5"));
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_device_one_scan_then_not_found() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, _cache) = service(fake.clone(), Duration::from_secs(5));

        assert_eq!(discovery.resolve("missing").await, None);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_devices_from_scan_are_cached() {
        let fake = FakeDiscovery::returning(json!({
            "192.168.1.5": {"gwId": "abc123"},
            "192.168.1.6": {"gwId": "def456"},
        }));
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));

        discovery.resolve("abc123").await;
        assert_eq!(discovery.resolve("def456").await.as_deref(), Some("192.168.1.6"));
        assert_eq!(cache.len(), 2);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_hanging_scan_resolves_to_not_found_within_bound() {
        let fake = FakeDiscovery::new(FakeOutcome::Hangs(Duration::from_secs(3)));
        let (discovery, cache) = service(fake, Duration::from_millis(150));

        let started = Instant::now();
        assert_eq!(discovery.resolve("abc123").await, None);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_rescan() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));
        cache.remember("abc123", "192.168.1.200");

        discovery.invalidate("abc123");
        // The device answered the new scan from its new lease
        assert_eq!(discovery.resolve("abc123").await.as_deref(), Some("192.168.1.5"));
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_list_all_bypasses_cache() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));
        cache.remember("stale", "10.0.0.1");

        let devices = discovery.list_all().await;
        assert_eq!(devices.keys().collect::<Vec<_>>(), vec!["abc123"]);
        assert_eq!(fake.calls(), 1);
        assert_eq!(cache.lookup("abc123"), None);

        discovery.list_all().await;
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_list_all_failure_is_empty() {
        let fake = FakeDiscovery::new(FakeOutcome::Fails("bind failed"));
        let (discovery, _cache) = service(fake, Duration::from_secs(5));
        assert!(discovery.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_warm_up_seeds_cache() {
        let fake = FakeDiscovery::returning(one_device());
        let (discovery, cache) = service(fake.clone(), Duration::from_secs(5));

        assert_eq!(discovery.warm_up().await, 1);
        assert_eq!(discovery.resolve("abc123").await.as_deref(), Some("192.168.1.5"));
        assert_eq!(cache.len(), 1);
        assert_eq!(fake.calls(), 1);
    }
}
