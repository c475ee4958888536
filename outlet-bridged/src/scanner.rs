use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::oneshot;
use shared::types::DeviceRecord;
use crate::lan::LanDiscovery;

/// Outcome of one bounded scan
#[derive(Debug, Clone, PartialEq)]
pub enum ScanResult {
    /// identifier -> record, in identifier order
    Found(BTreeMap<String, DeviceRecord>),
    Empty,
    TimedOut,
    Failed(String),
}

impl ScanResult {
    /// Discovered devices, empty for every non-`Found` outcome
    pub fn into_devices(self) -> BTreeMap<String, DeviceRecord> {
        match self {
            ScanResult::Found(devices) => devices,
            _ => BTreeMap::new(),
        }
    }
}

/// Capability result as seen by every caller sharing one worker
type WorkerOutcome = std::result::Result<Value, String>;

/// The worker currently holding the LAN, shared by every caller that arrives while it runs
struct InFlight {
    result: Shared<BoxFuture<'static, WorkerOutcome>>,
    finished: Arc<AtomicBool>,
}

/// Runs the blocking discovery capability on its own worker thread under a deadline.
///
/// Scans are single-flight: callers arriving while a worker runs join it instead of
/// starting another, so at most one worker holds the discovery ports. A worker that
/// misses a caller's deadline is abandoned, not killed, and later callers keep
/// joining it until it finishes.
#[derive(Clone)]
pub struct BoundedScanner {
    discovery: Arc<dyn LanDiscovery>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl BoundedScanner {
    pub fn new(discovery: Arc<dyn LanDiscovery>) -> Self {
        Self {
            discovery,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn scan(&self, timeout: Duration) -> ScanResult {
        tracing::info!("Starting LAN scan (bound {:?})", timeout);

        let worker = match self.join_or_start() {
            Ok(worker) => worker,
            Err(e) => {
                tracing::error!("LAN scan failed: {:#}", e);
                return ScanResult::Failed(format!("{:#}", e));
            }
        };

        match tokio::time::timeout(timeout, worker).await {
            Err(_) => {
                tracing::warn!("LAN scan timed out after {:?}", timeout);
                ScanResult::TimedOut
            }
            Ok(Err(cause)) => {
                tracing::error!("LAN scan failed: {}", cause);
                ScanResult::Failed(cause)
            }
            Ok(Ok(raw)) => interpret(raw),
        }
    }

    fn join_or_start(&self) -> Result<Shared<BoxFuture<'static, WorkerOutcome>>> {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = slot.as_ref().filter(|w| !w.finished.load(Ordering::SeqCst)) {
            tracing::debug!("Joining the LAN scan already in progress");
            return Ok(current.result.clone());
        }

        let (reply, rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let discovery = self.discovery.clone();
        let done = finished.clone();

        thread::Builder::new()
            .name("lan-scan".to_string())
            .spawn(move || {
                let outcome = discovery.scan().map_err(|e| format!("{:#}", e));
                done.store(true, Ordering::SeqCst);
                let _ = reply.send(outcome);
            })
            .context("Failed to spawn scan worker")?;

        // A panicking worker drops the sender
        let result = async move {
            rx.await
                .unwrap_or_else(|_| Err("scan worker exited without a result".to_string()))
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            result: result.clone(),
            finished,
        });
        Ok(result)
    }
}

/// Turn the raw `address -> announcement` mapping into records keyed by identifier.
/// Entries are taken in the order received; a repeated identifier keeps the last address.
fn interpret(raw: Value) -> ScanResult {
    let entries = match raw {
        Value::Object(entries) => entries,
        other => {
            tracing::warn!("Unexpected scan result, expected a mapping: {}", other);
            return ScanResult::Empty;
        }
    };

    let mut found = BTreeMap::new();
    for (key, entry) in entries {
        let Some(id) = entry.get("gwId").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            tracing::debug!("Skipping scan entry {} without gwId", key);
            continue;
        };
        let address = entry
            .get("ip")
            .and_then(Value::as_str)
            .unwrap_or(key.as_str())
            .to_string();
        let protocol_version = entry
            .get("version")
            .or_else(|| entry.get("ver"))
            .and_then(version_string);

        tracing::info!(
            "Found gwId={} ip={} ver={}",
            id,
            address,
            protocol_version.as_deref().unwrap_or("?")
        );
        found.insert(
            id.to_string(),
            DeviceRecord {
                id: id.to_string(),
                address,
                protocol_version,
            },
        );
    }

    if found.is_empty() {
        tracing::info!("No devices found");
        ScanResult::Empty
    } else {
        tracing::info!("{} device(s) found", found.len());
        ScanResult::Found(found)
    }
}

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use anyhow::bail;
    use serde_json::json;

    /// Scripted discovery capability that counts invocations
    pub(crate) struct FakeDiscovery {
        pub calls: AtomicUsize,
        outcome: Mutex<FakeOutcome>,
    }

    #[derive(Clone)]
    pub(crate) enum FakeOutcome {
        Returns(Value),
        Fails(&'static str),
        Hangs(Duration),
    }

    impl FakeDiscovery {
        pub(crate) fn new(outcome: FakeOutcome) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Mutex::new(outcome),
            })
        }

        pub(crate) fn returning(value: Value) -> Arc<Self> {
            Self::new(FakeOutcome::Returns(value))
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LanDiscovery for FakeDiscovery {
        fn scan(&self) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcome.lock().unwrap().clone();
            match outcome {
                FakeOutcome::Returns(value) => Ok(value),
                FakeOutcome::Fails(msg) => bail!("{}", msg),
                FakeOutcome::Hangs(d) => {
                    thread::sleep(d);
                    Ok(json!({}))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_found_keyed_by_gateway_id() {
        let fake = FakeDiscovery::returning(json!({
            "192.168.1.5": {"gwId": "abc123", "version": 3.3},
            "192.168.1.6": {"gwId": "def456", "ver": "3.4"},
        }));
        let scanner = BoundedScanner::new(fake);

        let devices = scanner.scan(Duration::from_secs(5)).await.into_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["abc123"].address, "192.168.1.5");
        assert_eq!(devices["abc123"].protocol_version.as_deref(), Some("3.3"));
        assert_eq!(devices["def456"].protocol_version.as_deref(), Some("3.4"));
    }

    #[tokio::test]
    async fn test_hanging_capability_times_out() {
        let fake = FakeDiscovery::new(FakeOutcome::Hangs(Duration::from_secs(3)));
        let scanner = BoundedScanner::new(fake);

        let started = Instant::now();
        let result = scanner.scan(Duration::from_millis(100)).await;
        assert_eq!(result, ScanResult::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_capability_error_is_failed() {
        let fake = FakeDiscovery::new(FakeOutcome::Fails("socket in use"));
        let scanner = BoundedScanner::new(fake);

        match scanner.scan(Duration::from_secs(5)).await {
            ScanResult::Failed(cause) => assert!(cause.contains("socket in use")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_mapping_result_is_empty() {
        let fake = FakeDiscovery::returning(json!(["192.168.1.5"]));
        let scanner = BoundedScanner::new(fake);
        assert_eq!(scanner.scan(Duration::from_secs(5)).await, ScanResult::Empty);
    }

    #[tokio::test]
    async fn test_entries_without_gateway_id_skipped() {
        let fake = FakeDiscovery::returning(json!({
            "192.168.1.5": {"version": "3.3"},
            "192.168.1.6": "garbage",
        }));
        let scanner = BoundedScanner::new(fake);
        assert_eq!(scanner.scan(Duration::from_secs(5)).await, ScanResult::Empty);
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_last_entry() {
        let fake = FakeDiscovery::returning(json!({
            "192.168.1.5": {"gwId": "abc123"},
            "192.168.1.9": {"gwId": "abc123"},
        }));
        let scanner = BoundedScanner::new(fake);
        let devices = scanner.scan(Duration::from_secs(5)).await.into_devices();
        assert_eq!(devices["abc123"].address, "192.168.1.9");
    }

    #[tokio::test]
    async fn test_abandoned_worker_is_joined_not_duplicated() {
        let fake = FakeDiscovery::new(FakeOutcome::Hangs(Duration::from_secs(3)));
        let scanner = BoundedScanner::new(fake.clone());

        assert_eq!(scanner.scan(Duration::from_millis(100)).await, ScanResult::TimedOut);
        // The first worker is still running, so the second caller waits on it
        assert_eq!(scanner.scan(Duration::from_millis(100)).await, ScanResult::TimedOut);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_scans_share_one_worker() {
        let fake = FakeDiscovery::new(FakeOutcome::Hangs(Duration::from_millis(300)));
        let scanner = BoundedScanner::new(fake.clone());

        let late = scanner.clone();
        let (first, second) = tokio::join!(scanner.scan(Duration::from_secs(5)), async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            late.scan(Duration::from_secs(5)).await
        });

        assert_eq!(first, ScanResult::Empty);
        assert_eq!(second, ScanResult::Empty);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_finished_worker_is_not_reused() {
        let fake = FakeDiscovery::returning(json!({"192.168.1.5": {"gwId": "abc123"}}));
        let scanner = BoundedScanner::new(fake.clone());

        assert_eq!(scanner.scan(Duration::from_secs(5)).await.into_devices().len(), 1);
        assert_eq!(scanner.scan(Duration::from_secs(5)).await.into_devices().len(), 1);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_udp_scans_do_not_contend_for_ports() {
        let udp = Arc::new(crate::lan::UdpBroadcastDiscovery::new(Duration::from_millis(800)));
        let scanner = BoundedScanner::new(udp);

        let late = scanner.clone();
        let (first, second) = tokio::join!(scanner.scan(Duration::from_secs(5)), async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            late.scan(Duration::from_secs(5)).await
        });

        assert!(!matches!(first, ScanResult::Failed(_)), "first scan: {:?}", first);
        assert!(!matches!(second, ScanResult::Failed(_)), "second scan: {:?}", second);
    }
}
