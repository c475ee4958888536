pub mod cipher;
pub mod frame;
pub mod outlet;
pub mod udp;

use anyhow::Result;
use serde_json::Value;

pub use outlet::TcpOutletConnector;
pub use udp::UdpBroadcastDiscovery;

/// Blocking LAN sweep for smart outlets.
///
/// Returns `address -> announcement` where each announcement carries at least
/// `gwId` and usually `version`. Implementations may run for an unbounded time
/// and may fail; callers go through `BoundedScanner`, which enforces the deadline.
pub trait LanDiscovery: Send + Sync + 'static {
    fn scan(&self) -> Result<Value>;
}

/// Opens command sessions against a single outlet
pub trait OutletConnector: Send + Sync + 'static {
    fn open(
        &self,
        device_id: &str,
        address: &str,
        local_key: &str,
    ) -> Result<Box<dyn OutletSession>>;
}

/// One outlet at one address, keyed with its local secret
pub trait OutletSession: Send {
    fn set_version(&mut self, version: f64);

    /// Switch the relay on, returning the device's decoded reply if it sent one
    fn turn_on(&mut self) -> Result<Option<Value>>;

    fn turn_off(&mut self) -> Result<Option<Value>>;
}
