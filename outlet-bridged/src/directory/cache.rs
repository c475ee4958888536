use dashmap::DashMap;

/// Last known LAN address per device identifier.
///
/// Lives as long as the process. Entries are only ever written from a scan that saw
/// the device, and leave only through `forget`; there is no time-based expiry.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    entries: DashMap<String, String>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str) -> Option<String> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Latest scan wins
    pub fn remember(&self, id: impl Into<String>, address: impl Into<String>) {
        self.entries.insert(id.into(), address.into());
    }

    /// Returns whether an entry was removed
    pub fn forget(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
