use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// A device seen during a LAN scan.
/// Produced fresh by every scan and never persisted by the bridge itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Vendor gateway id (`gwId`), unique per device
    pub id: String,

    /// LAN address literal, no scheme and no port
    #[serde(rename = "ip")]
    pub address: String,

    /// Protocol version announced by the device, e.g. "3.3"
    #[serde(rename = "version")]
    pub protocol_version: Option<String>,
}

/// Requested outlet power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    On,
    Off,
}

impl PowerAction {
    pub fn is_on(self) -> bool {
        matches!(self, PowerAction::On)
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::On => f.write_str("on"),
            PowerAction::Off => f.write_str("off"),
        }
    }
}

impl FromStr for PowerAction {
    type Err = String;

    /// Only the exact lowercase words are accepted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerAction::On),
            "off" => Ok(PowerAction::Off),
            other => Err(format!("action must be 'on' or 'off', got '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_record_wire_names() {
        let record = DeviceRecord {
            id: "abc123".to_string(),
            address: "192.168.1.5".to_string(),
            protocol_version: Some("3.3".to_string()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "abc123");
        assert_eq!(json["ip"], "192.168.1.5");
        assert_eq!(json["version"], "3.3");
        assert!(json.get("address").is_none());
    }

    #[test]
    fn test_power_action_parse_is_strict() {
        assert_eq!("on".parse::<PowerAction>(), Ok(PowerAction::On));
        assert_eq!("off".parse::<PowerAction>(), Ok(PowerAction::Off));
        assert!("ON".parse::<PowerAction>().is_err());
        assert!("toggle".parse::<PowerAction>().is_err());
    }
}
