/// Protocol version assumed when a command does not name one
pub const DEFAULT_PROTOCOL_VERSION: f64 = 3.3;

/// Address placeholder asking the bridge to discover the device itself
pub const AUTO_ADDRESS: &str = "auto";

/// mDNS service type for bridge self-advertisement
pub const BRIDGE_SERVICE_TYPE: &str = "_outlet-bridge._tcp.local.";

/// TXT record keys used in bridge self-advertisement
pub const TXT_SITE: &str = "site";
pub const TXT_VERSION: &str = "version";

/// API paths
pub const PATH_HEALTH: &str = "/health";
pub const PATH_COMMAND: &str = "/tuya/command";
pub const PATH_DEVICES: &str = "/tuya/devices";
pub const PATH_SYNC: &str = "/tuya/sync";
pub const PATH_CONFIG_SITE: &str = "/config/site";
pub const PATH_CONFIG_SUPABASE: &str = "/config/supabase";
pub const PATH_CONFIG_TUYA: &str = "/config/tuya";
