use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Key of the learning cache: `"<bridge>-<ofport>"`.
pub fn cache_key(bridge: &str, ofport: u32) -> String {
    format!("{bridge}-{ofport}")
}

/// One learned address on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedIp {
    pub ip: IpAddr,
    /// Monotonic timestamp (nanoseconds) of the last observation.
    pub last_seen_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCacheConfig {
    /// Entries not refreshed within this window are dropped.
    pub ttl_secs: u64,
    /// Scan interval of the sweeper.
    pub sweep_interval_secs: u64,
    /// Maximum accepted updates per key per second; excess updates are
    /// dropped silently to bound CPU under ARP floods.
    pub max_learning_per_sec: u32,
}

impl Default for IpCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            sweep_interval_secs: 5,
            max_learning_per_sec: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_format() {
        assert_eq!(cache_key("br0", 7), "br0-7");
    }

    #[test]
    fn default_config_matches_contract() {
        let cfg = IpCacheConfig::default();
        assert_eq!(cfg.ttl_secs, 60);
        assert_eq!(cfg.sweep_interval_secs, 5);
        assert_eq!(cfg.max_learning_per_sec, 5);
    }
}
