use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// The four bridges that make up one virtual-switch chain.
///
/// Traffic flows LOCAL → POLICY → CLS → UPLINK towards the physical
/// network; the reverse direction is symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeKind {
    Local,
    Policy,
    Cls,
    Uplink,
}

impl BridgeKind {
    pub const ALL: [BridgeKind; 4] = [Self::Local, Self::Policy, Self::Cls, Self::Uplink];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Policy => "policy",
            Self::Cls => "cls",
            Self::Uplink => "uplink",
        }
    }

    /// OVS bridge name for this kind, given the chain's base bridge name.
    /// The LOCAL bridge carries the base name itself; the others are
    /// suffixed.
    pub fn bridge_name(self, base: &str) -> String {
        match self {
            Self::Local => base.to_string(),
            Self::Policy => format!("{base}-policy"),
            Self::Cls => format!("{base}-cls"),
            Self::Uplink => format!("{base}-uplink"),
        }
    }
}

impl std::fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-gateway settings used when the agent runs as a CNI backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CniSettings {
    pub local_gateway_ip: Ipv4Addr,
    pub local_gateway_mac: String,
}

/// Static configuration of the datapath manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatapathConfig {
    /// VDS id → base bridge name.
    pub managed_vds: BTreeMap<String, String>,
    /// Host-local addresses whose traffic must always pass; each gets
    /// an ingress and an egress whitelist rule at tier 2.
    pub internal_ips: Vec<String>,
    /// Present when the agent runs as a CNI backend.
    pub cni: Option<CniSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_names_from_base() {
        assert_eq!(BridgeKind::Local.bridge_name("br0"), "br0");
        assert_eq!(BridgeKind::Policy.bridge_name("br0"), "br0-policy");
        assert_eq!(BridgeKind::Cls.bridge_name("br0"), "br0-cls");
        assert_eq!(BridgeKind::Uplink.bridge_name("br0"), "br0-uplink");
    }

    #[test]
    fn all_covers_every_kind() {
        assert_eq!(BridgeKind::ALL.len(), 4);
    }
}
