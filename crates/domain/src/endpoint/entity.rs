use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use super::error::EndpointError;

/// A local L2/L3 attachment on one bridge: a guest interface plugged
/// into a managed virtual switch.
///
/// The interface name is the endpoint's identity within the host. IP
/// addresses are optional: when absent they are learned from observed
/// ARP traffic and written back into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Interface name the endpoint is attached to (unique per host).
    pub interface_name: String,
    /// MAC address in colon-separated string form.
    pub mac_addr: String,
    /// Learned or declared IPv4 address.
    pub ip_addr: Option<Ipv4Addr>,
    /// Declared IPv6 address, if any. Not used for policy matching.
    pub ipv6_addr: Option<Ipv6Addr>,
    /// OpenFlow port number on the LOCAL bridge.
    pub port_no: u32,
    /// 802.1Q VLAN the endpoint lives on (0 = untagged).
    pub vlan_id: u16,
    /// Name of the LOCAL bridge the endpoint is attached to.
    pub bridge_name: String,
}

impl Endpoint {
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.interface_name.is_empty() {
            return Err(EndpointError::EmptyInterfaceName);
        }
        if self.bridge_name.is_empty() {
            return Err(EndpointError::EmptyBridgeName);
        }
        if !is_valid_mac(&self.mac_addr) {
            return Err(EndpointError::InvalidMac {
                mac: self.mac_addr.clone(),
            });
        }
        if self.vlan_id > 4094 {
            return Err(EndpointError::InvalidVlanId {
                vlan_id: self.vlan_id,
            });
        }
        Ok(())
    }
}

/// Six colon-separated hex octets, e.g. `aa:bb:cc:dd:ee:01`.
fn is_valid_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}
