use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("interface name must not be empty")]
    EmptyInterfaceName,

    #[error("invalid MAC address: {mac}")]
    InvalidMac { mac: String },

    #[error("invalid VLAN ID: {vlan_id} (must be 0-4094)")]
    InvalidVlanId { vlan_id: u16 },

    #[error("bridge name must not be empty")]
    EmptyBridgeName,
}
