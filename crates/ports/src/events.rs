use std::net::IpAddr;

use domain::common::entity::BridgeKind;

/// Event raised by a bridge's session adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// The OpenFlow session to the bridge came up.
    Connected,
    /// The session dropped; the owner must replay this bridge once the
    /// session is re-established.
    Disconnected,
    /// A packet-in carrying an IPv4 or ARP header was received.
    PacketIn { in_port: u32, ip: IpAddr },
}

/// A switch event tagged with its origin in the bridge chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchEventEnvelope {
    pub vds_id: String,
    pub bridge: BridgeKind,
    pub event: SwitchEvent,
}

/// Sender half used by session adapters to publish switch events.
pub type SwitchEventSender = tokio::sync::mpsc::Sender<SwitchEventEnvelope>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn envelope_carries_origin() {
        let env = SwitchEventEnvelope {
            vds_id: "v0".to_string(),
            bridge: BridgeKind::Local,
            event: SwitchEvent::PacketIn {
                in_port: 7,
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            },
        };
        assert_eq!(env.bridge, BridgeKind::Local);
        assert!(matches!(env.event, SwitchEvent::PacketIn { in_port: 7, .. }));
    }
}
