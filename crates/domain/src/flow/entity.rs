use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// OpenFlow table number on one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u8);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// IPv4 address with an explicit match mask.
///
/// A host address carries mask `255.255.255.255`; a CIDR carries the
/// CIDR's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpMask {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl IpMask {
    pub fn host(addr: Ipv4Addr) -> Self {
        Self {
            addr,
            mask: Ipv4Addr::BROADCAST,
        }
    }
}

/// L4 port with a match mask (`0xffff` = exact). Wildcard ports are
/// `None` in the match, never a zero port with a zero mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMask {
    pub port: u16,
    pub mask: u16,
}

/// Connection-tracking state bits to match. `Some(true)` requires the
/// bit set, `Some(false)` requires it clear, `None` leaves it
/// unmatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtStates {
    pub new: Option<bool>,
    pub est: Option<bool>,
    pub inv: Option<bool>,
    pub trk: Option<bool>,
}

impl CtStates {
    pub fn with_new(mut self, set: bool) -> Self {
        self.new = Some(set);
        self
    }

    pub fn with_est(mut self, set: bool) -> Self {
        self.est = Some(set);
        self
    }

    pub fn with_inv(mut self, set: bool) -> Self {
        self.inv = Some(set);
        self
    }

    pub fn with_trk(mut self, set: bool) -> Self {
        self.trk = Some(set);
        self
    }
}

/// NXM register match over a bit range expressed as value + mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegMatch {
    pub reg: u8,
    pub value: u32,
    pub mask: u32,
}

/// Match side of a flow. All fields are optional; the L4 port fields
/// are applied by the switch only when the protocol field selects the
/// corresponding protocol, so the compiler may fill both TCP and UDP
/// ports on one spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub in_port: Option<u32>,
    pub eth_type: Option<u16>,
    pub eth_src: Option<String>,
    pub eth_dst: Option<String>,
    pub vlan_id: Option<u16>,
    pub ip_src: Option<IpMask>,
    pub ip_dst: Option<IpMask>,
    pub ip_proto: Option<u8>,
    pub tcp_src: Option<PortMask>,
    pub tcp_dst: Option<PortMask>,
    pub udp_src: Option<PortMask>,
    pub udp_dst: Option<PortMask>,
    pub ct_states: Option<CtStates>,
    pub arp_tpa: Option<Ipv4Addr>,
    pub regs: Vec<RegMatch>,
}

/// Action side of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    /// Resubmit to another table on the same bridge.
    GotoTable(TableId),
    /// Emit on a specific port.
    Output(u32),
    /// The switch's L2 learning/forwarding path.
    Normal,
    /// Punt a copy to the controller (packet-in).
    Controller,
    /// Drop the packet.
    Drop,
    /// Connection-tracking recirculation, optionally committing the
    /// connection, continuing at `table`.
    Conntrack {
        commit: bool,
        zone: u16,
        table: Option<TableId>,
    },
}

/// One complete flow to install: table, priority, timeouts, match and
/// action list. This is the pure artifact the bridge logic and the
/// rule compiler produce; an adapter renders it for the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub table: TableId,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    #[serde(rename = "match")]
    pub matches: FlowMatch,
    pub actions: Vec<FlowAction>,
}

impl FlowSpec {
    /// Permanent flow (no timeouts), the common case.
    pub fn new(table: TableId, priority: u16, matches: FlowMatch, actions: Vec<FlowAction>) -> Self {
        Self {
            table,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            matches,
            actions,
        }
    }

    pub fn with_timeouts(mut self, idle: u16, hard: u16) -> Self {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_mask_is_broadcast() {
        let m = IpMask::host(Ipv4Addr::new(10, 0, 1, 5));
        assert_eq!(m.mask, Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn ct_states_builder() {
        let ct = CtStates::default().with_new(false).with_est(true);
        assert_eq!(ct.new, Some(false));
        assert_eq!(ct.est, Some(true));
        assert_eq!(ct.inv, None);
    }

    #[test]
    fn flow_spec_defaults_to_permanent() {
        let spec = FlowSpec::new(
            TableId(0),
            100,
            FlowMatch::default(),
            vec![FlowAction::Drop],
        );
        assert_eq!(spec.idle_timeout, 0);
        assert_eq!(spec.hard_timeout, 0);

        let timed = spec.with_timeouts(300, 300);
        assert_eq!(timed.idle_timeout, 300);
        assert_eq!(timed.hard_timeout, 300);
    }
}
