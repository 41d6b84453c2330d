//! Translation of a policy rule intent into the flow realising it on
//! the POLICY bridge.

use std::net::Ipv4Addr;

use crate::flow::entity::{FlowAction, FlowMatch, FlowSpec, IpMask, PortMask};
use crate::rule::entity::{PolicyDirection, PolicyRule, PolicyTier, RuleAction};
use crate::rule::error::RuleError;

use super::tables::{ETH_TYPE_IP, tier_tables};

/// Parse an IP address string with an optional CIDR suffix into an
/// address/mask pair. A bare address matches exactly (mask /32).
pub fn parse_ip_mask(addr: &str) -> Result<IpMask, RuleError> {
    let invalid = || RuleError::InvalidIpAddr {
        addr: addr.to_string(),
    };

    match addr.split_once('/') {
        None => {
            let ip: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
            Ok(IpMask::host(ip))
        }
        Some((ip_part, prefix_part)) => {
            let ip: Ipv4Addr = ip_part.parse().map_err(|_| invalid())?;
            let prefix: u8 = prefix_part.parse().map_err(|_| invalid())?;
            if prefix > 32 {
                return Err(invalid());
            }
            let mask_bits = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
            Ok(IpMask {
                addr: ip,
                mask: Ipv4Addr::from(mask_bits),
            })
        }
    }
}

fn port_mask(port: u16, mask: u16) -> Option<PortMask> {
    if port == 0 && mask == 0 {
        None
    } else {
        Some(PortMask { port, mask })
    }
}

/// Compile a rule into the flow spec for its tier table.
///
/// The match always carries ethertype IPv4; IP fields and the protocol
/// are added when present. Both TCP and UDP port fields are filled;
/// the switch applies only the pair selected by the protocol field.
/// An allow targets the tier's next table, a deny targets the drop
/// action. Errors are returned before any flow is touched.
pub fn compile_rule(
    rule: &PolicyRule,
    direction: PolicyDirection,
    tier: PolicyTier,
) -> Result<FlowSpec, RuleError> {
    rule.validate()?;

    let (policy_table, next_table) = tier_tables(direction, tier);

    let ip_src = rule
        .src_ip_addr
        .as_deref()
        .map(parse_ip_mask)
        .transpose()?;
    let ip_dst = rule
        .dst_ip_addr
        .as_deref()
        .map(parse_ip_mask)
        .transpose()?;

    let matches = FlowMatch {
        eth_type: Some(ETH_TYPE_IP),
        ip_src,
        ip_dst,
        ip_proto: (rule.ip_protocol != 0).then_some(rule.ip_protocol),
        tcp_src: port_mask(rule.src_port, rule.src_port_mask),
        tcp_dst: port_mask(rule.dst_port, rule.dst_port_mask),
        udp_src: port_mask(rule.src_port, rule.src_port_mask),
        udp_dst: port_mask(rule.dst_port, rule.dst_port_mask),
        ..FlowMatch::default()
    };

    let actions = match rule.action {
        RuleAction::Allow => vec![FlowAction::GotoTable(next_table)],
        RuleAction::Deny => vec![FlowAction::Drop],
    };

    Ok(FlowSpec::new(policy_table, rule.priority, matches, actions))
}
