use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use domain::common::error::DatapathError;
use domain::flow::cookie;
use domain::flow::entity::{CtStates, FlowAction, FlowMatch, FlowSpec};
use domain::pipeline::tables::{ETH_TYPE_ARP, ETH_TYPE_IP};
use domain::rule::entity::FlowEntry;
use ports::secondary::flow_port::FlowProgrammer;
use tracing::debug;

const OPENFLOW_VERSION_FLAG: &str = "OpenFlow13";

/// `FlowProgrammer` over `ovs-ofctl`.
///
/// The connection flag is shared with the session supervisor, which
/// probes the bridge's management socket in the background.
pub struct OvsOfctl {
    bridge: String,
    connected: Arc<AtomicBool>,
    round: AtomicU64,
    seq: AtomicU64,
}

impl OvsOfctl {
    pub fn new(bridge: &str, connected: Arc<AtomicBool>) -> Self {
        Self {
            bridge: bridge.to_string(),
            connected,
            round: AtomicU64::new(0),
            seq: AtomicU64::new(0),
        }
    }

    fn run(&self, args: &[String]) -> Result<(), DatapathError> {
        let output = Command::new("ovs-ofctl")
            .arg("-O")
            .arg(OPENFLOW_VERSION_FLAG)
            .args(args)
            .output()
            .map_err(|err| DatapathError::InstallFailed {
                bridge: self.bridge.clone(),
                reason: format!("failed to spawn ovs-ofctl: {err}"),
            })?;

        if !output.status.success() {
            return Err(DatapathError::InstallFailed {
                bridge: self.bridge.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl FlowProgrammer for OvsOfctl {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_round(&self, round: u64) {
        self.round.store(round, Ordering::SeqCst);
    }

    fn install(&self, spec: &FlowSpec) -> Result<FlowEntry, DatapathError> {
        if !self.is_connected() {
            return Err(DatapathError::BridgeNotConnected {
                bridge: self.bridge.clone(),
            });
        }

        let round = self.round.load(Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let flow_cookie = cookie::encode(round, seq);

        let flow = render_flow(flow_cookie, spec);
        debug!(bridge = %self.bridge, %flow, "add-flow");
        self.run(&["add-flow".to_string(), self.bridge.clone(), flow])?;

        Ok(FlowEntry {
            table: spec.table,
            priority: spec.priority,
            flow_id: flow_cookie,
        })
    }

    fn uninstall(&self, entry: &FlowEntry) -> Result<(), DatapathError> {
        let selector = format!("cookie={:#x}/-1,table={}", entry.flow_id, entry.table);
        self.run(&["del-flows".to_string(), self.bridge.clone(), selector])
    }

    fn delete_flows_with_round(&self, round: u64) -> Result<(), DatapathError> {
        let (value, mask) = cookie::round_match(round);
        let selector = format!("cookie={value:#x}/{mask:#x}");
        self.run(&["del-flows".to_string(), self.bridge.clone(), selector])
    }

    fn set_port_no_flood(&self, port: u32) -> Result<(), DatapathError> {
        self.run(&[
            "mod-port".to_string(),
            self.bridge.clone(),
            port.to_string(),
            "no-flood".to_string(),
        ])
    }
}

/// Render a flow spec to ovs-ofctl add-flow syntax.
pub fn render_flow(flow_cookie: u64, spec: &FlowSpec) -> String {
    let mut parts = vec![
        format!("cookie={flow_cookie:#x}"),
        format!("table={}", spec.table),
        format!("priority={}", spec.priority),
    ];
    if spec.idle_timeout != 0 {
        parts.push(format!("idle_timeout={}", spec.idle_timeout));
    }
    if spec.hard_timeout != 0 {
        parts.push(format!("hard_timeout={}", spec.hard_timeout));
    }
    parts.extend(render_match(&spec.matches));

    format!("{} actions={}", parts.join(","), render_actions(&spec.actions))
}

fn render_match(m: &FlowMatch) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(port) = m.in_port {
        parts.push(format!("in_port={port}"));
    }
    if let Some(ref mac) = m.eth_src {
        parts.push(format!("dl_src={mac}"));
    }
    if let Some(ref mac) = m.eth_dst {
        parts.push(format!("dl_dst={mac}"));
    }
    if let Some(vlan) = m.vlan_id {
        parts.push(format!("dl_vlan={vlan}"));
    }

    // The protocol keyword subsumes the ethertype and selects which
    // L4 port pair applies.
    match (m.eth_type, m.ip_proto) {
        (Some(ETH_TYPE_ARP), _) => parts.push("arp".to_string()),
        (Some(ETH_TYPE_IP), Some(6)) => parts.push("tcp".to_string()),
        (Some(ETH_TYPE_IP), Some(17)) => parts.push("udp".to_string()),
        (Some(ETH_TYPE_IP), Some(1)) => parts.push("icmp".to_string()),
        (Some(ETH_TYPE_IP), Some(proto)) => {
            parts.push("ip".to_string());
            parts.push(format!("nw_proto={proto}"));
        }
        (Some(ETH_TYPE_IP), None) => parts.push("ip".to_string()),
        (Some(other), _) => parts.push(format!("dl_type={other:#06x}")),
        (None, _) => {}
    }

    if let Some(ct) = m.ct_states {
        parts.push(format!("ct_state={}", render_ct_states(ct)));
    }
    if let Some(ip) = m.ip_src {
        parts.push(format!("nw_src={}/{}", ip.addr, ip.mask));
    }
    if let Some(ip) = m.ip_dst {
        parts.push(format!("nw_dst={}/{}", ip.addr, ip.mask));
    }
    if let Some(ip) = m.arp_tpa {
        parts.push(format!("arp_tpa={ip}"));
    }

    // L4 ports are rendered only for the protocol the flow matches on.
    let (src_field, dst_field) = match m.ip_proto {
        Some(6) => (m.tcp_src, m.tcp_dst),
        Some(17) => (m.udp_src, m.udp_dst),
        _ => (None, None),
    };
    let proto_name = if m.ip_proto == Some(17) { "udp" } else { "tcp" };
    if let Some(port) = src_field {
        parts.push(render_port(proto_name, "src", port.port, port.mask));
    }
    if let Some(port) = dst_field {
        parts.push(render_port(proto_name, "dst", port.port, port.mask));
    }

    for reg in &m.regs {
        parts.push(format!("reg{}={:#x}/{:#x}", reg.reg, reg.value, reg.mask));
    }

    parts
}

fn render_port(proto: &str, side: &str, port: u16, mask: u16) -> String {
    if mask == 0xffff || mask == 0 {
        format!("{proto}_{side}={port}")
    } else {
        format!("{proto}_{side}={port:#x}/{mask:#x}")
    }
}

fn render_ct_states(ct: CtStates) -> String {
    let mut out = String::new();
    for (bit, name) in [
        (ct.trk, "trk"),
        (ct.new, "new"),
        (ct.est, "est"),
        (ct.inv, "inv"),
    ] {
        match bit {
            Some(true) => {
                out.push('+');
                out.push_str(name);
            }
            Some(false) => {
                out.push('-');
                out.push_str(name);
            }
            None => {}
        }
    }
    out
}

fn render_actions(actions: &[FlowAction]) -> String {
    actions
        .iter()
        .map(|action| match action {
            FlowAction::GotoTable(table) => format!("goto_table:{table}"),
            FlowAction::Output(port) => format!("output:{port}"),
            FlowAction::Normal => "NORMAL".to_string(),
            FlowAction::Controller => "CONTROLLER".to_string(),
            FlowAction::Drop => "drop".to_string(),
            FlowAction::Conntrack {
                commit,
                zone,
                table,
            } => {
                let mut inner = Vec::new();
                if *commit {
                    inner.push("commit".to_string());
                }
                if let Some(table) = table {
                    inner.push(format!("table={table}"));
                }
                inner.push(format!("zone={zone}"));
                format!("ct({})", inner.join(","))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::flow::entity::{IpMask, PortMask, RegMatch, TableId};
    use domain::pipeline::compiler::compile_rule;
    use domain::rule::entity::{PolicyDirection, PolicyRule, PolicyTier, RuleAction};

    #[test]
    fn renders_policy_rule_flow() {
        let rule = PolicyRule {
            rule_id: "R1".to_string(),
            priority: 80,
            src_ip_addr: Some("10.0.0.0/24".to_string()),
            dst_ip_addr: Some("10.0.1.5".to_string()),
            ip_protocol: 6,
            src_port: 0,
            src_port_mask: 0,
            dst_port: 80,
            dst_port_mask: 0xffff,
            action: RuleAction::Allow,
        };
        let spec = compile_rule(&rule, PolicyDirection::Egress, PolicyTier::Tier1).unwrap();
        let rendered = render_flow(0x0001_0000_0000_002a, &spec);
        assert_eq!(
            rendered,
            "cookie=0x100000000002a,table=25,priority=80,tcp,\
             nw_src=10.0.0.0/255.255.255.0,nw_dst=10.0.1.5/255.255.255.255,\
             tcp_dst=80 actions=goto_table:70"
        );
    }

    #[test]
    fn renders_conntrack_recirculation() {
        let spec = FlowSpec::new(
            TableId(0),
            300,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ..FlowMatch::default()
            },
            vec![FlowAction::Conntrack {
                commit: false,
                zone: 65520,
                table: Some(TableId(1)),
            }],
        );
        assert_eq!(
            render_flow(0x1, &spec),
            "cookie=0x1,table=0,priority=300,ip actions=ct(table=1,zone=65520)"
        );
    }

    #[test]
    fn renders_ct_commit() {
        let spec = FlowSpec::new(
            TableId(70),
            200,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ct_states: Some(CtStates::default().with_new(true).with_trk(true)),
                ..FlowMatch::default()
            },
            vec![FlowAction::Conntrack {
                commit: true,
                zone: 65520,
                table: Some(TableId(80)),
            }],
        );
        assert_eq!(
            render_flow(0x2, &spec),
            "cookie=0x2,table=70,priority=200,ip,ct_state=+trk+new \
             actions=ct(commit,table=80,zone=65520)"
        );
    }

    #[test]
    fn renders_established_bypass() {
        let spec = FlowSpec::new(
            TableId(1),
            203,
            FlowMatch {
                ct_states: Some(CtStates::default().with_new(false).with_est(true)),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(TableId(70))],
        );
        assert_eq!(
            render_flow(0x3, &spec),
            "cookie=0x3,table=1,priority=203,ct_state=-new+est actions=goto_table:70"
        );
    }

    #[test]
    fn renders_arp_learning_flow() {
        let spec = FlowSpec::new(
            TableId(0),
            300,
            FlowMatch {
                eth_type: Some(ETH_TYPE_ARP),
                ..FlowMatch::default()
            },
            vec![
                FlowAction::Controller,
                FlowAction::Normal,
                FlowAction::Output(101),
            ],
        );
        assert_eq!(
            render_flow(0x4, &spec),
            "cookie=0x4,table=0,priority=300,arp actions=CONTROLLER,NORMAL,output:101"
        );
    }

    #[test]
    fn renders_endpoint_forward_with_timeouts() {
        let spec = FlowSpec::new(
            TableId(0),
            100,
            FlowMatch {
                eth_dst: Some("aa:bb:cc:dd:ee:01".to_string()),
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(7)],
        )
        .with_timeouts(300, 300);
        assert_eq!(
            render_flow(0x5, &spec),
            "cookie=0x5,table=0,priority=100,idle_timeout=300,hard_timeout=300,\
             dl_dst=aa:bb:cc:dd:ee:01 actions=output:7"
        );
    }

    #[test]
    fn renders_register_match() {
        let spec = FlowSpec::new(
            TableId(90),
            100,
            FlowMatch {
                in_port: Some(102),
                regs: vec![RegMatch {
                    reg: 6,
                    value: 0,
                    mask: 0xffff,
                }],
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(201)],
        );
        assert_eq!(
            render_flow(0x6, &spec),
            "cookie=0x6,table=90,priority=100,in_port=102,reg6=0x0/0xffff actions=output:201"
        );
    }

    #[test]
    fn udp_ports_render_for_udp_protocol_only() {
        let mut matches = FlowMatch {
            eth_type: Some(ETH_TYPE_IP),
            ip_proto: Some(17),
            tcp_dst: Some(PortMask {
                port: 53,
                mask: 0xffff,
            }),
            udp_dst: Some(PortMask {
                port: 53,
                mask: 0xffff,
            }),
            ..FlowMatch::default()
        };
        let spec = FlowSpec::new(TableId(25), 50, matches.clone(), vec![FlowAction::Drop]);
        assert_eq!(
            render_flow(0x7, &spec),
            "cookie=0x7,table=25,priority=50,udp,udp_dst=53 actions=drop"
        );

        // Without a protocol, ports cannot apply at all.
        matches.ip_proto = None;
        let spec = FlowSpec::new(TableId(25), 50, matches, vec![FlowAction::Drop]);
        assert_eq!(
            render_flow(0x8, &spec),
            "cookie=0x8,table=25,priority=50,ip actions=drop"
        );
    }

    #[test]
    fn renders_masked_port() {
        let spec = FlowSpec::new(
            TableId(25),
            50,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ip_proto: Some(6),
                tcp_dst: Some(PortMask {
                    port: 0x0400,
                    mask: 0xfc00,
                }),
                ..FlowMatch::default()
            },
            vec![FlowAction::Drop],
        );
        assert_eq!(
            render_flow(0x9, &spec),
            "cookie=0x9,table=25,priority=50,tcp,tcp_dst=0x400/0xfc00 actions=drop"
        );
    }

    #[test]
    fn renders_host_ip_match() {
        let spec = FlowSpec::new(
            TableId(60),
            100,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ip_dst: Some(IpMask::host("10.0.0.1".parse().unwrap())),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(TableId(70))],
        );
        assert_eq!(
            render_flow(0xa, &spec),
            "cookie=0xa,table=60,priority=100,ip,nw_dst=10.0.0.1/255.255.255.255 \
             actions=goto_table:70"
        );
    }
}
