use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use domain::common::entity::BridgeKind;
use ports::events::{SwitchEvent, SwitchEventEnvelope, SwitchEventSender};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SESSION_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Supervise one bridge's OpenFlow session.
///
/// Probes the bridge through its management socket, flips the shared
/// connection flag, and emits Connected/Disconnected events. For the
/// LOCAL bridge a packet-in monitor child is kept running while the
/// session is up, feeding ARP/IPv4 observations into the event
/// channel.
#[allow(clippy::too_many_arguments)]
pub fn spawn_session_supervisor(
    vds_id: String,
    kind: BridgeKind,
    bridge_name: String,
    mgmt_sock: PathBuf,
    controller_id: u16,
    connected: Arc<AtomicBool>,
    events: SwitchEventSender,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            vds = %vds_id,
            bridge = %bridge_name,
            controller_id,
            "session supervisor started"
        );

        let mut monitor: Option<tokio::process::Child> = None;
        let mut was_connected = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(SESSION_PROBE_INTERVAL) => {}
            }

            let up = mgmt_sock.exists() && probe_bridge(&bridge_name).await;
            if up != was_connected {
                connected.store(up, Ordering::SeqCst);
                let event = if up {
                    SwitchEvent::Connected
                } else {
                    SwitchEvent::Disconnected
                };
                info!(vds = %vds_id, bridge = %bridge_name, connected = up, "session state changed");
                if events
                    .send(SwitchEventEnvelope {
                        vds_id: vds_id.clone(),
                        bridge: kind,
                        event,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                was_connected = up;
            }

            // Only the LOCAL bridge learns addresses from packet-ins.
            if kind == BridgeKind::Local {
                if up && monitor.is_none() {
                    monitor = spawn_packet_in_monitor(
                        &vds_id,
                        kind,
                        &bridge_name,
                        events.clone(),
                        cancel.clone(),
                    );
                } else if !up {
                    if let Some(mut child) = monitor.take() {
                        let _ = child.start_kill();
                    }
                }
            }
        }

        if let Some(mut child) = monitor {
            let _ = child.start_kill();
        }
        debug!(vds = %vds_id, bridge = %bridge_name, "session supervisor stopped");
    })
}

/// `ovs-ofctl show` answers only when the switch side of the bridge is
/// reachable through its management socket.
async fn probe_bridge(bridge_name: &str) -> bool {
    Command::new("ovs-ofctl")
        .args(["-O", "OpenFlow13", "show", bridge_name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Start an `ovs-ofctl monitor` child and pump its packet-in lines
/// into the event channel.
fn spawn_packet_in_monitor(
    vds_id: &str,
    kind: BridgeKind,
    bridge_name: &str,
    events: SwitchEventSender,
    cancel: CancellationToken,
) -> Option<tokio::process::Child> {
    let mut child = match Command::new("ovs-ofctl")
        .args(["-O", "OpenFlow13", "monitor", bridge_name, "65535"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(bridge = %bridge_name, error = %err, "failed to start packet-in monitor");
            return None;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        warn!(bridge = %bridge_name, "packet-in monitor has no stdout");
        return None;
    };

    let vds_id = vds_id.to_string();
    let bridge_name = bridge_name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = MonitorParser::default();

        loop {
            let line = tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if let Some((in_port, ip)) = parser.push_line(&line) {
                        let envelope = SwitchEventEnvelope {
                            vds_id: vds_id.clone(),
                            bridge: kind,
                            event: SwitchEvent::PacketIn { in_port, ip },
                        };
                        if events.send(envelope).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(bridge = %bridge_name, error = %err, "packet-in monitor read failed");
                    break;
                }
            }
        }
    });

    Some(child)
}

/// Incremental parser for `ovs-ofctl monitor` output.
///
/// A packet-in is printed as a header line carrying `in_port=N`
/// followed by a flow summary line carrying the addresses; the source
/// address field is `arp_spa` for ARP and `nw_src` for IPv4.
#[derive(Debug, Default)]
pub struct MonitorParser {
    pending_in_port: Option<u32>,
}

impl MonitorParser {
    pub fn push_line(&mut self, line: &str) -> Option<(u32, IpAddr)> {
        if line.contains("PACKET_IN") {
            self.pending_in_port = extract_field(line, "in_port=").and_then(|v| v.parse().ok());
            return None;
        }

        let in_port = self.pending_in_port?;
        let source = extract_field(line, "arp_spa=").or_else(|| extract_field(line, "nw_src="))?;
        let ip: IpAddr = source.parse().ok()?;
        if ip.is_unspecified() {
            return None;
        }

        self.pending_in_port = None;
        Some((in_port, ip))
    }
}

fn extract_field(line: &str, prefix: &str) -> Option<String> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    let end = rest
        .find(|c: char| c == ',' || c == ' ' || c == ')')
        .unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const HEADER: &str = "OFPT_PACKET_IN (OF1.3) (xid=0x0): total_len=60 in_port=7 (via no_match) data_len=60 (unbuffered)";

    #[test]
    fn parses_arp_packet_in() {
        let mut parser = MonitorParser::default();
        assert_eq!(parser.push_line(HEADER), None);

        let summary = "arp,vlan_tci=0x0000,dl_src=aa:bb:cc:dd:ee:01,dl_dst=ff:ff:ff:ff:ff:ff,arp_spa=10.0.0.5,arp_tpa=10.0.0.1,arp_op=1";
        assert_eq!(
            parser.push_line(summary),
            Some((7, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))))
        );
    }

    #[test]
    fn parses_ipv4_packet_in() {
        let mut parser = MonitorParser::default();
        parser.push_line(HEADER);

        let summary =
            "tcp,vlan_tci=0x0000,dl_src=aa:bb:cc:dd:ee:01,nw_src=10.0.0.9,nw_dst=10.0.1.5,tp_dst=80";
        assert_eq!(
            parser.push_line(summary),
            Some((7, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))))
        );
    }

    #[test]
    fn summary_without_header_is_ignored() {
        let mut parser = MonitorParser::default();
        assert_eq!(parser.push_line("arp,arp_spa=10.0.0.5"), None);
    }

    #[test]
    fn consumes_header_once() {
        let mut parser = MonitorParser::default();
        parser.push_line(HEADER);
        let summary = "arp,arp_spa=10.0.0.5,arp_tpa=10.0.0.1";
        assert!(parser.push_line(summary).is_some());
        assert_eq!(parser.push_line(summary), None);
    }

    #[test]
    fn unspecified_source_is_dropped() {
        let mut parser = MonitorParser::default();
        parser.push_line(HEADER);
        assert_eq!(parser.push_line("arp,arp_spa=0.0.0.0,arp_op=1"), None);
    }

    #[test]
    fn non_packet_lines_are_ignored() {
        let mut parser = MonitorParser::default();
        assert_eq!(parser.push_line("OFPT_ECHO_REQUEST (OF1.3) (xid=0x0): 0 bytes of payload"), None);
        assert_eq!(parser.push_line(""), None);
    }
}
