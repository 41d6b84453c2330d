use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use domain::common::error::DatapathError;
use domain::endpoint::entity::Endpoint;
use domain::flow::entity::{FlowAction, FlowMatch, FlowSpec};
use domain::pipeline::tables::{
    DEFAULT_FLOW_MISS_PRIORITY, ETH_TYPE_ARP, HIGH_MATCH_FLOW_PRIORITY, INPUT_TABLE,
    L2_FORWARDING_HARD_TIMEOUT, L2_FORWARDING_IDLE_TIMEOUT, LOCAL_GATEWAY_PORT,
    LOCAL_TO_POLICY_PORT, MID_MATCH_FLOW_PRIORITY, NORMAL_MATCH_FLOW_PRIORITY,
    POLICY_TO_LOCAL_PORT,
};
use domain::rule::entity::FlowEntry;
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tracing::debug;

use super::{BridgePorts, CniSettings};

/// The bridge closest to guest interfaces.
///
/// Guest traffic enters here, is pinned to its declared source MAC,
/// and is handed to the POLICY bridge through the patch port; return
/// traffic comes back on the reverse patch port and is delivered by
/// per-endpoint forwarding flows or the switch's learning path.
/// ARP observed here is copied to the controller to feed IP learning.
pub struct LocalBridge {
    ports: BridgePorts,
    /// Interface name → flows installed for that endpoint.
    endpoint_flows: Mutex<HashMap<String, Vec<FlowEntry>>>,
}

impl LocalBridge {
    pub fn new(ports: BridgePorts) -> Self {
        Self {
            ports,
            endpoint_flows: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.ports.name
    }

    pub fn flows(&self) -> &Arc<dyn FlowProgrammer> {
        &self.ports.flows
    }

    pub fn ovsdb(&self) -> &Arc<dyn OvsdbBridge> {
        &self.ports.ovsdb
    }

    /// Program the static pipeline. Clears stale per-endpoint handles;
    /// the caller re-adds registered endpoints afterwards.
    pub fn init(&self) -> Result<(), DatapathError> {
        self.endpoint_flows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();

        let flows = &self.ports.flows;

        // ARP: flood locally (the policy patch port is no-flood), copy
        // to the controller for IP learning, and forward up the chain.
        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                eth_type: Some(ETH_TYPE_ARP),
                ..FlowMatch::default()
            },
            vec![
                FlowAction::Controller,
                FlowAction::Normal,
                FlowAction::Output(LOCAL_TO_POLICY_PORT),
            ],
        ))?;

        // Return traffic from the policy side: deliver via the L2 path.
        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_LOCAL_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::Normal],
        ))?;

        // Unknown source MACs never leave the bridge.
        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            DEFAULT_FLOW_MISS_PRIORITY,
            FlowMatch::default(),
            vec![FlowAction::Drop],
        ))?;

        debug!(bridge = %self.ports.name, "local bridge pipeline programmed");
        Ok(())
    }

    /// Gateway plumbing for CNI mode: answer ARP for the local gateway
    /// via the controller and pass gateway-port traffic up the chain.
    pub fn init_cni(&self, settings: &CniSettings) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                eth_type: Some(ETH_TYPE_ARP),
                arp_tpa: Some(settings.local_gateway_ip),
                ..FlowMatch::default()
            },
            vec![FlowAction::Controller],
        ))?;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(LOCAL_GATEWAY_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(LOCAL_TO_POLICY_PORT)],
        ))?;

        debug!(bridge = %self.ports.name, gateway = %settings.local_gateway_ip, "local bridge CNI flows programmed");
        Ok(())
    }

    /// Install the per-endpoint flow pair: an anti-spoof source pin and
    /// a timed destination forward.
    pub fn add_endpoint(&self, endpoint: &Endpoint) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;

        let anti_spoof = flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(endpoint.port_no),
                eth_src: Some(endpoint.mac_addr.clone()),
                vlan_id: (endpoint.vlan_id != 0).then_some(endpoint.vlan_id),
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(LOCAL_TO_POLICY_PORT)],
        ))?;

        let forward = flows.install(
            &FlowSpec::new(
                INPUT_TABLE,
                NORMAL_MATCH_FLOW_PRIORITY,
                FlowMatch {
                    eth_dst: Some(endpoint.mac_addr.clone()),
                    ..FlowMatch::default()
                },
                vec![FlowAction::Output(endpoint.port_no)],
            )
            .with_timeouts(L2_FORWARDING_IDLE_TIMEOUT, L2_FORWARDING_HARD_TIMEOUT),
        )?;

        self.endpoint_flows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(endpoint.interface_name.clone(), vec![anti_spoof, forward]);

        debug!(
            bridge = %self.ports.name,
            interface = %endpoint.interface_name,
            mac = %endpoint.mac_addr,
            port = endpoint.port_no,
            "endpoint flows installed"
        );
        Ok(())
    }

    /// Remove the endpoint's flow pair.
    pub fn remove_endpoint(&self, endpoint: &Endpoint) -> Result<(), DatapathError> {
        let entries = self
            .endpoint_flows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&endpoint.interface_name);

        if let Some(entries) = entries {
            for entry in &entries {
                self.ports.flows.uninstall(entry)?;
            }
        }

        debug!(
            bridge = %self.ports.name,
            interface = %endpoint.interface_name,
            "endpoint flows removed"
        );
        Ok(())
    }

    /// Number of endpoints this bridge currently holds flows for.
    pub fn endpoint_count(&self) -> usize {
        self.endpoint_flows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::flow::entity::TableId;
    use ports::test_utils::{MockOvsdb, MockSwitch};

    fn make_bridge() -> (LocalBridge, Arc<MockSwitch>) {
        let switch = Arc::new(MockSwitch::new("br0"));
        switch.set_round(1);
        let bridge = LocalBridge::new(BridgePorts {
            name: "br0".to_string(),
            flows: switch.clone(),
            ovsdb: Arc::new(MockOvsdb::new()),
        });
        (bridge, switch)
    }

    fn make_endpoint() -> Endpoint {
        Endpoint {
            interface_name: "veth0".to_string(),
            mac_addr: "aa:bb:cc:dd:ee:01".to_string(),
            ip_addr: None,
            ipv6_addr: None,
            port_no: 7,
            vlan_id: 100,
            bridge_name: "br0".to_string(),
        }
    }

    #[test]
    fn init_installs_defaults() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();
        assert_eq!(switch.flow_count(), 3);

        let miss: Vec<_> = switch
            .flows_in_table(TableId(0))
            .into_iter()
            .filter(|f| f.priority == DEFAULT_FLOW_MISS_PRIORITY)
            .collect();
        assert_eq!(miss.len(), 1);
        assert_eq!(miss[0].actions, vec![FlowAction::Drop]);
    }

    #[test]
    fn endpoint_flows_match_spec() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();
        let base = switch.flow_count();

        bridge.add_endpoint(&make_endpoint()).unwrap();
        assert_eq!(switch.flow_count(), base + 2);

        let flows = switch.flows();
        let anti_spoof = flows
            .iter()
            .find(|(_, f)| f.matches.eth_src.as_deref() == Some("aa:bb:cc:dd:ee:01"))
            .map(|(_, f)| f.clone())
            .expect("anti-spoof flow present");
        assert_eq!(anti_spoof.matches.in_port, Some(7));
        assert_eq!(anti_spoof.priority, HIGH_MATCH_FLOW_PRIORITY);

        let forward = flows
            .iter()
            .find(|(_, f)| f.matches.eth_dst.as_deref() == Some("aa:bb:cc:dd:ee:01"))
            .map(|(_, f)| f.clone())
            .expect("forward flow present");
        assert_eq!(forward.actions, vec![FlowAction::Output(7)]);
        assert_eq!(forward.idle_timeout, 300);
        assert_eq!(forward.hard_timeout, 300);
    }

    #[test]
    fn add_then_remove_restores_flow_table() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();
        let base = switch.flow_count();

        let ep = make_endpoint();
        bridge.add_endpoint(&ep).unwrap();
        bridge.remove_endpoint(&ep).unwrap();
        assert_eq!(switch.flow_count(), base);
        assert_eq!(bridge.endpoint_count(), 0);
    }

    #[test]
    fn cni_init_adds_gateway_flows() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();
        let base = switch.flow_count();

        bridge
            .init_cni(&CniSettings {
                local_gateway_ip: "10.244.0.1".parse().unwrap(),
                local_gateway_mac: "02:00:00:00:00:01".to_string(),
            })
            .unwrap();
        assert_eq!(switch.flow_count(), base + 2);

        let arp_proxy = switch
            .flows()
            .into_iter()
            .find(|(_, f)| f.matches.arp_tpa.is_some())
            .map(|(_, f)| f)
            .expect("gateway ARP flow present");
        assert_eq!(arp_proxy.actions, vec![FlowAction::Controller]);
    }
}
