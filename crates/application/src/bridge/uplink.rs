use std::sync::Arc;

use domain::common::error::DatapathError;
use domain::flow::entity::{FlowAction, FlowMatch, FlowSpec};
use domain::pipeline::tables::{DEFAULT_FLOW_MISS_PRIORITY, INPUT_TABLE};
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tracing::debug;

use super::BridgePorts;

/// The bridge attaching the physical NIC and the host gateway
/// interface. External traffic enters the chain here; ARP for the
/// gateway is answered by the switch's own L2/ARP handling.
pub struct UplinkBridge {
    ports: BridgePorts,
}

impl UplinkBridge {
    pub fn new(ports: BridgePorts) -> Self {
        Self { ports }
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

    pub fn init(&self) -> Result<(), DatapathError> {
        self.ports.flows.install(&FlowSpec::new(
            INPUT_TABLE,
            DEFAULT_FLOW_MISS_PRIORITY,
            FlowMatch::default(),
            vec![FlowAction::Normal],
        ))?;

        debug!(bridge = %self.ports.name, "uplink bridge pipeline programmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ports::test_utils::{MockOvsdb, MockSwitch};

    #[test]
    fn init_bridges_external_traffic_via_normal() {
        let switch = Arc::new(MockSwitch::new("br0-uplink"));
        switch.set_round(1);
        let bridge = UplinkBridge::new(BridgePorts {
            name: "br0-uplink".to_string(),
            flows: switch.clone(),
            ovsdb: Arc::new(MockOvsdb::new()),
        });

        bridge.init().unwrap();
        let flows = switch.flows_in_table(INPUT_TABLE);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].actions, vec![FlowAction::Normal]);
    }
}
