use std::sync::Arc;

use domain::common::error::DatapathError;
use domain::flow::entity::{FlowAction, FlowMatch, FlowSpec};
use domain::pipeline::tables::{DEFAULT_FLOW_MISS_PRIORITY, INPUT_TABLE};
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tracing::debug;

use super::BridgePorts;

/// Classifier bridge between the policy side and the uplink side.
///
/// Forwarding is the switch's L2 learning path; learned entries age
/// out on the switch's 300 s timer.
pub struct ClsBridge {
    ports: BridgePorts,
}

impl ClsBridge {
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

        debug!(bridge = %self.ports.name, "cls bridge pipeline programmed");
        Ok(())
    }
}
