use std::sync::Arc;

use domain::common::entity::BridgeKind;
use domain::common::error::DatapathError;

use super::flow_port::FlowProgrammer;
use super::ovsdb_port::OvsdbBridge;

/// Factory for the per-bridge port pair.
///
/// The production implementation spins up an OpenFlow session
/// supervisor and an OVSDB driver per bridge; the mock hands out
/// in-memory doubles. Construction must not block on the switch:
/// sessions connect in the background and report through
/// `FlowProgrammer::is_connected` and the switch-event channel.
pub trait SwitchBackend: Send + Sync {
    /// `controller_id` is the unique 16-bit id the session registers
    /// under; the caller owns the id set.
    fn flow_programmer(
        &self,
        vds_id: &str,
        kind: BridgeKind,
        bridge_name: &str,
        controller_id: u16,
    ) -> Result<Arc<dyn FlowProgrammer>, DatapathError>;

    fn ovsdb_bridge(
        &self,
        vds_id: &str,
        kind: BridgeKind,
        bridge_name: &str,
    ) -> Result<Arc<dyn OvsdbBridge>, DatapathError>;
}
