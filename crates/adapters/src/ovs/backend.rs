use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use domain::common::entity::BridgeKind;
use domain::common::error::DatapathError;
use ports::events::SwitchEventSender;
use ports::secondary::backend::SwitchBackend;
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tokio_util::sync::CancellationToken;

use super::controller::spawn_session_supervisor;
use super::ofctl::OvsOfctl;
use super::vsctl::OvsdbDriver;

const MGMT_SOCK_SUFFIX: &str = "mgmt";

/// Production `SwitchBackend` over a local OVS installation.
pub struct OvsBackend {
    run_dir: PathBuf,
    db_sock: String,
    events: SwitchEventSender,
    cancel: CancellationToken,
}

impl OvsBackend {
    pub fn new(
        run_dir: PathBuf,
        db_sock: String,
        events: SwitchEventSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_dir,
            db_sock,
            events,
            cancel,
        }
    }
}

impl SwitchBackend for OvsBackend {
    fn flow_programmer(
        &self,
        vds_id: &str,
        kind: BridgeKind,
        bridge_name: &str,
        controller_id: u16,
    ) -> Result<Arc<dyn FlowProgrammer>, DatapathError> {
        let connected = Arc::new(AtomicBool::new(false));
        let mgmt_sock = self
            .run_dir
            .join(format!("{bridge_name}.{MGMT_SOCK_SUFFIX}"));

        spawn_session_supervisor(
            vds_id.to_string(),
            kind,
            bridge_name.to_string(),
            mgmt_sock,
            controller_id,
            Arc::clone(&connected),
            self.events.clone(),
            self.cancel.clone(),
        );

        Ok(Arc::new(OvsOfctl::new(bridge_name, connected)))
    }

    fn ovsdb_bridge(
        &self,
        _vds_id: &str,
        _kind: BridgeKind,
        bridge_name: &str,
    ) -> Result<Arc<dyn OvsdbBridge>, DatapathError> {
        Ok(Arc::new(OvsdbDriver::new(bridge_name, &self.db_sock)))
    }
}
