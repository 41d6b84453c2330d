use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use domain::common::entity::BridgeKind;
use domain::common::error::DatapathError;
use domain::flow::cookie;
use domain::flow::entity::{FlowSpec, TableId};
use domain::rule::entity::FlowEntry;

use crate::secondary::backend::SwitchBackend;
use crate::secondary::flow_port::FlowProgrammer;
use crate::secondary::metrics_port::MetricsPort;
use crate::secondary::ovsdb_port::OvsdbBridge;

/// No-op implementation of `MetricsPort` for tests.
pub struct NoopMetrics;

impl MetricsPort for NoopMetrics {}

/// In-memory switch double for `FlowProgrammer`.
///
/// Flows are stored keyed by their cookie, exactly as a real switch
/// would hold them, so round sweeps and handle-based deletion behave
/// like the production adapter.
pub struct MockSwitch {
    name: String,
    connected: AtomicBool,
    round: AtomicU64,
    seq: AtomicU64,
    fail_installs: AtomicBool,
    flows: Mutex<HashMap<u64, FlowSpec>>,
    no_flood_ports: Mutex<Vec<u32>>,
}

impl MockSwitch {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            round: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            fail_installs: AtomicBool::new(false),
            flows: Mutex::new(HashMap::new()),
            no_flood_ports: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make subsequent installs fail, to exercise partial-install
    /// recovery paths.
    pub fn set_fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    pub fn flow_count(&self) -> usize {
        self.flows.lock().unwrap().len()
    }

    /// All installed flows as `(cookie, spec)` pairs.
    pub fn flows(&self) -> Vec<(u64, FlowSpec)> {
        self.flows
            .lock()
            .unwrap()
            .iter()
            .map(|(cookie, spec)| (*cookie, spec.clone()))
            .collect()
    }

    pub fn flows_in_table(&self, table: TableId) -> Vec<FlowSpec> {
        self.flows
            .lock()
            .unwrap()
            .values()
            .filter(|spec| spec.table == table)
            .cloned()
            .collect()
    }

    /// Distinct table ids populated on this switch, ascending.
    pub fn populated_tables(&self) -> Vec<TableId> {
        let mut tables: Vec<TableId> = self
            .flows
            .lock()
            .unwrap()
            .values()
            .map(|spec| spec.table)
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// Distinct rounds present across installed flow cookies.
    pub fn rounds_present(&self) -> Vec<u64> {
        let mut rounds: Vec<u64> = self
            .flows
            .lock()
            .unwrap()
            .keys()
            .map(|c| cookie::round_of(*c))
            .collect();
        rounds.sort_unstable();
        rounds.dedup();
        rounds
    }

    pub fn no_flood_ports(&self) -> Vec<u32> {
        self.no_flood_ports.lock().unwrap().clone()
    }

    /// Drop every installed flow, as a restarted switch daemon would.
    pub fn clear_flows(&self) {
        self.flows.lock().unwrap().clear();
    }
}

impl FlowProgrammer for MockSwitch {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_round(&self, round: u64) {
        self.round.store(round, Ordering::SeqCst);
    }

    fn install(&self, spec: &FlowSpec) -> Result<FlowEntry, DatapathError> {
        if !self.is_connected() {
            return Err(DatapathError::BridgeNotConnected {
                bridge: self.name.clone(),
            });
        }
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(DatapathError::InstallFailed {
                bridge: self.name.clone(),
                reason: "mock install failure".to_string(),
            });
        }

        let round = self.round.load(Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let flow_id = cookie::encode(round, seq);

        self.flows.lock().unwrap().insert(flow_id, spec.clone());
        Ok(FlowEntry {
            table: spec.table,
            priority: spec.priority,
            flow_id,
        })
    }

    fn uninstall(&self, entry: &FlowEntry) -> Result<(), DatapathError> {
        self.flows.lock().unwrap().remove(&entry.flow_id);
        Ok(())
    }

    fn delete_flows_with_round(&self, round: u64) -> Result<(), DatapathError> {
        let (value, mask) = cookie::round_match(round);
        self.flows
            .lock()
            .unwrap()
            .retain(|flow_cookie, _| flow_cookie & mask != value);
        Ok(())
    }

    fn set_port_no_flood(&self, port: u32) -> Result<(), DatapathError> {
        let mut ports = self.no_flood_ports.lock().unwrap();
        if !ports.contains(&port) {
            ports.push(port);
        }
        Ok(())
    }
}

/// In-memory OVSDB double.
pub struct MockOvsdb {
    external_ids: Mutex<HashMap<String, String>>,
    protocols: Mutex<Vec<String>>,
    reconnect_count: AtomicU64,
    fail_reconnect: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockOvsdb {
    pub fn new() -> Self {
        Self {
            external_ids: Mutex::new(HashMap::new()),
            protocols: Mutex::new(Vec::new()),
            reconnect_count: AtomicU64::new(0),
            fail_reconnect: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_external_id(key: &str, value: &str) -> Self {
        let mock = Self::new();
        mock.external_ids
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        mock
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    pub fn set_fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn protocols(&self) -> Vec<String> {
        self.protocols.lock().unwrap().clone()
    }
}

impl Default for MockOvsdb {
    fn default() -> Self {
        Self::new()
    }
}

impl OvsdbBridge for MockOvsdb {
    fn external_ids(&self) -> Result<HashMap<String, String>, DatapathError> {
        Ok(self.external_ids.lock().unwrap().clone())
    }

    fn set_external_ids(&self, ids: HashMap<String, String>) -> Result<(), DatapathError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatapathError::OvsdbUnavailable(
                "mock write failure".to_string(),
            ));
        }
        *self.external_ids.lock().unwrap() = ids;
        Ok(())
    }

    fn set_protocols(&self, protocols: &[String]) -> Result<(), DatapathError> {
        *self.protocols.lock().unwrap() = protocols.to_vec();
        Ok(())
    }

    fn reconnect(&self) -> Result<(), DatapathError> {
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(DatapathError::OvsdbUnavailable(
                "mock reconnect failure".to_string(),
            ));
        }
        self.reconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend double handing out cached `MockSwitch`/`MockOvsdb` pairs.
///
/// The same instance is returned for repeated requests for one
/// `(vds, kind)`, so tests can grab a handle before or after the
/// manager builds its chains and observe the same state.
#[derive(Default)]
pub struct MockBackend {
    switches: Mutex<HashMap<(String, BridgeKind), Arc<MockSwitch>>>,
    ovsdbs: Mutex<HashMap<(String, BridgeKind), Arc<MockOvsdb>>>,
    controller_ids: Mutex<Vec<u16>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller ids handed to `flow_programmer`, in request order.
    pub fn controller_ids(&self) -> Vec<u16> {
        self.controller_ids.lock().unwrap().clone()
    }

    pub fn switch(&self, vds_id: &str, kind: BridgeKind) -> Arc<MockSwitch> {
        self.switches
            .lock()
            .unwrap()
            .entry((vds_id.to_string(), kind))
            .or_insert_with(|| Arc::new(MockSwitch::new(&format!("{vds_id}-{kind}"))))
            .clone()
    }

    pub fn ovsdb(&self, vds_id: &str, kind: BridgeKind) -> Arc<MockOvsdb> {
        self.ovsdbs
            .lock()
            .unwrap()
            .entry((vds_id.to_string(), kind))
            .or_insert_with(|| Arc::new(MockOvsdb::new()))
            .clone()
    }
}

impl SwitchBackend for MockBackend {
    fn flow_programmer(
        &self,
        vds_id: &str,
        kind: BridgeKind,
        _bridge_name: &str,
        controller_id: u16,
    ) -> Result<Arc<dyn FlowProgrammer>, DatapathError> {
        self.controller_ids.lock().unwrap().push(controller_id);
        Ok(self.switch(vds_id, kind))
    }

    fn ovsdb_bridge(
        &self,
        vds_id: &str,
        kind: BridgeKind,
        _bridge_name: &str,
    ) -> Result<Arc<dyn OvsdbBridge>, DatapathError> {
        Ok(self.ovsdb(vds_id, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::flow::entity::{FlowAction, FlowMatch};

    fn spec(table: u8, priority: u16) -> FlowSpec {
        FlowSpec::new(
            TableId(table),
            priority,
            FlowMatch::default(),
            vec![FlowAction::Drop],
        )
    }

    #[test]
    fn install_assigns_round_tagged_cookies() {
        let sw = MockSwitch::new("br0");
        sw.set_round(3);
        let entry = sw.install(&spec(0, 10)).unwrap();
        assert_eq!(cookie::round_of(entry.flow_id), 3);
        assert_eq!(sw.rounds_present(), vec![3]);
    }

    #[test]
    fn round_sweep_removes_only_that_round() {
        let sw = MockSwitch::new("br0");
        sw.set_round(1);
        sw.install(&spec(0, 10)).unwrap();
        sw.set_round(2);
        sw.install(&spec(0, 10)).unwrap();

        sw.delete_flows_with_round(1).unwrap();
        assert_eq!(sw.rounds_present(), vec![2]);
    }

    #[test]
    fn uninstall_by_handle() {
        let sw = MockSwitch::new("br0");
        sw.set_round(1);
        let entry = sw.install(&spec(5, 100)).unwrap();
        assert_eq!(sw.flow_count(), 1);
        sw.uninstall(&entry).unwrap();
        assert_eq!(sw.flow_count(), 0);
    }

    #[test]
    fn disconnected_switch_refuses_installs() {
        let sw = MockSwitch::new("br0");
        sw.set_connected(false);
        assert!(matches!(
            sw.install(&spec(0, 10)),
            Err(DatapathError::BridgeNotConnected { .. })
        ));
    }

    #[test]
    fn ovsdb_round_trips_external_ids() {
        let db = MockOvsdb::new();
        let mut ids = HashMap::new();
        ids.insert("datapathRestartRound".to_string(), "4".to_string());
        db.set_external_ids(ids).unwrap();
        assert_eq!(
            db.external_ids().unwrap().get("datapathRestartRound"),
            Some(&"4".to_string())
        );
    }
}
