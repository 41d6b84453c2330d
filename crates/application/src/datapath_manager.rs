use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::common::entity::{BridgeKind, DatapathConfig};
use domain::common::error::DatapathError;
use domain::endpoint::entity::Endpoint;
use domain::ipcache::entity::cache_key;
use domain::pipeline::tables::LOCAL_TO_POLICY_PORT;
use domain::round::entity::{RESTART_ROUND_KEY, RoundInfo};
use domain::rule::entity::{
    PolicyDirection, PolicyRule, PolicyRuleEntry, PolicyTier, internal_egress_rule,
    internal_ingress_rule,
};
use ports::events::{SwitchEvent, SwitchEventEnvelope};
use ports::primary::endpoint_events::EndpointEventHandler;
use ports::secondary::backend::SwitchBackend;
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::metrics_port::MetricsPort;
use ports::secondary::ovsdb_port::{OvsdbBridge, openflow_protocols};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::{
    BridgePorts, BridgeRef, ClsBridge, LocalBridge, PolicyBridge, UplinkBridge,
};
use crate::controller_id::ControllerIdAllocator;
use crate::ip_learning::IpLearningService;

/// Connection wait: one poll per second, fatal after 40 attempts.
const BRIDGE_CONNECT_RETRIES: u32 = 40;
const BRIDGE_CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settle window between programming the current round's static flows
/// and sweeping the previous round's leftovers.
const ROUND_SETTLE_DELAY: Duration = Duration::from_secs(15);

/// The four bridges of one managed virtual switch.
pub struct VdsChain {
    pub vds_id: String,
    /// Base bridge name (also the LOCAL bridge's name).
    pub bridge_name: String,
    pub local: LocalBridge,
    pub policy: PolicyBridge,
    pub cls: ClsBridge,
    pub uplink: UplinkBridge,
}

impl VdsChain {
    pub fn bridge(&self, kind: BridgeKind) -> BridgeRef<'_> {
        match kind {
            BridgeKind::Local => BridgeRef::Local(&self.local),
            BridgeKind::Policy => BridgeRef::Policy(&self.policy),
            BridgeKind::Cls => BridgeRef::Cls(&self.cls),
            BridgeKind::Uplink => BridgeRef::Uplink(&self.uplink),
        }
    }

    pub fn is_connected(&self) -> bool {
        BridgeKind::ALL
            .into_iter()
            .all(|kind| self.bridge(kind).is_connected())
    }
}

/// All flow-affecting state, guarded by the flow-replay lock.
#[derive(Default)]
struct DatapathState {
    /// Interface name → endpoint. Strict subset of what the switch
    /// database reports; the single source of truth for replay.
    endpoints: HashMap<String, Endpoint>,
    /// Rule id → rule entry with its per-VDS flow handles.
    rules: HashMap<String, PolicyRuleEntry>,
}

/// The per-node datapath coordinator.
///
/// Owns the bridge chains of every managed VDS and serialises every
/// mutation of flow state (endpoint events, rule events and replays)
/// behind one write lock, so no two writers ever target a switch
/// concurrently and a replay always sees a consistent registry.
pub struct DatapathManager {
    config: DatapathConfig,
    chains: BTreeMap<String, VdsChain>,
    state: RwLock<DatapathState>,
    controller_ids: ControllerIdAllocator,
    ip_learning: Arc<IpLearningService>,
    metrics: Arc<dyn MetricsPort>,
    cancel: CancellationToken,
    fatal_tx: mpsc::Sender<DatapathError>,
    fatal_rx: Mutex<Option<mpsc::Receiver<DatapathError>>>,
}

impl DatapathManager {
    /// Build the bridge chains for every managed VDS. Sessions connect
    /// in the background; nothing blocks on the switch here.
    pub fn new(
        config: DatapathConfig,
        backend: &dyn SwitchBackend,
        ip_learning: Arc<IpLearningService>,
        metrics: Arc<dyn MetricsPort>,
        cancel: CancellationToken,
    ) -> Result<Self, DatapathError> {
        let controller_ids = ControllerIdAllocator::new();
        let mut chains = BTreeMap::new();
        for (vds_id, base_name) in &config.managed_vds {
            chains.insert(
                vds_id.clone(),
                build_chain(backend, &controller_ids, vds_id, base_name)?,
            );
        }

        let (fatal_tx, fatal_rx) = mpsc::channel(4);
        Ok(Self {
            config,
            chains,
            state: RwLock::new(DatapathState::default()),
            controller_ids,
            ip_learning,
            metrics,
            cancel,
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        })
    }

    /// Controller ids currently allocated to bridge sessions.
    pub fn controller_id_count(&self) -> usize {
        self.controller_ids.allocated_count()
    }

    pub fn ip_learning(&self) -> &Arc<IpLearningService> {
        &self.ip_learning
    }

    // ── Connection state ────────────────────────────────────────────

    pub fn is_bridges_connected(&self) -> bool {
        self.chains.values().all(VdsChain::is_connected)
    }

    /// Poll until every bridge across every VDS reports connected.
    pub async fn wait_for_bridges_connected(&self) -> Result<(), DatapathError> {
        for _ in 0..BRIDGE_CONNECT_RETRIES {
            tokio::time::sleep(BRIDGE_CONNECT_POLL_INTERVAL).await;
            if self.is_bridges_connected() {
                return Ok(());
            }
        }
        Err(DatapathError::BridgeConnectTimeout {
            timeout_secs: u64::from(BRIDGE_CONNECT_RETRIES),
        })
    }

    // ── Initialisation ──────────────────────────────────────────────

    /// Program the static pipeline on every VDS and install the
    /// internal-IP whitelist. Blocks until all bridges are connected.
    pub async fn initialize(&self) -> Result<(), DatapathError> {
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        for (vds_id, chain) in &self.chains {
            self.initialize_vds(chain)?;
            info!(vds = %vds_id, bridge = %chain.bridge_name, "vds pipeline initialised");
        }

        for internal_ip in self.config.internal_ips.clone() {
            self.add_policy_rule(
                internal_ingress_rule(&internal_ip),
                PolicyDirection::Ingress,
                PolicyTier::Tier2,
            )
            .await?;
            self.add_policy_rule(
                internal_egress_rule(&internal_ip),
                PolicyDirection::Egress,
                PolicyTier::Tier2,
            )
            .await?;
        }

        Ok(())
    }

    fn initialize_vds(&self, chain: &VdsChain) -> Result<(), DatapathError> {
        let round = read_round_info(chain)?;

        // Residue from a predecessor that crashed mid-install carries
        // the same current round; sweep it before programming.
        for kind in BridgeKind::ALL {
            let flows = chain.bridge(kind).flows();
            flows.delete_flows_with_round(round.current)?;
            flows.set_round(round.current);
        }

        for kind in BridgeKind::ALL {
            chain.bridge(kind).init(self.config.cni.as_ref())?;
            self.metrics.inc_flows_installed(chain.bridge(kind).name());
        }

        chain
            .local
            .flows()
            .set_port_no_flood(LOCAL_TO_POLICY_PORT)?;

        self.spawn_settle_sweep(chain, round);
        Ok(())
    }

    /// After the settle window, drop the previous round's flows and
    /// persist the current round. Static installs are complete well
    /// within the window, so stable flows are rebuilt before stale
    /// ones disappear.
    fn spawn_settle_sweep(&self, chain: &VdsChain, round: RoundInfo) {
        let vds_id = chain.vds_id.clone();
        let flow_ports: Vec<Arc<dyn FlowProgrammer>> = BridgeKind::ALL
            .into_iter()
            .map(|kind| Arc::clone(chain.bridge(kind).flows()))
            .collect();
        let local_ovsdb: Arc<dyn OvsdbBridge> = Arc::clone(chain.local.ovsdb());
        let fatal_tx = self.fatal_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(ROUND_SETTLE_DELAY) => {}
            }

            let result = (|| -> Result<(), DatapathError> {
                for flows in &flow_ports {
                    flows.delete_flows_with_round(round.previous)?;
                }
                let mut ids = local_ovsdb
                    .external_ids()
                    .map_err(|err| DatapathError::PersistRoundFailed(err.to_string()))?;
                ids.insert(RESTART_ROUND_KEY.to_string(), round.persisted_value());
                local_ovsdb
                    .set_external_ids(ids)
                    .map_err(|err| DatapathError::PersistRoundFailed(err.to_string()))
            })();

            if let Err(err) = result {
                error!(vds = %vds_id, error = %err, "round settle sweep failed");
                let _ = fatal_tx.send(err).await;
            }
        });
    }

    // ── Endpoint operations ─────────────────────────────────────────

    /// Register an endpoint and install its LOCAL-bridge flows. A
    /// duplicate interface name is logged and succeeds; the registry
    /// is updated before the bridge is touched so a replay rebuilds
    /// the intended state even if the install fails.
    pub async fn add_local_endpoint(&self, endpoint: Endpoint) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        endpoint.validate()?;
        let Some(chain) = self.chain_for_bridge(&endpoint.bridge_name) else {
            warn!(bridge = %endpoint.bridge_name, "endpoint references an unmanaged bridge");
            return Ok(());
        };

        if state.endpoints.contains_key(&endpoint.interface_name) {
            warn!(interface = %endpoint.interface_name, "endpoint already registered");
            return Ok(());
        }

        state
            .endpoints
            .insert(endpoint.interface_name.clone(), endpoint.clone());
        chain.local.add_endpoint(&endpoint)?;

        self.metrics.set_local_endpoints(state.endpoints.len() as u64);
        info!(interface = %endpoint.interface_name, mac = %endpoint.mac_addr, "local endpoint added");
        Ok(())
    }

    /// Replace an endpoint's attributes: the learned IP of the old
    /// record is carried over, then the old flows are removed and the
    /// new ones installed.
    pub async fn update_local_endpoint(
        &self,
        mut new_endpoint: Endpoint,
        old_endpoint: Endpoint,
    ) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        new_endpoint.validate()?;
        let Some(chain) = self.chain_for_bridge(&new_endpoint.bridge_name) else {
            warn!(bridge = %new_endpoint.bridge_name, "endpoint references an unmanaged bridge");
            return Ok(());
        };

        let cached = state
            .endpoints
            .get(&old_endpoint.interface_name)
            .ok_or_else(|| DatapathError::EndpointNotFound {
                interface: old_endpoint.interface_name.clone(),
            })?;

        // Skips re-learning for an endpoint that merely changed port
        // or VLAN.
        new_endpoint.ip_addr = cached.ip_addr;

        state.endpoints.remove(&old_endpoint.interface_name);
        chain.local.remove_endpoint(&old_endpoint)?;

        if state.endpoints.contains_key(&new_endpoint.interface_name) {
            return Err(DatapathError::EndpointExists {
                interface: new_endpoint.interface_name.clone(),
            });
        }
        state
            .endpoints
            .insert(new_endpoint.interface_name.clone(), new_endpoint.clone());
        chain.local.add_endpoint(&new_endpoint)?;

        self.metrics.set_local_endpoints(state.endpoints.len() as u64);
        info!(interface = %new_endpoint.interface_name, "local endpoint updated");
        Ok(())
    }

    /// Remove an endpoint from the registry and its flows from the
    /// LOCAL bridge.
    pub async fn remove_local_endpoint(&self, endpoint: Endpoint) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        let cached = state
            .endpoints
            .get(&endpoint.interface_name)
            .cloned()
            .ok_or_else(|| DatapathError::EndpointNotFound {
                interface: endpoint.interface_name.clone(),
            })?;

        let Some(chain) = self.chain_for_bridge(&cached.bridge_name) else {
            warn!(bridge = %cached.bridge_name, "endpoint references an unmanaged bridge");
            return Ok(());
        };

        state.endpoints.remove(&endpoint.interface_name);
        chain.local.remove_endpoint(&endpoint)?;

        self.metrics.set_local_endpoints(state.endpoints.len() as u64);
        info!(interface = %endpoint.interface_name, "local endpoint removed");
        Ok(())
    }

    // ── Rule operations ─────────────────────────────────────────────

    /// Install a rule on the POLICY bridge of every VDS.
    ///
    /// A deep-equal re-add is a no-op; a changed body atomically
    /// replaces the old flows. A failure on one VDS returns the error;
    /// the partial install is tolerated and rebuilt by replay.
    pub async fn add_policy_rule(
        &self,
        rule: PolicyRule,
        direction: PolicyDirection,
        tier: PolicyTier,
    ) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        if let Some(existing) = state.rules.get(&rule.rule_id) {
            if existing.rule == rule {
                info!(rule_id = %rule.rule_id, "rule already exists, skipping");
                return Ok(());
            }
            // Changed body: the old flows go before the new ones land.
            for (vds_id, chain) in &self.chains {
                if let Some(flow) = existing.rule_flow_map.get(vds_id) {
                    chain.policy.remove_rule_flow(flow)?;
                }
            }
        }

        info!(rule_id = %rule.rule_id, action = rule.action.as_str(), "installing policy rule");

        let mut rule_flow_map = HashMap::new();
        for (vds_id, chain) in &self.chains {
            let flow_entry = chain
                .policy
                .add_rule(&rule, direction, tier)
                .map_err(|err| {
                    error!(rule_id = %rule.rule_id, vds = %vds_id, error = %err, "rule install failed");
                    err
                })?;
            rule_flow_map.insert(vds_id.clone(), flow_entry);
            self.metrics.inc_flows_installed(chain.policy.name());
        }

        state.rules.insert(
            rule.rule_id.clone(),
            PolicyRuleEntry {
                rule,
                direction,
                tier,
                rule_flow_map,
            },
        );
        self.metrics.set_policy_rules(state.rules.len() as u64);
        Ok(())
    }

    /// Wire-value variant of `add_policy_rule` for callers holding the
    /// numeric direction (0 = egress, 1 = ingress) and tier (50, 100,
    /// 150). Unknown values are rejected before any flow is touched.
    pub async fn add_policy_rule_by_value(
        &self,
        rule: PolicyRule,
        direction: u8,
        tier: u8,
    ) -> Result<(), DatapathError> {
        let direction = PolicyDirection::try_from(direction)?;
        let tier = PolicyTier::try_from(tier)?;
        self.add_policy_rule(rule, direction, tier).await
    }

    /// Delete a rule's flows from every VDS and drop it from the
    /// registry.
    pub async fn remove_policy_rule(&self, rule: &PolicyRule) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        let entry = state
            .rules
            .get(&rule.rule_id)
            .ok_or_else(|| DatapathError::RuleNotFound {
                id: rule.rule_id.clone(),
            })?;

        for (vds_id, chain) in &self.chains {
            if let Some(flow) = entry.rule_flow_map.get(vds_id) {
                chain.policy.remove_rule_flow(flow)?;
            }
        }

        state.rules.remove(&rule.rule_id);
        self.metrics.set_policy_rules(state.rules.len() as u64);
        info!(rule_id = %rule.rule_id, "policy rule removed");
        Ok(())
    }

    // ── Replay & recovery ───────────────────────────────────────────

    /// Rebuild one bridge after its OpenFlow session reconnected:
    /// re-read the round, re-run the bridge init, then re-install the
    /// registry state that lives on that bridge.
    pub async fn replay_vds_flows(
        &self,
        vds_id: &str,
        kind: BridgeKind,
    ) -> Result<(), DatapathError> {
        let mut state = self.state.write().await;
        if !self.is_bridges_connected() {
            self.wait_for_bridges_connected().await?;
        }

        let Some(chain) = self.chains.get(vds_id) else {
            warn!(vds = %vds_id, "replay requested for unmanaged vds");
            return Ok(());
        };

        let round = read_round_info(chain)?;
        let bridge = chain.bridge(kind);
        bridge.flows().set_round(round.current);
        bridge.init(self.config.cni.as_ref())?;

        match kind {
            BridgeKind::Local => {
                for endpoint in state.endpoints.values() {
                    if endpoint.bridge_name == chain.bridge_name {
                        chain.local.add_endpoint(endpoint)?;
                    }
                }
            }
            BridgeKind::Policy => {
                for entry in state.rules.values_mut() {
                    let flow_entry =
                        chain
                            .policy
                            .add_rule(&entry.rule, entry.direction, entry.tier)?;
                    entry.rule_flow_map.insert(vds_id.to_string(), flow_entry);
                }
            }
            BridgeKind::Cls | BridgeKind::Uplink => {}
        }

        self.metrics.inc_flow_replays(vds_id, kind.as_str());
        info!(vds = %vds_id, bridge = %kind, "flow replay complete");
        Ok(())
    }

    /// Re-open every OVSDB driver connection after the daemon socket
    /// was recreated.
    async fn ovsdb_connection_reset(&self) -> Result<(), DatapathError> {
        for (vds_id, chain) in &self.chains {
            for kind in BridgeKind::ALL {
                chain.bridge(kind).ovsdb().reconnect().map_err(|err| {
                    DatapathError::OvsdbUnavailable(format!(
                        "reconnect of vds {vds_id} {kind} bridge failed: {err}"
                    ))
                })?;
            }
        }
        Ok(())
    }

    // ── Event loop ──────────────────────────────────────────────────

    /// Drive switch and recovery events until cancelled. Returns an
    /// error only for unrecoverable conditions; the caller exits the
    /// process, relying on crash-restart to rebuild flow state.
    pub async fn run(
        self: Arc<Self>,
        mut switch_events: mpsc::Receiver<SwitchEventEnvelope>,
        mut recovery_events: mpsc::Receiver<()>,
    ) -> Result<(), DatapathError> {
        let fatal_rx = self
            .fatal_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(mut fatal_rx) = fatal_rx else {
            warn!("datapath manager event loop already running");
            return Ok(());
        };

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("datapath manager shutting down");
                    return Ok(());
                }
                Some(err) = fatal_rx.recv() => return Err(err),
                Some(()) = recovery_events.recv() => {
                    info!("ovsdb recovery event received, resetting driver connections");
                    self.metrics.inc_recovery_events();
                    self.ovsdb_connection_reset().await?;
                }
                Some(envelope) = switch_events.recv() => {
                    self.handle_switch_event(envelope).await?;
                }
                else => return Ok(()),
            }
        }
    }

    async fn handle_switch_event(
        &self,
        envelope: SwitchEventEnvelope,
    ) -> Result<(), DatapathError> {
        match envelope.event {
            SwitchEvent::Connected => {
                info!(vds = %envelope.vds_id, bridge = %envelope.bridge, "bridge connected");
                Ok(())
            }
            SwitchEvent::Disconnected => {
                info!(vds = %envelope.vds_id, bridge = %envelope.bridge, "bridge reconnect event, replaying flows");
                self.replay_vds_flows(&envelope.vds_id, envelope.bridge)
                    .await
            }
            SwitchEvent::PacketIn { in_port, ip } => {
                self.handle_packet_in(&envelope.vds_id, envelope.bridge, in_port, ip)
                    .await;
                Ok(())
            }
        }
    }

    /// IP learning: feed the cache and write the learned address back
    /// into the endpoint registry.
    async fn handle_packet_in(&self, vds_id: &str, kind: BridgeKind, in_port: u32, ip: IpAddr) {
        if kind != BridgeKind::Local {
            return;
        }
        let Some(chain) = self.chains.get(vds_id) else {
            return;
        };

        let key = cache_key(&chain.bridge_name, in_port);
        if !self.ip_learning.learn(key, ip).await {
            return;
        }

        if let IpAddr::V4(learned) = ip {
            let mut state = self.state.write().await;
            let endpoint = state
                .endpoints
                .values_mut()
                .find(|ep| ep.bridge_name == chain.bridge_name && ep.port_no == in_port);
            if let Some(endpoint) = endpoint {
                if endpoint.ip_addr != Some(learned) {
                    endpoint.ip_addr = Some(learned);
                    info!(interface = %endpoint.interface_name, ip = %learned, "endpoint address learned");
                }
            }
        }
    }

    // ── Introspection ───────────────────────────────────────────────

    fn chain_for_bridge(&self, bridge_name: &str) -> Option<&VdsChain> {
        self.chains
            .values()
            .find(|chain| chain.bridge_name == bridge_name)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.state.read().await.endpoints.len()
    }

    pub async fn rule_count(&self) -> usize {
        self.state.read().await.rules.len()
    }

    pub async fn endpoint(&self, interface_name: &str) -> Option<Endpoint> {
        self.state
            .read()
            .await
            .endpoints
            .get(interface_name)
            .cloned()
    }

    pub async fn rule_entry(&self, rule_id: &str) -> Option<PolicyRuleEntry> {
        self.state.read().await.rules.get(rule_id).cloned()
    }
}

impl EndpointEventHandler for DatapathManager {
    fn local_endpoint_add<'a>(
        &'a self,
        endpoint: Endpoint,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DatapathError>> + Send + 'a>>
    {
        Box::pin(self.add_local_endpoint(endpoint))
    }

    fn local_endpoint_update<'a>(
        &'a self,
        new_endpoint: Endpoint,
        old_endpoint: Endpoint,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DatapathError>> + Send + 'a>>
    {
        Box::pin(self.update_local_endpoint(new_endpoint, old_endpoint))
    }

    fn local_endpoint_delete<'a>(
        &'a self,
        endpoint: Endpoint,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DatapathError>> + Send + 'a>>
    {
        Box::pin(self.remove_local_endpoint(endpoint))
    }
}

fn build_chain(
    backend: &dyn SwitchBackend,
    controller_ids: &ControllerIdAllocator,
    vds_id: &str,
    base_name: &str,
) -> Result<VdsChain, DatapathError> {
    let make_ports = |kind: BridgeKind| -> Result<BridgePorts, DatapathError> {
        let name = kind.bridge_name(base_name);
        let controller_id = controller_ids.allocate()?;
        let flows = backend.flow_programmer(vds_id, kind, &name, controller_id)?;
        let ovsdb = backend.ovsdb_bridge(vds_id, kind, &name)?;
        ovsdb.set_protocols(&openflow_protocols())?;
        Ok(BridgePorts { name, flows, ovsdb })
    };

    Ok(VdsChain {
        vds_id: vds_id.to_string(),
        bridge_name: base_name.to_string(),
        local: LocalBridge::new(make_ports(BridgeKind::Local)?),
        policy: PolicyBridge::new(make_ports(BridgeKind::Policy)?),
        cls: ClsBridge::new(make_ports(BridgeKind::Cls)?),
        uplink: UplinkBridge::new(make_ports(BridgeKind::Uplink)?),
    })
}

fn read_round_info(chain: &VdsChain) -> Result<RoundInfo, DatapathError> {
    let ids = chain.local.ovsdb().external_ids()?;
    Ok(RoundInfo::from_persisted(
        ids.get(RESTART_ROUND_KEY).map(String::as_str),
    )?)
}
