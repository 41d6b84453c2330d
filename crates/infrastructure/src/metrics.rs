use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use ports::secondary::metrics_port::MetricsPort;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BridgeLabels {
    pub bridge: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReplayLabels {
    pub vds: String,
    pub bridge: String,
}

/// Prometheus metrics registry for the agent.
///
/// Metric families use interior mutability, so recording only needs
/// `&self`; wrap in `Arc` for sharing across tasks.
pub struct AgentMetrics {
    registry: Registry,
    pub local_endpoints: Gauge,
    pub policy_rules: Gauge,
    pub learned_ips: Gauge,
    pub flows_installed_total: Family<BridgeLabels, Counter>,
    pub flow_replays_total: Family<ReplayLabels, Counter>,
    pub recovery_events_total: Counter,
}

impl AgentMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ovsentinel");

        let local_endpoints = Gauge::default();
        registry.register(
            "local_endpoints",
            "Endpoints currently held in the registry",
            local_endpoints.clone(),
        );

        let policy_rules = Gauge::default();
        registry.register(
            "policy_rules",
            "Policy rules currently installed",
            policy_rules.clone(),
        );

        let learned_ips = Gauge::default();
        registry.register(
            "learned_ips",
            "Addresses currently held in the IP learning cache",
            learned_ips.clone(),
        );

        let flows_installed_total = Family::<BridgeLabels, Counter>::default();
        registry.register(
            "flows_installed",
            "Flow mods sent per bridge",
            flows_installed_total.clone(),
        );

        let flow_replays_total = Family::<ReplayLabels, Counter>::default();
        registry.register(
            "flow_replays",
            "Replays performed per bridge",
            flow_replays_total.clone(),
        );

        let recovery_events_total = Counter::default();
        registry.register(
            "recovery_events",
            "Switch-database recovery events observed",
            recovery_events_total.clone(),
        );

        Self {
            registry,
            local_endpoints,
            policy_rules,
            learned_ips,
            flows_installed_total,
            flow_replays_total,
            recovery_events_total,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let _ = encode(&mut out, &self.registry);
        out
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPort for AgentMetrics {
    fn set_local_endpoints(&self, count: u64) {
        self.local_endpoints.set(count as i64);
    }

    fn set_policy_rules(&self, count: u64) {
        self.policy_rules.set(count as i64);
    }

    fn set_learned_ips(&self, count: u64) {
        self.learned_ips.set(count as i64);
    }

    fn inc_flows_installed(&self, bridge: &str) {
        self.flows_installed_total
            .get_or_create(&BridgeLabels {
                bridge: bridge.to_string(),
            })
            .inc();
    }

    fn inc_flow_replays(&self, vds: &str, bridge: &str) {
        self.flow_replays_total
            .get_or_create(&ReplayLabels {
                vds: vds.to_string(),
                bridge: bridge.to_string(),
            })
            .inc();
    }

    fn inc_recovery_events(&self) {
        self.recovery_events_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_through_the_port() {
        let metrics = AgentMetrics::new();
        let port: &dyn MetricsPort = &metrics;

        port.set_local_endpoints(3);
        port.set_policy_rules(2);
        port.inc_flows_installed("br0-policy");
        port.inc_flow_replays("v0", "policy");
        port.inc_recovery_events();

        assert_eq!(metrics.local_endpoints.get(), 3);
        assert_eq!(metrics.policy_rules.get(), 2);
        assert_eq!(metrics.recovery_events_total.get(), 1);
    }

    #[test]
    fn encodes_exposition_format() {
        let metrics = AgentMetrics::new();
        metrics.set_local_endpoints(1);
        let text = metrics.encode();
        assert!(text.contains("ovsentinel_local_endpoints 1"));
    }
}
