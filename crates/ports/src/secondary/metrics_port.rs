/// Secondary port for operational metrics.
///
/// All methods default to no-ops so callers record unconditionally and
/// test doubles implement nothing.
pub trait MetricsPort: Send + Sync {
    fn set_local_endpoints(&self, _count: u64) {}

    fn set_policy_rules(&self, _count: u64) {}

    fn set_learned_ips(&self, _count: u64) {}

    fn inc_flows_installed(&self, _bridge: &str) {}

    fn inc_flow_replays(&self, _vds: &str, _bridge: &str) {}

    fn inc_recovery_events(&self) {}
}
