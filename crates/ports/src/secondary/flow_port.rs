use domain::common::error::DatapathError;
use domain::flow::entity::FlowSpec;
use domain::rule::entity::FlowEntry;

/// Secondary port for one bridge's OpenFlow session.
///
/// The datapath manager and the bridge logic emit pure `FlowSpec`
/// values through this trait; the production adapter translates them
/// to the switch, the mock records them for inspection.
///
/// Every installed flow receives a cookie encoding the round last set
/// via `set_round`, so whole generations can be deleted by mask.
pub trait FlowProgrammer: Send + Sync {
    /// Whether the switch side of this bridge's session is up.
    fn is_connected(&self) -> bool;

    /// Set the restart round encoded into subsequently assigned
    /// cookies.
    fn set_round(&self, round: u64);

    /// Install a flow; the returned entry is the handle for deletion.
    fn install(&self, spec: &FlowSpec) -> Result<FlowEntry, DatapathError>;

    /// Delete one flow previously returned by `install`.
    fn uninstall(&self, entry: &FlowEntry) -> Result<(), DatapathError>;

    /// Delete every flow whose cookie carries the given round.
    fn delete_flows_with_round(&self, round: u64) -> Result<(), DatapathError>;

    /// Set the no-flood flag on a port of this bridge.
    fn set_port_no_flood(&self, port: u32) -> Result<(), DatapathError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_programmer_is_object_safe() {
        // If this compiles, the trait is object-safe.
        fn _check(port: &dyn FlowProgrammer) {
            let _ = port.is_connected();
        }
    }
}
