use std::collections::HashMap;

use domain::common::error::DatapathError;

/// Secondary port for one bridge's switch-database driver.
///
/// Carries the bridge-level configuration the controller owns: the
/// external-ids map (restart-round persistence) and the OpenFlow
/// protocol versions. `reconnect` re-opens the underlying DB session
/// after the daemon socket was recreated.
pub trait OvsdbBridge: Send + Sync {
    fn external_ids(&self) -> Result<HashMap<String, String>, DatapathError>;

    fn set_external_ids(&self, ids: HashMap<String, String>) -> Result<(), DatapathError>;

    fn set_protocols(&self, protocols: &[String]) -> Result<(), DatapathError>;

    fn reconnect(&self) -> Result<(), DatapathError>;
}

/// OpenFlow protocol versions every managed bridge is configured with.
pub fn openflow_protocols() -> Vec<String> {
    ["OpenFlow10", "OpenFlow11", "OpenFlow12", "OpenFlow13"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ovsdb_bridge_is_object_safe() {
        fn _check(port: &dyn OvsdbBridge) {
            let _ = port.external_ids();
        }
    }

    #[test]
    fn protocol_list_spans_10_to_13() {
        let protos = openflow_protocols();
        assert_eq!(protos.first().map(String::as_str), Some("OpenFlow10"));
        assert_eq!(protos.last().map(String::as_str), Some("OpenFlow13"));
        assert_eq!(protos.len(), 4);
    }
}
