use std::collections::HashMap;
use std::process::Command;

use domain::common::error::DatapathError;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tracing::debug;

/// `OvsdbBridge` over `ovs-vsctl`.
///
/// Every invocation opens a fresh connection to the database socket,
/// so `reconnect` reduces to probing that the database answers again.
pub struct OvsdbDriver {
    bridge: String,
    db_sock: String,
}

impl OvsdbDriver {
    pub fn new(bridge: &str, db_sock: &str) -> Self {
        Self {
            bridge: bridge.to_string(),
            db_sock: db_sock.to_string(),
        }
    }

    fn run(&self, args: &[String]) -> Result<String, DatapathError> {
        let output = Command::new("ovs-vsctl")
            .arg(format!("--db=unix:{}", self.db_sock))
            .arg("--timeout=5")
            .args(args)
            .output()
            .map_err(|err| {
                DatapathError::OvsdbUnavailable(format!("failed to spawn ovs-vsctl: {err}"))
            })?;

        if !output.status.success() {
            return Err(DatapathError::OvsdbUnavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OvsdbBridge for OvsdbDriver {
    fn external_ids(&self) -> Result<HashMap<String, String>, DatapathError> {
        let raw = self.run(&[
            "get".to_string(),
            "Bridge".to_string(),
            self.bridge.clone(),
            "external_ids".to_string(),
        ])?;
        Ok(parse_external_ids(&raw))
    }

    fn set_external_ids(&self, ids: HashMap<String, String>) -> Result<(), DatapathError> {
        let mut args = vec![
            "set".to_string(),
            "Bridge".to_string(),
            self.bridge.clone(),
        ];
        let mut entries: Vec<_> = ids.into_iter().collect();
        entries.sort();
        for (key, value) in entries {
            args.push(format!("external_ids:{key}=\"{value}\""));
        }
        self.run(&args)?;
        debug!(bridge = %self.bridge, "external-ids written");
        Ok(())
    }

    fn set_protocols(&self, protocols: &[String]) -> Result<(), DatapathError> {
        self.run(&[
            "set".to_string(),
            "Bridge".to_string(),
            self.bridge.clone(),
            format!("protocols={}", protocols.join(",")),
        ])?;
        Ok(())
    }

    fn reconnect(&self) -> Result<(), DatapathError> {
        self.run(&["list-br".to_string()]).map(|_| ())
    }
}

/// Parse ovs-vsctl map output: `{key="value", other="1"}`.
pub fn parse_external_ids(raw: &str) -> HashMap<String, String> {
    let trimmed = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let mut ids = HashMap::new();

    for pair in trimmed.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        ids.insert(
            key.trim().to_string(),
            value.trim().trim_matches('"').to_string(),
        );
    }
    ids
}
