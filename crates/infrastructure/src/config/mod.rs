//! Agent configuration: structs, parsing, and validation.

mod common;

pub use common::{ConfigError, LogFormat, LogLevel};

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use domain::common::entity::{CniSettings, DatapathConfig};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_OVS_RUN_DIR, DEFAULT_OVSDB_SOCKET};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub agent: AgentSection,

    pub datapath: DatapathSection,

    #[serde(default)]
    pub cni: CniSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    /// Node name reported to the management plane.
    #[serde(default)]
    pub node_name: String,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatapathSection {
    /// VDS id → base bridge name.
    pub managed_vds: BTreeMap<String, String>,

    /// Host-local addresses whose traffic always passes (whitelisted
    /// at tier 2 in both directions).
    #[serde(default)]
    pub internal_ips: Vec<String>,

    /// Directory holding the per-bridge management sockets.
    #[serde(default = "default_ovs_run_dir")]
    pub ovs_run_dir: String,

    /// The switch daemon's database socket.
    #[serde(default = "default_ovsdb_socket")]
    pub ovsdb_socket: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CniSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub local_gateway_ip: Option<Ipv4Addr>,

    #[serde(default)]
    pub local_gateway_mac: Option<String>,
}

fn default_ovs_run_dir() -> String {
    DEFAULT_OVS_RUN_DIR.to_string()
}

fn default_ovsdb_socket() -> String {
    DEFAULT_OVSDB_SOCKET.to_string()
}

impl AgentConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            source: err,
        })?;
        let config: Self = serde_yaml_ng::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datapath.managed_vds.is_empty() {
            return Err(ConfigError::Invalid(
                "datapath.managed_vds must name at least one VDS".to_string(),
            ));
        }

        let mut seen_bridges = std::collections::HashSet::new();
        for (vds_id, bridge) in &self.datapath.managed_vds {
            if vds_id.is_empty() || bridge.is_empty() {
                return Err(ConfigError::Invalid(
                    "VDS ids and bridge names must not be empty".to_string(),
                ));
            }
            if !seen_bridges.insert(bridge) {
                return Err(ConfigError::Invalid(format!(
                    "bridge {bridge} is assigned to more than one VDS"
                )));
            }
        }

        for ip in &self.datapath.internal_ips {
            if ip.parse::<Ipv4Addr>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "internal IP {ip} is not a valid IPv4 address"
                )));
            }
        }

        if self.cni.enabled {
            if self.cni.local_gateway_ip.is_none() {
                return Err(ConfigError::Invalid(
                    "cni.local_gateway_ip is required when CNI is enabled".to_string(),
                ));
            }
            if self.cni.local_gateway_mac.is_none() {
                return Err(ConfigError::Invalid(
                    "cni.local_gateway_mac is required when CNI is enabled".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Convert to the datapath manager's configuration.
    pub fn datapath_config(&self) -> DatapathConfig {
        let cni = if self.cni.enabled {
            match (self.cni.local_gateway_ip, self.cni.local_gateway_mac.clone()) {
                (Some(local_gateway_ip), Some(local_gateway_mac)) => Some(CniSettings {
                    local_gateway_ip,
                    local_gateway_mac,
                }),
                _ => None,
            }
        } else {
            None
        };

        DatapathConfig {
            managed_vds: self.datapath.managed_vds.clone(),
            internal_ips: self.datapath.internal_ips.clone(),
            cni,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = "\
agent:
  node_name: node-1
datapath:
  managed_vds:
    v0: br0
  internal_ips:
    - 10.0.0.1
";

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config() {
        let file = write_config(MINIMAL);
        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.datapath.managed_vds["v0"], "br0");
        assert_eq!(config.datapath.ovs_run_dir, DEFAULT_OVS_RUN_DIR);
        assert_eq!(config.datapath.ovsdb_socket, DEFAULT_OVSDB_SOCKET);
        assert!(!config.cni.enabled);

        let dp = config.datapath_config();
        assert_eq!(dp.internal_ips, vec!["10.0.0.1"]);
        assert!(dp.cni.is_none());
    }

    #[test]
    fn rejects_unknown_fields() {
        let file = write_config("agent: {}\ndatapath:\n  managed_vds: {v0: br0}\nbogus: 1\n");
        assert!(AgentConfig::load(file.path()).is_err());
    }

    #[test]
    fn rejects_empty_vds_map() {
        let file = write_config("agent: {}\ndatapath:\n  managed_vds: {}\n");
        assert!(matches!(
            AgentConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_duplicate_bridge_assignment() {
        let file =
            write_config("agent: {}\ndatapath:\n  managed_vds:\n    v0: br0\n    v1: br0\n");
        assert!(AgentConfig::load(file.path()).is_err());
    }

    #[test]
    fn rejects_bad_internal_ip() {
        let file = write_config(
            "agent: {}\ndatapath:\n  managed_vds: {v0: br0}\n  internal_ips: [not-an-ip]\n",
        );
        assert!(AgentConfig::load(file.path()).is_err());
    }

    #[test]
    fn cni_requires_gateway_settings() {
        let file = write_config(
            "agent: {}\ndatapath:\n  managed_vds: {v0: br0}\ncni:\n  enabled: true\n",
        );
        assert!(AgentConfig::load(file.path()).is_err());

        let file = write_config(
            "agent: {}\ndatapath:\n  managed_vds: {v0: br0}\ncni:\n  enabled: true\n  local_gateway_ip: 10.244.0.1\n  local_gateway_mac: \"02:00:00:00:00:01\"\n",
        );
        let config = AgentConfig::load(file.path()).unwrap();
        let dp = config.datapath_config();
        assert_eq!(
            dp.cni.unwrap().local_gateway_ip,
            Ipv4Addr::new(10, 244, 0, 1)
        );
    }
}
