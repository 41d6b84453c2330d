//! The four bridge kinds of one virtual-switch chain and their flow
//! programming logic. Each bridge owns its OpenFlow session port and
//! its OVSDB driver port and knows how to program the static pipeline
//! for its position in the chain.

mod cls;
mod local;
mod policy;
mod uplink;

pub use cls::ClsBridge;
pub use local::LocalBridge;
pub use policy::PolicyBridge;
pub use uplink::UplinkBridge;

use std::sync::Arc;

pub use domain::common::entity::CniSettings;

use domain::common::error::DatapathError;
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;

/// The per-bridge port pair every bridge kind is built around.
pub struct BridgePorts {
    pub name: String,
    pub flows: Arc<dyn FlowProgrammer>,
    pub ovsdb: Arc<dyn OvsdbBridge>,
}

/// Borrowed view over any bridge kind, for chain-wide operations that
/// do not care which concrete bridge they touch.
#[derive(Clone, Copy)]
pub enum BridgeRef<'a> {
    Local(&'a LocalBridge),
    Policy(&'a PolicyBridge),
    Cls(&'a ClsBridge),
    Uplink(&'a UplinkBridge),
}

impl<'a> BridgeRef<'a> {
    pub fn name(self) -> &'a str {
        match self {
            Self::Local(b) => b.name(),
            Self::Policy(b) => b.name(),
            Self::Cls(b) => b.name(),
            Self::Uplink(b) => b.name(),
        }
    }

    pub fn flows(self) -> &'a Arc<dyn FlowProgrammer> {
        match self {
            Self::Local(b) => b.flows(),
            Self::Policy(b) => b.flows(),
            Self::Cls(b) => b.flows(),
            Self::Uplink(b) => b.flows(),
        }
    }

    pub fn ovsdb(self) -> &'a Arc<dyn OvsdbBridge> {
        match self {
            Self::Local(b) => b.ovsdb(),
            Self::Policy(b) => b.ovsdb(),
            Self::Cls(b) => b.ovsdb(),
            Self::Uplink(b) => b.ovsdb(),
        }
    }

    pub fn is_connected(self) -> bool {
        self.flows().is_connected()
    }

    /// Program the bridge's static pipeline.
    pub fn init(self, cni: Option<&CniSettings>) -> Result<(), DatapathError> {
        match self {
            Self::Local(b) => {
                b.init()?;
                if let Some(settings) = cni {
                    b.init_cni(settings)?;
                }
                Ok(())
            }
            Self::Policy(b) => b.init(),
            Self::Cls(b) => b.init(),
            Self::Uplink(b) => b.init(),
        }
    }
}
