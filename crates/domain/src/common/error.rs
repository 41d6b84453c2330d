use thiserror::Error;

use crate::endpoint::error::EndpointError;
use crate::round::error::RoundError;
use crate::rule::error::RuleError;

/// Error taxonomy of the datapath controller.
///
/// Only user-facing errors propagate out of the public API; connection
/// races are retried internally and unrecoverable conditions (connect
/// timeout, round persistence failure) are returned so the agent can
/// exit. Flow state is reconstructible from the registries, so a
/// crash-restart is always a safe recovery mode.
#[derive(Debug, Error)]
pub enum DatapathError {
    #[error("bridge {bridge} is not connected")]
    BridgeNotConnected { bridge: String },

    #[error("bridge chain failed to connect within {timeout_secs}s")]
    BridgeConnectTimeout { timeout_secs: u64 },

    #[error("flow install on bridge {bridge} failed: {reason}")]
    InstallFailed { bridge: String, reason: String },

    #[error("ovsdb unavailable: {0}")]
    OvsdbUnavailable(String),

    #[error("endpoint not found: {interface}")]
    EndpointNotFound { interface: String },

    #[error("endpoint already registered: {interface}")]
    EndpointExists { interface: String },

    #[error("rule not found: {id}")]
    RuleNotFound { id: String },

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to persist restart round: {0}")]
    PersistRoundFailed(String),

    #[error("controller ID space exhausted after {attempts} attempts")]
    ControllerIdsExhausted { attempts: usize },

    #[error("round info: {0}")]
    Round(#[from] RoundError),
}

impl From<RuleError> for DatapathError {
    fn from(e: RuleError) -> Self {
        Self::InvalidRule(e.to_string())
    }
}

impl From<EndpointError> for DatapathError {
    fn from(e: EndpointError) -> Self {
        Self::InvalidEndpoint(e.to_string())
    }
}
