use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule ID must not be empty")]
    EmptyRuleId,

    #[error("invalid priority: {priority} (must be 1-100)")]
    InvalidPriority { priority: u16 },

    #[error("failed to parse IP address: {addr}")]
    InvalidIpAddr { addr: String },

    #[error("unknown policy tier")]
    UnknownTier,

    #[error("unknown policy direction: {value}")]
    UnknownDirection { value: u8 },
}
