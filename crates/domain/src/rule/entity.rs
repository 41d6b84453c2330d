use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::RuleError;
use crate::flow::entity::TableId;

/// Highest rule priority; also the priority of the internal-IP
/// whitelist entries installed at tier 2 during initialisation.
pub const MAX_RULE_PRIORITY: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// Traffic direction a rule applies to, seen from the local endpoints:
/// egress leaves them, ingress arrives at them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PolicyDirection {
    Egress = 0,
    Ingress = 1,
}

impl TryFrom<u8> for PolicyDirection {
    type Error = RuleError;

    fn try_from(value: u8) -> Result<Self, RuleError> {
        match value {
            0 => Ok(Self::Egress),
            1 => Ok(Self::Ingress),
            _ => Err(RuleError::UnknownDirection { value }),
        }
    }
}

/// Policy priority band, evaluated tier 0 → 1 → 2 within a direction.
///
/// Tier 0 is reserved for endpoint isolation, tier 1 carries general
/// policy, tier 2 is the whitelist band. Wire values match the rule
/// API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PolicyTier {
    Tier0 = 50,
    Tier1 = 100,
    Tier2 = 150,
}

impl TryFrom<u8> for PolicyTier {
    type Error = RuleError;

    fn try_from(value: u8) -> Result<Self, RuleError> {
        match value {
            50 => Ok(Self::Tier0),
            100 => Ok(Self::Tier1),
            150 => Ok(Self::Tier2),
            _ => Err(RuleError::UnknownTier),
        }
    }
}

/// A micro-segmentation rule intent.
///
/// Deep-value equality (`PartialEq`) decides whether a re-add with the
/// same ID is a no-op or an atomic replace. Port masks of zero together
/// with a zero port mean "any port".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Unique identifier for the rule.
    pub rule_id: String,
    /// Priority within the tier table, 1-100 (100 is highest).
    pub priority: u16,
    /// Source IP address, optionally with a CIDR mask.
    pub src_ip_addr: Option<String>,
    /// Destination IP address, optionally with a CIDR mask.
    pub dst_ip_addr: Option<String>,
    /// IP protocol number (0 = any).
    pub ip_protocol: u8,
    pub src_port: u16,
    pub src_port_mask: u16,
    pub dst_port: u16,
    pub dst_port_mask: u16,
    pub action: RuleAction,
}

impl PolicyRule {
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.rule_id.is_empty() {
            return Err(RuleError::EmptyRuleId);
        }
        if self.priority == 0 || self.priority > MAX_RULE_PRIORITY {
            return Err(RuleError::InvalidPriority {
                priority: self.priority,
            });
        }
        Ok(())
    }
}

/// Handle to one installed flow: enough to delete it again without
/// re-deriving the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub table: TableId,
    pub priority: u16,
    pub flow_id: u64,
}

/// Bookkeeping record kept per live rule: the rule value plus the flow
/// realising it on each virtual switch.
///
/// Invariant: for each live rule exactly one flow per VDS exists and is
/// recorded here; replay restores this before new mutations are
/// accepted. The per-VDS map is owned (not shared) so that replay can
/// refresh entries without aliasing surprises.
#[derive(Debug, Clone)]
pub struct PolicyRuleEntry {
    pub rule: PolicyRule,
    pub direction: PolicyDirection,
    pub tier: PolicyTier,
    /// VDS id → flow currently realising the rule there.
    pub rule_flow_map: HashMap<String, FlowEntry>,
}

/// Whitelist rule allowing all ingress traffic to an internal IP.
pub fn internal_ingress_rule(internal_ip: &str) -> PolicyRule {
    PolicyRule {
        rule_id: format!("internal-ingress-{internal_ip}"),
        priority: MAX_RULE_PRIORITY,
        src_ip_addr: None,
        dst_ip_addr: Some(internal_ip.to_string()),
        ip_protocol: 0,
        src_port: 0,
        src_port_mask: 0,
        dst_port: 0,
        dst_port_mask: 0,
        action: RuleAction::Allow,
    }
}

/// Whitelist rule allowing all egress traffic from an internal IP.
pub fn internal_egress_rule(internal_ip: &str) -> PolicyRule {
    PolicyRule {
        rule_id: format!("internal-egress-{internal_ip}"),
        priority: MAX_RULE_PRIORITY,
        src_ip_addr: Some(internal_ip.to_string()),
        dst_ip_addr: None,
        ip_protocol: 0,
        src_port: 0,
        src_port_mask: 0,
        dst_port: 0,
        dst_port_mask: 0,
        action: RuleAction::Allow,
    }
}
