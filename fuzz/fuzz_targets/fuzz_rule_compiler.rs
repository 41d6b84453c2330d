#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::flow::entity::FlowAction;
use domain::pipeline::compiler::compile_rule;
use domain::rule::entity::{PolicyDirection, PolicyRule, PolicyTier, RuleAction};

// Deserialize fuzz data into a rule and compile it.
//
// Layout:
//   [0]     = direction selector
//   [1]     = tier selector
//   [2]     = action + field-presence flags
//   [3..5]  = priority
//   [5..13] = protocol + ports + masks
//   rest    = split into src/dst IP strings (arbitrary text)
fuzz_target!(|data: &[u8]| {
    if data.len() < 14 {
        return;
    }

    let direction = if data[0] & 1 == 0 {
        PolicyDirection::Egress
    } else {
        PolicyDirection::Ingress
    };
    let tier = match data[1] % 3 {
        0 => PolicyTier::Tier0,
        1 => PolicyTier::Tier1,
        _ => PolicyTier::Tier2,
    };
    let flags = data[2];
    let action = if flags & 1 == 0 {
        RuleAction::Allow
    } else {
        RuleAction::Deny
    };

    let rest = &data[13..];
    let split = rest.len() / 2;
    let src = String::from_utf8_lossy(&rest[..split]).into_owned();
    let dst = String::from_utf8_lossy(&rest[split..]).into_owned();

    let rule = PolicyRule {
        rule_id: "fuzz".to_string(),
        priority: u16::from_le_bytes([data[3], data[4]]),
        src_ip_addr: (flags & 2 != 0).then_some(src),
        dst_ip_addr: (flags & 4 != 0).then_some(dst),
        ip_protocol: data[5],
        src_port: u16::from_le_bytes([data[6], data[7]]),
        src_port_mask: u16::from_le_bytes([data[8], data[9]]),
        dst_port: u16::from_le_bytes([data[10], data[11]]),
        dst_port_mask: u16::from_le_bytes([data[12], data[13]]),
        action,
    };

    // Compilation must never panic, and a successful compile must
    // honour the action contract.
    if let Ok(spec) = compile_rule(&rule, direction, tier) {
        assert_eq!(spec.priority, rule.priority);
        match rule.action {
            RuleAction::Allow => {
                assert!(matches!(spec.actions[..], [FlowAction::GotoTable(_)]));
            }
            RuleAction::Deny => {
                assert!(matches!(spec.actions[..], [FlowAction::Drop]));
            }
        }
    }
});
