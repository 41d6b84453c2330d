use std::sync::Arc;

use domain::common::error::DatapathError;
use domain::flow::entity::{CtStates, FlowAction, FlowMatch, FlowSpec, RegMatch};
use domain::pipeline::compiler::compile_rule;
use domain::pipeline::tables::{
    CT_COMMIT_TABLE, CT_STATE_TABLE, DEFAULT_FLOW_MISS_PRIORITY, DIRECTION_SELECTION_TABLE,
    EGRESS_TIER0_TABLE, EGRESS_TIER1_TABLE, EGRESS_TIER2_TABLE, ETH_TYPE_IP, FLOW_MATCH_OFFSET,
    HIGH_MATCH_FLOW_PRIORITY, INGRESS_TIER0_TABLE, INGRESS_TIER1_TABLE, INGRESS_TIER2_TABLE,
    INPUT_TABLE, MID_MATCH_FLOW_PRIORITY, NORMAL_MATCH_FLOW_PRIORITY, POLICY_CONNTRACK_ZONE,
    POLICY_FORWARDING_TABLE, POLICY_TO_CLS_PORT, POLICY_TO_LOCAL_PORT, SFC_POLICY_TABLE,
};
use domain::rule::entity::{FlowEntry, PolicyDirection, PolicyRule, PolicyTier};
use ports::secondary::flow_port::FlowProgrammer;
use ports::secondary::ovsdb_port::OvsdbBridge;
use tracing::debug;

use super::BridgePorts;

/// The pipeline core: classification, stateful connection tracking and
/// the tiered policy tables sit on this bridge.
pub struct PolicyBridge {
    ports: BridgePorts,
}

impl PolicyBridge {
    pub fn new(ports: BridgePorts) -> Self {
        Self { ports }
    }

    pub fn name(&self) -> &str {
        &self.ports.name
    }

    pub fn flows(&self) -> &Arc<dyn FlowProgrammer> {
        &self.ports.flows
    }

    pub fn ovsdb(&self) -> &Arc<dyn OvsdbBridge> {
        &self.ports.ovsdb
    }

    pub fn init(&self) -> Result<(), DatapathError> {
        self.init_input_table()?;
        self.init_ct_tables()?;
        self.init_direction_selection_table()?;
        self.init_policy_tables()?;
        self.init_forwarding_table()?;
        debug!(bridge = %self.ports.name, "policy bridge pipeline programmed");
        Ok(())
    }

    /// Table 0: IP goes through conntrack recirculation into the state
    /// table; non-IP is passed across the bridge unchanged.
    fn init_input_table(&self) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ..FlowMatch::default()
            },
            vec![FlowAction::Conntrack {
                commit: false,
                zone: POLICY_CONNTRACK_ZONE,
                table: Some(CT_STATE_TABLE),
            }],
        ))?;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_LOCAL_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(POLICY_TO_CLS_PORT)],
        ))?;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            HIGH_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_CLS_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(POLICY_TO_LOCAL_PORT)],
        ))?;

        flows.install(&FlowSpec::new(
            INPUT_TABLE,
            DEFAULT_FLOW_MISS_PRIORITY,
            FlowMatch::default(),
            vec![FlowAction::Drop],
        ))?;

        Ok(())
    }

    /// Tables 1 and 70: established traffic bypasses the policy tiers,
    /// invalid tracked traffic drops, new connections are committed to
    /// the zone after the tiers admit them.
    fn init_ct_tables(&self) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;

        flows.install(&FlowSpec::new(
            CT_STATE_TABLE,
            MID_MATCH_FLOW_PRIORITY + FLOW_MATCH_OFFSET,
            FlowMatch {
                ct_states: Some(CtStates::default().with_new(false).with_est(true)),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(CT_COMMIT_TABLE)],
        ))?;

        flows.install(&FlowSpec::new(
            CT_STATE_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                ct_states: Some(CtStates::default().with_inv(true).with_trk(true)),
                ..FlowMatch::default()
            },
            vec![FlowAction::Drop],
        ))?;

        flows.install(&FlowSpec::new(
            CT_STATE_TABLE,
            DEFAULT_FLOW_MISS_PRIORITY,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(DIRECTION_SELECTION_TABLE)],
        ))?;

        flows.install(&FlowSpec::new(
            CT_COMMIT_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                eth_type: Some(ETH_TYPE_IP),
                ct_states: Some(CtStates::default().with_new(true).with_trk(true)),
                ..FlowMatch::default()
            },
            vec![FlowAction::Conntrack {
                commit: true,
                zone: POLICY_CONNTRACK_ZONE,
                table: Some(SFC_POLICY_TABLE),
            }],
        ))?;

        flows.install(&FlowSpec::new(
            CT_COMMIT_TABLE,
            DEFAULT_FLOW_MISS_PRIORITY,
            FlowMatch::default(),
            vec![FlowAction::GotoTable(SFC_POLICY_TABLE)],
        ))?;

        Ok(())
    }

    /// Table 10: the patch port a packet arrived on decides whether it
    /// runs the egress or the ingress tier chain.
    fn init_direction_selection_table(&self) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;

        flows.install(&FlowSpec::new(
            DIRECTION_SELECTION_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_LOCAL_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(EGRESS_TIER0_TABLE)],
        ))?;

        flows.install(&FlowSpec::new(
            DIRECTION_SELECTION_TABLE,
            MID_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_CLS_PORT),
                ..FlowMatch::default()
            },
            vec![FlowAction::GotoTable(INGRESS_TIER0_TABLE)],
        ))?;

        Ok(())
    }

    /// Tier-table miss chain: 20 → 25 → 30 → 70 and 50 → 55 → 60 → 70,
    /// plus the reserved SFC table's pass-through to forwarding.
    fn init_policy_tables(&self) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;
        let chain = [
            (EGRESS_TIER0_TABLE, EGRESS_TIER1_TABLE),
            (EGRESS_TIER1_TABLE, EGRESS_TIER2_TABLE),
            (EGRESS_TIER2_TABLE, CT_COMMIT_TABLE),
            (INGRESS_TIER0_TABLE, INGRESS_TIER1_TABLE),
            (INGRESS_TIER1_TABLE, INGRESS_TIER2_TABLE),
            (INGRESS_TIER2_TABLE, CT_COMMIT_TABLE),
            (SFC_POLICY_TABLE, POLICY_FORWARDING_TABLE),
        ];

        for (table, next) in chain {
            flows.install(&FlowSpec::new(
                table,
                DEFAULT_FLOW_MISS_PRIORITY,
                FlowMatch::default(),
                vec![FlowAction::GotoTable(next)],
            ))?;
        }

        Ok(())
    }

    /// Table 90: admitted traffic crosses to the far patch port unless
    /// register 6 requests an SFC detour (reserved; zero means none).
    fn init_forwarding_table(&self) -> Result<(), DatapathError> {
        let flows = &self.ports.flows;
        let no_sfc = RegMatch {
            reg: 6,
            value: 0,
            mask: 0x0000_ffff,
        };

        flows.install(&FlowSpec::new(
            POLICY_FORWARDING_TABLE,
            NORMAL_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_LOCAL_PORT),
                regs: vec![no_sfc],
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(POLICY_TO_CLS_PORT)],
        ))?;

        flows.install(&FlowSpec::new(
            POLICY_FORWARDING_TABLE,
            NORMAL_MATCH_FLOW_PRIORITY,
            FlowMatch {
                in_port: Some(POLICY_TO_CLS_PORT),
                regs: vec![no_sfc],
                ..FlowMatch::default()
            },
            vec![FlowAction::Output(POLICY_TO_LOCAL_PORT)],
        ))?;

        Ok(())
    }

    /// Compile and install one policy rule on this bridge.
    pub fn add_rule(
        &self,
        rule: &PolicyRule,
        direction: PolicyDirection,
        tier: PolicyTier,
    ) -> Result<FlowEntry, DatapathError> {
        if !self.ports.flows.is_connected() {
            return Err(DatapathError::BridgeNotConnected {
                bridge: self.ports.name.clone(),
            });
        }

        let spec = compile_rule(rule, direction, tier)?;
        self.ports.flows.install(&spec)
    }

    /// Delete the flow previously installed for a rule.
    pub fn remove_rule_flow(&self, entry: &FlowEntry) -> Result<(), DatapathError> {
        self.ports.flows.uninstall(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::flow::entity::TableId;
    use domain::rule::entity::RuleAction;
    use ports::test_utils::{MockOvsdb, MockSwitch};

    fn make_bridge() -> (PolicyBridge, Arc<MockSwitch>) {
        let switch = Arc::new(MockSwitch::new("br0-policy"));
        switch.set_round(1);
        let bridge = PolicyBridge::new(BridgePorts {
            name: "br0-policy".to_string(),
            flows: switch.clone(),
            ovsdb: Arc::new(MockOvsdb::new()),
        });
        (bridge, switch)
    }

    #[test]
    fn init_populates_every_pipeline_table() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let tables: Vec<u8> = switch.populated_tables().iter().map(|t| t.0).collect();
        assert_eq!(tables, vec![0, 1, 10, 20, 25, 30, 50, 55, 60, 70, 80, 90]);
    }

    #[test]
    fn tier_miss_chain_links_up() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let miss_target = |table: u8| -> FlowAction {
            switch
                .flows_in_table(TableId(table))
                .into_iter()
                .find(|f| f.priority == DEFAULT_FLOW_MISS_PRIORITY)
                .unwrap_or_else(|| panic!("table {table} has a miss flow"))
                .actions[0]
                .clone()
        };

        assert_eq!(miss_target(20), FlowAction::GotoTable(TableId(25)));
        assert_eq!(miss_target(25), FlowAction::GotoTable(TableId(30)));
        assert_eq!(miss_target(30), FlowAction::GotoTable(TableId(70)));
        assert_eq!(miss_target(50), FlowAction::GotoTable(TableId(55)));
        assert_eq!(miss_target(55), FlowAction::GotoTable(TableId(60)));
        assert_eq!(miss_target(60), FlowAction::GotoTable(TableId(70)));
        assert_eq!(miss_target(80), FlowAction::GotoTable(TableId(90)));
    }

    #[test]
    fn established_traffic_bypasses_policy_tiers() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let est_flow = switch
            .flows_in_table(CT_STATE_TABLE)
            .into_iter()
            .find(|f| {
                f.matches.ct_states
                    == Some(CtStates::default().with_new(false).with_est(true))
            })
            .expect("established-state flow present");
        assert_eq!(
            est_flow.priority,
            MID_MATCH_FLOW_PRIORITY + FLOW_MATCH_OFFSET
        );
        assert_eq!(est_flow.actions, vec![FlowAction::GotoTable(CT_COMMIT_TABLE)]);
    }

    #[test]
    fn new_connections_commit_to_policy_zone() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let commit = switch
            .flows_in_table(CT_COMMIT_TABLE)
            .into_iter()
            .find(|f| f.priority == MID_MATCH_FLOW_PRIORITY)
            .expect("commit flow present");
        assert_eq!(
            commit.actions,
            vec![FlowAction::Conntrack {
                commit: true,
                zone: POLICY_CONNTRACK_ZONE,
                table: Some(SFC_POLICY_TABLE),
            }]
        );
    }

    #[test]
    fn forwarding_requires_no_sfc_mark() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let flows = switch.flows_in_table(POLICY_FORWARDING_TABLE);
        assert_eq!(flows.len(), 2);
        for flow in flows {
            assert_eq!(
                flow.matches.regs,
                vec![RegMatch {
                    reg: 6,
                    value: 0,
                    mask: 0x0000_ffff,
                }]
            );
        }
    }

    #[test]
    fn allow_and_deny_rules_land_in_tier_table() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();

        let allow = PolicyRule {
            rule_id: "R1".to_string(),
            priority: 80,
            src_ip_addr: Some("10.0.0.0/24".to_string()),
            dst_ip_addr: Some("10.0.1.5".to_string()),
            ip_protocol: 6,
            src_port: 0,
            src_port_mask: 0,
            dst_port: 80,
            dst_port_mask: 0xffff,
            action: RuleAction::Allow,
        };
        let entry = bridge
            .add_rule(&allow, PolicyDirection::Egress, PolicyTier::Tier1)
            .unwrap();
        assert_eq!(entry.table, EGRESS_TIER1_TABLE);
        assert_eq!(entry.priority, 80);

        let mut deny = allow.clone();
        deny.rule_id = "R2".to_string();
        deny.priority = 90;
        deny.action = RuleAction::Deny;
        let deny_entry = bridge
            .add_rule(&deny, PolicyDirection::Egress, PolicyTier::Tier1)
            .unwrap();
        assert_eq!(deny_entry.table, EGRESS_TIER1_TABLE);

        // The deny outranks the allow within the same table.
        let installed = switch.flows_in_table(EGRESS_TIER1_TABLE);
        let deny_flow = installed.iter().find(|f| f.priority == 90).unwrap();
        assert_eq!(deny_flow.actions, vec![FlowAction::Drop]);
        let allow_flow = installed.iter().find(|f| f.priority == 80).unwrap();
        assert_eq!(
            allow_flow.actions,
            vec![FlowAction::GotoTable(CT_COMMIT_TABLE)]
        );
        assert!(deny_flow.priority > allow_flow.priority);
    }

    #[test]
    fn add_rule_refuses_when_disconnected() {
        let (bridge, switch) = make_bridge();
        switch.set_connected(false);

        let rule = domain::rule::entity::internal_ingress_rule("10.0.0.1");
        assert!(matches!(
            bridge.add_rule(&rule, PolicyDirection::Ingress, PolicyTier::Tier2),
            Err(DatapathError::BridgeNotConnected { .. })
        ));
    }

    #[test]
    fn rule_flow_removal_round_trips() {
        let (bridge, switch) = make_bridge();
        bridge.init().unwrap();
        let base = switch.flow_count();

        let rule = domain::rule::entity::internal_egress_rule("10.0.0.1");
        let entry = bridge
            .add_rule(&rule, PolicyDirection::Egress, PolicyTier::Tier2)
            .unwrap();
        assert_eq!(switch.flow_count(), base + 1);

        bridge.remove_rule_flow(&entry).unwrap();
        assert_eq!(switch.flow_count(), base);
    }
}
