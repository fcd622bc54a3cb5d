use armor_schemas::{
    Rule, RuleMatcher, RuleMatcherConfig, DEFAULT_RULE_ACTION, DEFAULT_RULE_PRIORITY, SRC_IPS_V1,
};

pub const DEFAULT_RULE_DESCRIPTION: &str = "Default rule, higher priority overrides it";

/// Build the catch-all rule for a policy created without rules.
///
/// `hint` is the caller's `default_rule_action`; empty means `deny(403)`.
pub fn default_rule(hint: &str) -> Rule {
    let action = if hint.is_empty() {
        DEFAULT_RULE_ACTION
    } else {
        hint
    };

    Rule {
        action: Some(action.to_string()),
        description: Some(DEFAULT_RULE_DESCRIPTION.to_string()),
        priority: Some(DEFAULT_RULE_PRIORITY),
        r#match: Some(RuleMatcher {
            config: Some(RuleMatcherConfig {
                src_ip_ranges: Some(vec!["*".to_string()]),
            }),
            versioned_expr: Some(SRC_IPS_V1.to_string()),
            ..RuleMatcher::default()
        }),
        ..Rule::default()
    }
}
