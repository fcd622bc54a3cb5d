use armor_schemas::WafExpressionSet;

/// Narrow the provider's expression sets by type and version.
///
/// Set ids look like `xss-v33-stable` or `sqli-canary`. With an empty
/// `rule_type` everything is returned; with a version the id must contain
/// `"{rule_type}-{version}"`, otherwise just `rule_type`.
pub fn filter_expression_sets(
    sets: Vec<WafExpressionSet>,
    rule_type: &str,
    version: &str,
) -> Vec<WafExpressionSet> {
    if rule_type.is_empty() {
        return sets;
    }

    let needle = if version.is_empty() {
        rule_type.to_string()
    } else {
        format!("{rule_type}-{version}")
    };

    sets.into_iter()
        .filter(|s| s.id.as_deref().is_some_and(|id| id.contains(&needle)))
        .collect()
}
