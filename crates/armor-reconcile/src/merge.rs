//! Field-level merge of a caller's partial payload onto a remote snapshot.
//!
//! 1. The partial payload is decoded onto a zero-valued destination, so only
//!    the fields the caller actually sent are populated.
//! 2. Policy merges drop rules on both sides. Rule sets change only through
//!    the dedicated add/patch/remove rule operations.
//! 3. The snapshot is merged onto the destination with a per-field decision
//!    table:
//!
//! | class        | caller set            | caller unset        |
//! |--------------|-----------------------|---------------------|
//! | overridable  | caller value          | snapshot value      |
//! | nested       | merged recursively    | snapshot value      |
//! | fixed        | must equal snapshot   | snapshot value      |
//!
//! Fixed fields are provider-owned (`id`, `selfLink`, ...). A caller value that
//! disagrees with the snapshot is a conflict, never silently overwritten.

use armor_schemas::{
    AdaptiveProtectionConfig, Expr, HeaderAction, Layer7DdosDefenseConfig, Policy,
    RateLimitOptions, RedirectOptions, Rule, RuleMatcher, RuleMatcherConfig, Threshold,
};
use serde::Deserialize;
use serde_json::Value;

use crate::ArmorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The partial payload does not decode into the resource type.
    Parse(String),
    /// The caller tried to change a provider-owned field.
    Conflict { field: &'static str },
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::Parse(msg) => write!(f, "parse partial payload: {msg}"),
            MergeError::Conflict { field } => {
                write!(f, "field '{field}' is provider-owned and cannot be changed")
            }
        }
    }
}

impl std::error::Error for MergeError {}

impl From<MergeError> for ArmorError {
    fn from(e: MergeError) -> Self {
        ArmorError::Validation(e.to_string())
    }
}

/// Merge a partial policy onto `snapshot`. The result never carries rules.
pub fn merge_policy(partial: &Value, snapshot: Policy) -> Result<Policy, MergeError> {
    let mut dest: Policy = decode(partial)?;
    dest.rules = None;

    let mut base = snapshot;
    base.rules = None;

    dest.merge_from(&base)?;
    Ok(dest)
}

/// Merge a partial rule onto `snapshot`.
pub fn merge_rule(partial: &Value, snapshot: Rule) -> Result<Rule, MergeError> {
    let mut dest: Rule = decode(partial)?;
    dest.merge_from(&snapshot)?;
    Ok(dest)
}

fn decode<T>(partial: &Value) -> Result<T, MergeError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match partial {
        Value::Null => Ok(T::default()),
        // derived struct impls also accept sequences, filling fields by position
        Value::Object(_) => T::deserialize(partial).map_err(|e| MergeError::Parse(e.to_string())),
        other => Err(MergeError::Parse(format!(
            "expected an object, got {}",
            json_type(other)
        ))),
    }
}

/// JSON type name of `v`, for parse errors.
pub fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Decision table
// ---------------------------------------------------------------------------

trait Merge {
    /// Fill every field `self` leaves unset from `base`.
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError>;
}

fn overridable<T: Clone>(dst: &mut Option<T>, base: &Option<T>) {
    if dst.is_none() {
        dst.clone_from(base);
    }
}

fn fixed<T: Clone + PartialEq>(
    field: &'static str,
    dst: &mut Option<T>,
    base: &Option<T>,
) -> Result<(), MergeError> {
    match dst {
        Some(d) => match base {
            Some(b) if d != b => Err(MergeError::Conflict { field }),
            _ => Ok(()),
        },
        None => {
            dst.clone_from(base);
            Ok(())
        }
    }
}

fn nested<T: Merge + Clone>(dst: &mut Option<T>, base: &Option<T>) -> Result<(), MergeError> {
    match dst {
        Some(d) => match base {
            Some(b) => d.merge_from(b),
            None => Ok(()),
        },
        None => {
            dst.clone_from(base);
            Ok(())
        }
    }
}

impl Merge for Policy {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        fixed("id", &mut self.id, &base.id)?;
        fixed("name", &mut self.name, &base.name)?;
        fixed("selfLink", &mut self.self_link, &base.self_link)?;
        fixed(
            "creationTimestamp",
            &mut self.creation_timestamp,
            &base.creation_timestamp,
        )?;
        fixed("kind", &mut self.kind, &base.kind)?;
        fixed("fingerprint", &mut self.fingerprint, &base.fingerprint)?;
        overridable(&mut self.description, &base.description);
        overridable(&mut self.r#type, &base.r#type);
        nested(
            &mut self.adaptive_protection_config,
            &base.adaptive_protection_config,
        )?;
        Ok(())
    }
}

impl Merge for AdaptiveProtectionConfig {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        nested(
            &mut self.layer7_ddos_defense_config,
            &base.layer7_ddos_defense_config,
        )
    }
}

impl Merge for Layer7DdosDefenseConfig {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(&mut self.enable, &base.enable);
        overridable(&mut self.rule_visibility, &base.rule_visibility);
        Ok(())
    }
}

impl Merge for Rule {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        fixed("kind", &mut self.kind, &base.kind)?;
        overridable(&mut self.action, &base.action);
        overridable(&mut self.description, &base.description);
        overridable(&mut self.priority, &base.priority);
        overridable(&mut self.preview, &base.preview);
        nested(&mut self.r#match, &base.r#match)?;
        nested(&mut self.rate_limit_options, &base.rate_limit_options)?;
        nested(&mut self.redirect_options, &base.redirect_options)?;
        nested(&mut self.header_action, &base.header_action)?;
        Ok(())
    }
}

impl Merge for RuleMatcher {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        nested(&mut self.config, &base.config)?;
        nested(&mut self.expr, &base.expr)?;
        overridable(&mut self.versioned_expr, &base.versioned_expr);
        Ok(())
    }
}

impl Merge for RuleMatcherConfig {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        // A supplied range list replaces the remote one wholesale.
        overridable(&mut self.src_ip_ranges, &base.src_ip_ranges);
        Ok(())
    }
}

impl Merge for Expr {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(&mut self.expression, &base.expression);
        overridable(&mut self.title, &base.title);
        overridable(&mut self.description, &base.description);
        overridable(&mut self.location, &base.location);
        Ok(())
    }
}

impl Merge for RateLimitOptions {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(&mut self.ban_duration_sec, &base.ban_duration_sec);
        nested(&mut self.ban_threshold, &base.ban_threshold)?;
        nested(&mut self.rate_limit_threshold, &base.rate_limit_threshold)?;
        overridable(&mut self.conform_action, &base.conform_action);
        overridable(&mut self.exceed_action, &base.exceed_action);
        overridable(&mut self.enforce_on_key, &base.enforce_on_key);
        overridable(&mut self.enforce_on_key_name, &base.enforce_on_key_name);
        nested(
            &mut self.exceed_redirect_options,
            &base.exceed_redirect_options,
        )?;
        Ok(())
    }
}

impl Merge for Threshold {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(&mut self.count, &base.count);
        overridable(&mut self.interval_sec, &base.interval_sec);
        Ok(())
    }
}

impl Merge for RedirectOptions {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(&mut self.r#type, &base.r#type);
        overridable(&mut self.target, &base.target);
        Ok(())
    }
}

impl Merge for HeaderAction {
    fn merge_from(&mut self, base: &Self) -> Result<(), MergeError> {
        overridable(
            &mut self.request_headers_to_adds,
            &base.request_headers_to_adds,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_policy() -> Policy {
        serde_json::from_value(json!({
            "id": "7",
            "name": "pol-a",
            "description": "old",
            "fingerprint": "abc=",
            "selfLink": "https://compute.example/projects/p1/global/securityPolicies/pol-a",
            "kind": "compute#securityPolicy",
            "type": "CLOUD_ARMOR",
            "adaptiveProtectionConfig": {
                "layer7DdosDefenseConfig": {"enable": false, "ruleVisibility": "STANDARD"}
            },
            "rules": [
                {"priority": 10, "action": "allow", "preview": false,
                 "match": {"versionedExpr": "SRC_IPS_V1", "config": {"srcIpRanges": ["10.0.0.0/8"]}}},
                {"priority": 2147483647, "action": "deny(403)", "preview": false,
                 "match": {"versionedExpr": "SRC_IPS_V1", "config": {"srcIpRanges": ["*"]}}}
            ]
        }))
        .unwrap()
    }

    fn snapshot_rule() -> Rule {
        serde_json::from_value(json!({
            "kind": "compute#securityPolicyRule",
            "priority": 10,
            "action": "throttle",
            "preview": true,
            "description": "rate limit api",
            "match": {
                "versionedExpr": "SRC_IPS_V1",
                "config": {"srcIpRanges": ["10.0.0.0/8"]}
            },
            "rateLimitOptions": {
                "conformAction": "allow",
                "exceedAction": "deny(429)",
                "enforceOnKey": "IP",
                "rateLimitThreshold": {"count": 100, "intervalSec": 60}
            }
        }))
        .unwrap()
    }

    #[test]
    fn empty_partial_is_identity_minus_rules() {
        let snap = snapshot_policy();
        let merged = merge_policy(&json!({}), snap.clone()).unwrap();

        let mut expected = snap;
        expected.rules = None;
        assert_eq!(merged, expected);
    }

    #[test]
    fn null_partial_behaves_like_empty() {
        let snap = snapshot_rule();
        assert_eq!(merge_rule(&Value::Null, snap.clone()).unwrap(), snap);
    }

    #[test]
    fn caller_field_wins_remote_fills_gaps() {
        let snap = Policy {
            id: Some(7),
            description: Some("old".into()),
            ..Policy::default()
        };
        let merged = merge_policy(&json!({"description": "new"}), snap).unwrap();
        assert_eq!(
            merged,
            Policy {
                id: Some(7),
                description: Some("new".into()),
                ..Policy::default()
            }
        );
    }

    #[test]
    fn caller_rules_never_reach_the_merged_policy() {
        let partial = json!({"rules": [{"priority": 5, "action": "allow"}]});
        let merged = merge_policy(&partial, snapshot_policy()).unwrap();
        assert!(merged.rules.is_none());
    }

    #[test]
    fn nested_fields_merge_recursively() {
        let partial = json!({
            "adaptiveProtectionConfig": {"layer7DdosDefenseConfig": {"enable": true}}
        });
        let merged = merge_policy(&partial, snapshot_policy()).unwrap();
        let l7 = merged
            .adaptive_protection_config
            .unwrap()
            .layer7_ddos_defense_config
            .unwrap();
        assert_eq!(l7.enable, Some(true));
        assert_eq!(l7.rule_visibility.as_deref(), Some("STANDARD"));
    }

    #[test]
    fn fixed_field_change_is_a_conflict() {
        let err = merge_policy(&json!({"id": "8"}), snapshot_policy()).unwrap_err();
        assert_eq!(err, MergeError::Conflict { field: "id" });

        let err = merge_policy(&json!({"name": "other"}), snapshot_policy()).unwrap_err();
        assert_eq!(err, MergeError::Conflict { field: "name" });
    }

    #[test]
    fn fixed_field_repeating_snapshot_value_is_fine() {
        let merged =
            merge_policy(&json!({"id": 7, "fingerprint": "abc="}), snapshot_policy()).unwrap();
        assert_eq!(merged.id, Some(7));
    }

    #[test]
    fn malformed_partial_is_a_parse_error() {
        let err = merge_policy(&json!({"description": 42}), snapshot_policy()).unwrap_err();
        assert!(matches!(err, MergeError::Parse(_)));

        let err = merge_rule(&json!(["not", "an", "object"]), snapshot_rule()).unwrap_err();
        assert!(matches!(err, MergeError::Parse(_)));
    }

    #[test]
    fn positional_array_is_never_read_as_a_rule() {
        for partial in [json!(["deny(404)"]), json!("deny(404)"), json!(7), json!(true)] {
            let err = merge_rule(&partial, snapshot_rule()).unwrap_err();
            assert!(
                matches!(&err, MergeError::Parse(m) if m.starts_with("expected an object")),
                "{partial}: {err:?}"
            );
        }
        let err = merge_policy(&json!(["pol-a"]), snapshot_policy()).unwrap_err();
        assert_eq!(
            err,
            MergeError::Parse("expected an object, got array".to_string())
        );
    }

    #[test]
    fn rule_merge_keeps_unsent_nested_options() {
        let partial = json!({
            "action": "rate_based_ban",
            "rateLimitOptions": {"banDurationSec": 600, "rateLimitThreshold": {"count": 50}}
        });
        let merged = merge_rule(&partial, snapshot_rule()).unwrap();

        assert_eq!(merged.action.as_deref(), Some("rate_based_ban"));
        assert_eq!(merged.priority, Some(10));
        assert_eq!(merged.preview, Some(true));

        let rlo = merged.rate_limit_options.unwrap();
        assert_eq!(rlo.ban_duration_sec, Some(600));
        assert_eq!(rlo.exceed_action.as_deref(), Some("deny(429)"));
        let t = rlo.rate_limit_threshold.unwrap();
        assert_eq!(t.count, Some(50));
        assert_eq!(t.interval_sec, Some(60));
    }

    #[test]
    fn supplied_ip_ranges_replace_remote_list() {
        let partial = json!({"match": {"config": {"srcIpRanges": ["192.168.0.0/16"]}}});
        let merged = merge_rule(&partial, snapshot_rule()).unwrap();
        let m = merged.r#match.unwrap();
        assert_eq!(m.versioned_expr.as_deref(), Some("SRC_IPS_V1"));
        assert_eq!(
            m.config.unwrap().src_ip_ranges,
            Some(vec!["192.168.0.0/16".to_string()])
        );
    }

    #[test]
    fn merge_errors_are_validation_class() {
        let err: ArmorError = MergeError::Conflict { field: "id" }.into();
        assert_eq!(err.http_status(), 400);
        assert!(!err.is_retryable());
    }
}
