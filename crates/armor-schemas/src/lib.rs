//! armor-schemas
//!
//! Wire types shared by the reconciliation core, the policy stores and the
//! HTTP daemon. Field names follow the provider's compute v1 JSON (camelCase).
//!
//! Every field is optional: the same types carry complete remote snapshots and
//! caller-supplied fragments, and an absent field must stay distinguishable
//! from an explicit value. Absent fields are never serialized.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lowest-precedence priority, reserved for the catch-all default rule.
pub const DEFAULT_RULE_PRIORITY: i32 = i32::MAX;

/// Action used for the default rule when the caller gives no hint.
pub const DEFAULT_RULE_ACTION: &str = "deny(403)";

/// Versioned expression kind matching on source IP ranges.
pub const SRC_IPS_V1: &str = "SRC_IPS_V1";

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Provider-assigned identifier. The provider encodes it as a string;
    /// callers may send either form.
    #[serde(default, with = "u64_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_protection_config: Option<AdaptiveProtectionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// "CLOUD_ARMOR" | "CLOUD_ARMOR_EDGE" | ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveProtectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer7_ddos_defense_config: Option<Layer7DdosDefenseConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer7DdosDefenseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// "STANDARD" | "PREMIUM"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_visibility: Option<String>,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// "allow" | "deny(403)" | "deny(404)" | "deny(502)" | "rate_based_ban" |
    /// "throttle" | "redirect"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Lower value evaluates first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#match: Option<RuleMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_options: Option<RateLimitOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_options: Option<RedirectOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_action: Option<HeaderAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RuleMatcherConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioned_expr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatcherConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip_ranges: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_duration_sec: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conform_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceed_action: Option<String>,
    /// "ALL" | "IP" | "HTTP_HEADER" | "XFF_IP" | "HTTP_COOKIE"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_on_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_on_key_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceed_redirect_options: Option<RedirectOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_sec: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectOptions {
    /// "EXTERNAL_302" | "GOOGLE_RECAPTCHA"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers_to_adds: Option<Vec<HeaderToAdd>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderToAdd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Preconfigured WAF expression sets
// ---------------------------------------------------------------------------

/// A provider-curated, versioned WAF signature group (e.g. `xss-v33-stable`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WafExpressionSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<WafExpression>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WafExpression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<i32>,
}

// ---------------------------------------------------------------------------
// Backend services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    #[serde(default, with = "u64_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    /// Self link of the attached security policy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Inbound request envelopes
// ---------------------------------------------------------------------------

/// Body of `POST .../policies` and `PATCH .../policies/{policy}`.
///
/// `policy` stays raw JSON: the merge engine must see exactly which fields
/// the caller supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRequest {
    #[serde(default)]
    pub policy: Option<Value>,
    /// Action for the synthesized default rule. Empty means `deny(403)`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_rule_action: String,
}

/// Body of `POST .../rules` and `PATCH .../rules/{priority}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRequest {
    #[serde(default)]
    pub rule: Option<Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

mod u64_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_str(&n.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }

        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Num(n)) => Ok(Some(n)),
            Some(Raw::Str(s)) => s.parse().map(Some).map_err(de::Error::custom),
        }
    }
}
