//! Layered configuration for the armor daemon.
//!
//! Layers, later overriding earlier:
//! 1. built-in defaults ([`DEFAULTS_YAML`])
//! 2. YAML documents, merged in order
//! 3. `ARMOR_*` environment overrides
//!
//! CLI flags are applied by the binary on top of the typed [`ArmorConfig`].
//!
//! The effective document is checked for literal secrets and unknown keys,
//! then hashed (SHA-256 over canonical JSON) so a running instance can report
//! exactly which configuration it was started with.

pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULTS_YAML: &str = r#"
development-mode: false
addr: "0.0.0.0:8080"
log-level: info
log-format: json
protected-rules: [1000, 2147483647]
request-timeout-secs: 60
provider:
  base-url: "https://compute.googleapis.com/compute/v1"
  token-env: ARMOR_PROVIDER_TOKEN
"#;

/// If any leaf string in the effective config starts with one of these we
/// abort with CONFIG_SECRET_DETECTED. Config stores env var names, never values.
const SECRET_PREFIXES: &[&str] = &[
    "ya29.",      // OAuth2 access token
    "AIza",       // API key
    "-----BEGIN", // PEM private keys
    "AKIA",       // AWS access key ID
    "sk-",        // generic bearer-style key
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
];

/// JSON-pointer prefixes the daemon actually reads.
///
/// Any leaf not under one of these is an unknown key and fails the load.
pub const KNOWN_POINTERS: &[&str] = &[
    "/development-mode",
    "/addr",
    "/log-level",
    "/log-format",
    "/protected-rules",
    "/request-timeout-secs",
    "/provider/base-url",
    "/provider/token-env",
];

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Str,
    Bool,
    Uint,
    /// Comma-separated list.
    List,
}

/// `ARMOR_*` variable -> config pointer.
const ENV_OVERRIDES: &[(&str, &str, EnvKind)] = &[
    ("ARMOR_DEVELOPMENT_MODE", "/development-mode", EnvKind::Bool),
    ("ARMOR_ADDR", "/addr", EnvKind::Str),
    ("ARMOR_LOG_LEVEL", "/log-level", EnvKind::Str),
    ("ARMOR_LOG_FORMAT", "/log-format", EnvKind::Str),
    ("ARMOR_PROTECTED_RULES", "/protected-rules", EnvKind::List),
    ("ARMOR_REQUEST_TIMEOUT_SECS", "/request-timeout-secs", EnvKind::Uint),
    ("ARMOR_PROVIDER_BASE_URL", "/provider/base-url", EnvKind::Str),
    ("ARMOR_PROVIDER_TOKEN_ENV", "/provider/token-env", EnvKind::Str),
];

/// Collect the recognised `ARMOR_*` overrides from the process environment.
pub fn env_overrides_from_process() -> BTreeMap<String, String> {
    ENV_OVERRIDES
        .iter()
        .filter_map(|(name, _, _)| std::env::var(name).ok().map(|v| (name.to_string(), v)))
        .collect()
}

/// Apply `env` onto `config`. Unrecognised variable names are ignored.
pub fn apply_env_overrides(config: &mut Value, env: &BTreeMap<String, String>) -> Result<()> {
    for (name, pointer, kind) in ENV_OVERRIDES {
        let Some(raw) = env.get(*name) else {
            continue;
        };
        let raw = raw.trim();
        let value = match kind {
            EnvKind::Str => Value::String(raw.to_string()),
            EnvKind::Bool => Value::Bool(parse_bool(raw).with_context(|| {
                format!("CONFIG_INVALID env {name}: expected a boolean, got {raw:?}")
            })?),
            EnvKind::Uint => {
                let n: u64 = raw.parse().with_context(|| {
                    format!("CONFIG_INVALID env {name}: expected an unsigned integer, got {raw:?}")
                })?;
                Value::from(n)
            }
            EnvKind::List => Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            ),
        };
        set_pointer(config, pointer, value);
    }
    Ok(())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Write `value` at `pointer`, creating intermediate objects.
fn set_pointer(root: &mut Value, pointer: &str, value: Value) {
    let mut cur = root;
    let tokens: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    let (last, parents) = match tokens.split_last() {
        Some(split) => split,
        None => return,
    };

    for t in parents {
        if !cur.is_object() {
            *cur = Value::Object(Default::default());
        }
        cur = match cur {
            Value::Object(map) => map
                .entry(t.to_string())
                .or_insert_with(|| Value::Object(Default::default())),
            _ => return,
        };
    }
    if !cur.is_object() {
        *cur = Value::Object(Default::default());
    }
    if let Value::Object(map) = cur {
        map.insert(last.to_string(), value);
    }
}

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Load `paths` on top of the defaults, then apply `env`.
pub fn load_layered_yaml(paths: &[&str], env: &BTreeMap<String, String>) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs, env)
}

pub fn load_layered_yaml_from_strings(
    yaml_docs: &[&str],
    env: &BTreeMap<String, String>,
) -> Result<LoadedConfig> {
    let mut merged = yaml_to_json(DEFAULTS_YAML).context("invalid built-in defaults")?;
    for raw in yaml_docs {
        merged = deep_merge(merged, yaml_to_json(raw)?);
    }
    apply_env_overrides(&mut merged, env)?;

    enforce_no_secret_literals(&merged)?;
    enforce_known_keys(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn yaml_to_json(raw: &str) -> Result<Value> {
    let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
    let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
    // An empty document parses as null; treat it as "no overrides".
    Ok(match v_json {
        Value::Null => Value::Object(Default::default()),
        v => v,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json's Map is key-ordered, so compact serialization is canonical.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

/// Leaf pointers of `config` not covered by [`KNOWN_POINTERS`] (sorted).
pub fn unknown_leaf_pointers(config: &Value) -> Vec<String> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(config, "", &mut leaves);

    let mut unknown: Vec<String> = leaves
        .into_iter()
        .filter(|lp| !KNOWN_POINTERS.iter().any(|kp| is_prefix_pointer(kp, lp)))
        .collect();
    unknown.sort();
    unknown.dedup();
    unknown
}

fn enforce_known_keys(config: &Value) -> Result<()> {
    let unknown = unknown_leaf_pointers(config);
    if !unknown.is_empty() {
        bail!(
            "CONFIG_UNKNOWN_KEYS: {} unknown config key(s): {:?}",
            unknown.len(),
            unknown
        );
    }
    Ok(())
}

/// `"/a/b"` covers `"/a/b"` and `"/a/b/c"` but not `"/a/bc"`.
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() || prefix.is_empty() => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

// ---------------------------------------------------------------------------
// Typed view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => bail!("CONFIG_INVALID log-format: expected json|text, got {other:?}"),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Name of the env var holding the bearer token. Never the token itself.
    pub token_env: String,
}

/// Effective daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorConfig {
    /// Use the in-memory store instead of the provider.
    pub development_mode: bool,
    pub addr: SocketAddr,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Canonical, de-duplicated, ascending.
    pub protected_rules: Vec<i32>,
    pub request_timeout_secs: u64,
    pub provider: ProviderConfig,
}

impl ArmorConfig {
    /// Build the typed view from an effective config document.
    pub fn from_json(config: &Value) -> Result<Self> {
        let development_mode = match config.pointer("/development-mode") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => bail!("CONFIG_INVALID development-mode: expected bool, got {other}"),
        };

        let addr_raw = required_str(config, "/addr")?;
        let addr: SocketAddr = addr_raw
            .parse()
            .with_context(|| format!("CONFIG_INVALID addr: {addr_raw:?} is not host:port"))?;

        let log_level = required_str(config, "/log-level")?;
        let log_format = LogFormat::parse(&required_str(config, "/log-format")?)?;

        let protected_rules = parse_protected_rules(config.pointer("/protected-rules"))?;

        let request_timeout_secs = match config.pointer("/request-timeout-secs") {
            Some(v) => v
                .as_u64()
                .filter(|n| *n > 0)
                .with_context(|| {
                    format!("CONFIG_INVALID request-timeout-secs: expected a positive integer, got {v}")
                })?,
            None => bail!("CONFIG_INVALID request-timeout-secs: missing"),
        };

        Ok(Self {
            development_mode,
            addr,
            log_level,
            log_format,
            protected_rules,
            request_timeout_secs,
            provider: ProviderConfig {
                base_url: required_str(config, "/provider/base-url")?,
                token_env: required_str(config, "/provider/token-env")?,
            },
        })
    }
}

fn required_str(config: &Value, pointer: &str) -> Result<String> {
    let s = config
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if s.is_empty() {
        bail!("CONFIG_INVALID {}: expected a non-empty string", &pointer[1..]);
    }
    Ok(s.to_string())
}

/// Accepts integers or integer strings; every entry must fit an i32.
fn parse_protected_rules(v: Option<&Value>) -> Result<Vec<i32>> {
    let items = match v {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => bail!("CONFIG_INVALID protected-rules: expected a list, got {other}"),
    };

    let mut out = BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        let parsed = match item {
            Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            Value::String(s) => s.trim().parse::<i32>().ok(),
            _ => None,
        };
        match parsed {
            Some(p) => {
                out.insert(p);
            }
            None => bail!("CONFIG_INVALID protected-rules[{i}]: {item} is not a 32-bit priority"),
        }
    }
    Ok(out.into_iter().collect())
}

/// Full pipeline: defaults, files, environment, guards, typed view.
pub fn load_config(
    paths: &[&str],
    env: &BTreeMap<String, String>,
) -> Result<(ArmorConfig, LoadedConfig)> {
    let loaded = load_layered_yaml(paths, env)?;
    let cfg = ArmorConfig::from_json(&loaded.config_json)?;
    Ok((cfg, loaded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_pointer_respects_segment_boundary() {
        assert!(is_prefix_pointer("/provider/base-url", "/provider/base-url"));
        assert!(is_prefix_pointer("/protected-rules", "/protected-rules/0"));
        assert!(!is_prefix_pointer("/addr", "/address"));
    }

    #[test]
    fn set_pointer_creates_intermediate_objects() {
        let mut v = json!({});
        set_pointer(&mut v, "/provider/base-url", json!("http://x"));
        assert_eq!(v, json!({"provider": {"base-url": "http://x"}}));
    }

    #[test]
    fn protected_rules_accept_numbers_and_strings() {
        let v = json!([2147483647, "1000", " 42 ", 1000]);
        assert_eq!(
            parse_protected_rules(Some(&v)).unwrap(),
            vec![42, 1000, 2147483647]
        );
    }

    #[test]
    fn protected_rules_reject_out_of_range() {
        let v = json!([2147483648i64]);
        let err = parse_protected_rules(Some(&v)).unwrap_err().to_string();
        assert!(err.contains("protected-rules[0]"), "{err}");
    }

    #[test]
    fn empty_collections_count_as_leaves() {
        let mut leaves = Vec::new();
        collect_leaf_pointers(&json!({"protected-rules": [], "x": {}}), "", &mut leaves);
        assert_eq!(leaves, vec!["/protected-rules", "/x"]);
    }

    #[test]
    fn log_format_parse() {
        assert_eq!(LogFormat::parse("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("text").unwrap(), LogFormat::Text);
        assert!(LogFormat::parse("xml").is_err());
    }
}
