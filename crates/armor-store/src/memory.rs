//! In-process [`PolicyStore`] used by tests and development mode.
//!
//! Mirrors the provider's observable behaviour closely enough for the
//! orchestrator to be exercised end to end: ids, self links, fingerprints and
//! timestamps are assigned on create, missing resources are 404, duplicates
//! are 409, malformed input is 400.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use armor_schemas::{BackendService, Policy, Rule, WafExpression, WafExpressionSet};

use crate::{PolicyStore, StoreError};

const SELF_LINK_BASE: &str = "https://www.googleapis.com/compute/v1";
const POLICY_KIND: &str = "compute#securityPolicy";
const RULE_KIND: &str = "compute#securityPolicyRule";
const BACKEND_KIND: &str = "compute#backendService";

/// Store operations, recorded in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    ListPolicies,
    GetPolicy,
    CreatePolicy,
    UpdatePolicy,
    DeletePolicy,
    GetRule,
    AddRule,
    UpdateRule,
    RemoveRule,
    ListPreconfigured,
    ListBackendServices,
    SetBackendSecurityPolicy,
}

#[derive(Debug, Default)]
struct Inner {
    /// (project, policy name) -> policy
    policies: BTreeMap<(String, String), Policy>,
    /// (project, backend name) -> backend service
    backends: BTreeMap<(String, String), BackendService>,
    expression_sets: Vec<WafExpressionSet>,
    next_id: u64,
    calls: Vec<StoreOp>,
    /// One-shot injected failures, consumed by the next matching call.
    failures: BTreeMap<StoreOp, StoreError>,
}

#[derive(Debug)]
pub struct MemoryPolicyStore {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
}

impl Default for MemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                expression_sets: builtin_expression_sets(),
                next_id: 1_000_000_000_000_000_000,
                ..Inner::default()
            }),
            latency: None,
        }
    }

    /// Delay every call by `latency` before it touches state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_expression_sets(self, sets: Vec<WafExpressionSet>) -> Self {
        self.lock().expression_sets = sets;
        self
    }

    pub fn with_backend(self, project: &str, name: &str) -> Self {
        {
            let mut inner = self.lock();
            let id = inner.allocate_id();
            inner.backends.insert(
                (project.to_string(), name.to_string()),
                BackendService {
                    id: Some(id),
                    name: Some(name.to_string()),
                    self_link: Some(format!(
                        "{SELF_LINK_BASE}/projects/{project}/global/backendServices/{name}"
                    )),
                    kind: Some(BACKEND_KIND.to_string()),
                    ..BackendService::default()
                },
            );
        }
        self
    }

    /// Seed a policy directly, bypassing the call journal.
    pub fn with_policy(self, project: &str, policy: Policy) -> Self {
        {
            let mut inner = self.lock();
            let name = policy.name.clone().unwrap_or_default();
            let stored = inner.materialize(project, policy);
            inner.policies.insert((project.to_string(), name), stored);
        }
        self
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.lock().failures.insert(op, err);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StoreOp> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.lock().calls.iter().filter(|c| **c == op).count()
    }

    /// Current stored copy of a policy, without recording a call.
    pub fn snapshot(&self, project: &str, policy: &str) -> Option<Policy> {
        self.lock()
            .policies
            .get(&(project.to_string(), policy.to_string()))
            .cloned()
    }

    pub fn backend(&self, project: &str, backend: &str) -> Option<BackendService> {
        self.lock()
            .backends
            .get(&(project.to_string(), backend.to_string()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, apply latency and consume any injected failure.
    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        inner.calls.push(op);
        match inner.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn policy_mut(&mut self, project: &str, policy: &str) -> Result<&mut Policy, StoreError> {
        self.policies
            .get_mut(&(project.to_string(), policy.to_string()))
            .ok_or_else(|| StoreError::not_found(policy_path(project, policy)))
    }

    /// Assign the provider-owned fields to a freshly created policy.
    fn materialize(&mut self, project: &str, mut policy: Policy) -> Policy {
        let id = self.allocate_id();
        let name = policy.name.clone().unwrap_or_default();
        policy.id = Some(id);
        policy.kind = Some(POLICY_KIND.to_string());
        policy.self_link = Some(format!(
            "{SELF_LINK_BASE}/projects/{project}/global/securityPolicies/{name}"
        ));
        policy.creation_timestamp = Some(chrono::Utc::now().to_rfc3339());
        policy.fingerprint = Some(fingerprint(id, 0));
        if policy.r#type.is_none() {
            policy.r#type = Some("CLOUD_ARMOR".to_string());
        }

        let mut rules = policy.rules.take().unwrap_or_default();
        if rules.is_empty() {
            rules.push(provider_default_rule());
        }
        for r in rules.iter_mut() {
            r.kind = Some(RULE_KIND.to_string());
        }
        rules.sort_by_key(|r| r.priority.unwrap_or(i32::MAX));
        policy.rules = Some(rules);
        policy
    }
}

#[async_trait::async_trait]
impl PolicyStore for MemoryPolicyStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_policies(&self, project: &str) -> Result<Vec<Policy>, StoreError> {
        self.enter(StoreOp::ListPolicies).await?;
        let inner = self.lock();
        Ok(inner
            .policies
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, policy)| policy.clone())
            .collect())
    }

    async fn get_policy(&self, project: &str, policy: &str) -> Result<Policy, StoreError> {
        self.enter(StoreOp::GetPolicy).await?;
        let mut inner = self.lock();
        inner.policy_mut(project, policy).map(|p| p.clone())
    }

    async fn create_policy(&self, project: &str, policy: &Policy) -> Result<(), StoreError> {
        self.enter(StoreOp::CreatePolicy).await?;

        let name = match policy.name.as_deref() {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                return Err(StoreError::api(
                    400,
                    "Required field 'resource.name' not specified",
                ))
            }
        };
        check_rules(policy.rules.as_deref().unwrap_or_default())?;

        let mut inner = self.lock();
        let key = (project.to_string(), name.clone());
        if inner.policies.contains_key(&key) {
            return Err(StoreError::already_exists(policy_path(project, &name)));
        }
        let stored = inner.materialize(project, policy.clone());
        inner.policies.insert(key, stored);
        Ok(())
    }

    async fn update_policy(
        &self,
        project: &str,
        policy: &str,
        resource: &Policy,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::UpdatePolicy).await?;
        let mut inner = self.lock();
        let stored = inner.policy_mut(project, policy)?;

        if let (Some(want), Some(have)) = (&resource.fingerprint, &stored.fingerprint) {
            if want != have {
                return Err(StoreError::api(
                    412,
                    "Supplied fingerprint does not match current metadata fingerprint.",
                ));
            }
        }

        if resource.description.is_some() {
            stored.description.clone_from(&resource.description);
        }
        if resource.adaptive_protection_config.is_some() {
            stored
                .adaptive_protection_config
                .clone_from(&resource.adaptive_protection_config);
        }
        if resource.r#type.is_some() {
            stored.r#type.clone_from(&resource.r#type);
        }
        bump_fingerprint(stored);
        Ok(())
    }

    async fn delete_policy(&self, project: &str, policy: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::DeletePolicy).await?;
        let mut inner = self.lock();
        let link = inner.policy_mut(project, policy)?.self_link.clone();

        let in_use = inner
            .backends
            .iter()
            .any(|((p, _), b)| p == project && link.is_some() && b.security_policy == link);
        if in_use {
            return Err(StoreError::api(
                400,
                format!(
                    "The security_policy resource '{}' is already being used",
                    policy_path(project, policy)
                ),
            ));
        }

        inner
            .policies
            .remove(&(project.to_string(), policy.to_string()));
        Ok(())
    }

    async fn get_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
    ) -> Result<Rule, StoreError> {
        self.enter(StoreOp::GetRule).await?;
        let mut inner = self.lock();
        let stored = inner.policy_mut(project, policy)?;
        rules_of(stored)
            .iter()
            .find(|r| r.priority == Some(priority))
            .cloned()
            .ok_or_else(|| StoreError::not_found(rule_path(project, policy, priority)))
    }

    async fn add_rule(&self, project: &str, policy: &str, rule: &Rule) -> Result<(), StoreError> {
        self.enter(StoreOp::AddRule).await?;
        let priority = rule
            .priority
            .ok_or_else(|| StoreError::api(400, "Required field 'priority' not specified"))?;

        let mut inner = self.lock();
        let stored = inner.policy_mut(project, policy)?;
        let rules = stored.rules.get_or_insert_with(Vec::new);
        if rules.iter().any(|r| r.priority == Some(priority)) {
            return Err(StoreError::already_exists(rule_path(project, policy, priority)));
        }

        let mut rule = rule.clone();
        rule.kind = Some(RULE_KIND.to_string());
        rules.push(rule);
        rules.sort_by_key(|r| r.priority.unwrap_or(i32::MAX));
        bump_fingerprint(stored);
        Ok(())
    }

    async fn update_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
        rule: &Rule,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::UpdateRule).await?;
        let mut inner = self.lock();
        let stored = inner.policy_mut(project, policy)?;
        let rules = stored.rules.get_or_insert_with(Vec::new);

        let idx = rules
            .iter()
            .position(|r| r.priority == Some(priority))
            .ok_or_else(|| StoreError::not_found(rule_path(project, policy, priority)))?;

        let target = rule.priority.unwrap_or(priority);
        if target != priority && rules.iter().any(|r| r.priority == Some(target)) {
            return Err(StoreError::already_exists(rule_path(project, policy, target)));
        }

        let mut rule = rule.clone();
        rule.priority = Some(target);
        rule.kind = Some(RULE_KIND.to_string());
        rules[idx] = rule;
        rules.sort_by_key(|r| r.priority.unwrap_or(i32::MAX));
        bump_fingerprint(stored);
        Ok(())
    }

    async fn remove_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::RemoveRule).await?;
        let mut inner = self.lock();
        let stored = inner.policy_mut(project, policy)?;
        let rules = stored.rules.get_or_insert_with(Vec::new);
        let before = rules.len();
        rules.retain(|r| r.priority != Some(priority));
        if rules.len() == before {
            return Err(StoreError::not_found(rule_path(project, policy, priority)));
        }
        bump_fingerprint(stored);
        Ok(())
    }

    async fn list_preconfigured_expression_sets(
        &self,
        _project: &str,
    ) -> Result<Vec<WafExpressionSet>, StoreError> {
        self.enter(StoreOp::ListPreconfigured).await?;
        Ok(self.lock().expression_sets.clone())
    }

    async fn list_backend_services(
        &self,
        project: &str,
    ) -> Result<Vec<BackendService>, StoreError> {
        self.enter(StoreOp::ListBackendServices).await?;
        let inner = self.lock();
        Ok(inner
            .backends
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn set_backend_security_policy(
        &self,
        project: &str,
        backend: &str,
        policy_link: &str,
    ) -> Result<(), StoreError> {
        self.enter(StoreOp::SetBackendSecurityPolicy).await?;
        let mut inner = self.lock();
        let known = inner
            .policies
            .iter()
            .any(|((p, _), pol)| p == project && pol.self_link.as_deref() == Some(policy_link));
        if !known {
            return Err(StoreError::api(
                400,
                format!("Invalid value for field 'resource.securityPolicy': '{policy_link}'"),
            ));
        }

        let svc = inner
            .backends
            .get_mut(&(project.to_string(), backend.to_string()))
            .ok_or_else(|| {
                StoreError::not_found(format!("projects/{project}/global/backendServices/{backend}"))
            })?;
        svc.security_policy = Some(policy_link.to_string());
        Ok(())
    }
}

fn policy_path(project: &str, policy: &str) -> String {
    format!("projects/{project}/global/securityPolicies/{policy}")
}

fn rule_path(project: &str, policy: &str, priority: i32) -> String {
    format!("{}/rules/{priority}", policy_path(project, policy))
}

fn rules_of(policy: &Policy) -> &[Rule] {
    policy.rules.as_deref().unwrap_or_default()
}

fn fingerprint(id: u64, revision: u64) -> String {
    format!("{:016x}", id.rotate_left(17) ^ revision)
}

fn bump_fingerprint(policy: &mut Policy) {
    let id = policy.id.unwrap_or_default();
    let revision = policy
        .fingerprint
        .as_deref()
        .and_then(|f| u64::from_str_radix(f, 16).ok())
        .map(|f| (f ^ id.rotate_left(17)).wrapping_add(1))
        .unwrap_or(1);
    policy.fingerprint = Some(fingerprint(id, revision));
}

fn check_rules(rules: &[Rule]) -> Result<(), StoreError> {
    let mut seen = std::collections::BTreeSet::new();
    for r in rules {
        let p = r
            .priority
            .ok_or_else(|| StoreError::api(400, "Required field 'priority' not specified"))?;
        if !seen.insert(p) {
            return Err(StoreError::api(
                400,
                format!("Cannot have rules with the same priorities: {p}"),
            ));
        }
    }
    Ok(())
}

/// The provider installs an allow-all rule when a policy is created empty.
fn provider_default_rule() -> Rule {
    let mut rule = armor_reconcile::default_rule("allow");
    rule.description = Some("default rule".to_string());
    rule.preview = Some(false);
    rule
}

fn builtin_expression_sets() -> Vec<WafExpressionSet> {
    let mut out = Vec::new();
    for family in ["sqli", "xss", "lfi", "rfi", "rce", "scannerdetection", "protocolattack"] {
        for variant in ["stable", "canary", "v33-stable", "v33-canary"] {
            let id = format!("{family}-{variant}");
            out.push(WafExpressionSet {
                id: Some(id.clone()),
                aliases: Some(vec![format!("owasp-crs-{id}")]),
                expressions: Some(vec![WafExpression {
                    id: Some(format!("owasp-crs-{family}-id942100")),
                    sensitivity: Some(1),
                }]),
            });
        }
    }
    out
}
