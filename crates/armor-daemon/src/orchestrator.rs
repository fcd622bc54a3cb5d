//! Per-request reconciliation pipeline.
//!
//! Every operation walks `Received -> Validated -> (Fetched) ->
//! (Merged | Synthesized) -> (Guarded) -> Persisted -> Responded`; any step may
//! fall into `Error`, which is terminal. Nothing is kept between requests.
//!
//! Store calls are the only suspension points. Each one is bounded by the
//! request deadline and the process shutdown token; an abandoned call ends the
//! request with [`ArmorError::Cancelled`] and no later step runs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use armor_reconcile::{
    classify, default_rule, filter_expression_sets, json_type, merge_policy, merge_rule,
    parse_priority, validate_identifiers, validate_rule, ArmorError, ProtectedRuleSet,
    ResourceKind,
};
use armor_schemas::{BackendService, Policy, PolicyRequest, Rule, RuleRequest, WafExpressionSet};
use armor_store::{PolicyStore, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::api_types::BackendAttachment;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Fetched,
    Merged,
    Synthesized,
    Guarded,
    Persisted,
    Responded,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Fetched => "fetched",
            Stage::Merged => "merged",
            Stage::Synthesized => "synthesized",
            Stage::Guarded => "guarded",
            Stage::Persisted => "persisted",
            Stage::Responded => "responded",
            Stage::Error => "error",
        }
    }
}

/// One request/response exchange.
#[derive(Debug)]
pub struct Exchange {
    pub request_id: Uuid,
    pub op: &'static str,
    stage: Stage,
    deadline: Instant,
}

impl Exchange {
    fn new(op: &'static str, timeout: Duration) -> Self {
        let ex = Self {
            request_id: Uuid::new_v4(),
            op,
            stage: Stage::Received,
            deadline: Instant::now() + timeout,
        };
        debug!(request_id = %ex.request_id, op, stage = ex.stage.as_str(), "exchange");
        ex
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn advance(&mut self, next: Stage) {
        debug!(
            request_id = %self.request_id,
            op = self.op,
            from = self.stage.as_str(),
            to = next.as_str(),
            "stage"
        );
        self.stage = next;
    }

    fn finish<T>(mut self, out: Result<T, ArmorError>) -> Result<T, ArmorError> {
        match &out {
            Ok(_) => self.advance(Stage::Responded),
            Err(e) => {
                self.advance(Stage::Error);
                debug!(
                    request_id = %self.request_id,
                    op = self.op,
                    status = e.http_status(),
                    error = %e,
                    "exchange failed"
                );
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn PolicyStore>,
    protected: ProtectedRuleSet,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        protected: ProtectedRuleSet,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            protected,
            request_timeout,
            shutdown,
        }
    }

    pub fn protected(&self) -> &ProtectedRuleSet {
        &self.protected
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn exchange(&self, op: &'static str) -> Exchange {
        Exchange::new(op, self.request_timeout)
    }

    /// Run one store call inside the exchange's cancellation scope.
    async fn bounded<T, F>(
        &self,
        ex: &Exchange,
        kind: ResourceKind,
        scope: &str,
        call: F,
    ) -> Result<T, ArmorError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err("service shutting down"),
            r = tokio::time::timeout_at(ex.deadline, call) => r.map_err(|_| "deadline exceeded"),
        };

        match outcome {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(err)) => Err(self.classified(ex, &err, kind, scope)),
            Err(reason) => {
                warn!(
                    request_id = %ex.request_id,
                    op = ex.op,
                    kind = %kind,
                    scope,
                    reason,
                    "provider call abandoned"
                );
                Err(ArmorError::Cancelled(format!(
                    "{kind} request for {scope} cancelled: {reason}"
                )))
            }
        }
    }

    fn classified(
        &self,
        ex: &Exchange,
        err: &StoreError,
        kind: ResourceKind,
        scope: &str,
    ) -> ArmorError {
        let out = classify(err, kind, scope);
        match &out {
            ArmorError::NotFound => {
                debug!(request_id = %ex.request_id, op = ex.op, kind = %kind, scope, "not found");
            }
            ArmorError::Validation(_) | ArmorError::Conflict(_) => {
                warn!(
                    request_id = %ex.request_id,
                    op = ex.op,
                    kind = %kind,
                    scope,
                    error = %err,
                    "provider rejected request"
                );
            }
            _ => {
                error!(
                    request_id = %ex.request_id,
                    op = ex.op,
                    kind = %kind,
                    scope,
                    error = %err,
                    "provider request failed"
                );
            }
        }
        out
    }

    fn guard(&self, ex: &mut Exchange, action: &str, priority: i32) -> Result<(), ArmorError> {
        if let Err(e) = self.protected.check(action, priority) {
            warn!(
                request_id = %ex.request_id,
                op = ex.op,
                priority,
                "refused mutation of protected rule"
            );
            return Err(e);
        }
        ex.advance(Stage::Guarded);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Policies
    // -----------------------------------------------------------------------

    pub async fn list_policies(&self, project: &str) -> Result<Vec<Policy>, ArmorError> {
        let mut ex = self.exchange("list_policies");
        let out = self.list_policies_steps(&mut ex, project).await;
        ex.finish(out)
    }

    async fn list_policies_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
    ) -> Result<Vec<Policy>, ArmorError> {
        validate_identifiers(&[project])?;
        ex.advance(Stage::Validated);

        let policies = self
            .bounded(ex, ResourceKind::Policy, project, self.store.list_policies(project))
            .await?;
        ex.advance(Stage::Fetched);
        Ok(policies)
    }

    pub async fn get_policy(&self, project: &str, policy: &str) -> Result<Policy, ArmorError> {
        let mut ex = self.exchange("get_policy");
        let out = self.get_policy_steps(&mut ex, project, policy).await;
        ex.finish(out)
    }

    async fn get_policy_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
    ) -> Result<Policy, ArmorError> {
        validate_identifiers(&[project, policy])?;
        ex.advance(Stage::Validated);

        let found = self
            .bounded(
                ex,
                ResourceKind::Policy,
                project,
                self.store.get_policy(project, policy),
            )
            .await?;
        ex.advance(Stage::Fetched);
        Ok(found)
    }

    /// Create a policy. A policy without rules (absent or empty) gets exactly
    /// one synthesized catch-all rule.
    pub async fn create_policy(
        &self,
        project: &str,
        req: PolicyRequest,
    ) -> Result<Policy, ArmorError> {
        let mut ex = self.exchange("create_policy");
        let out = self.create_policy_steps(&mut ex, project, req).await;
        ex.finish(out)
    }

    async fn create_policy_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        req: PolicyRequest,
    ) -> Result<Policy, ArmorError> {
        validate_identifiers(&[project])?;
        let mut policy: Policy = decode_required(req.policy, "policy")?;

        let name = policy.name.clone().unwrap_or_default();
        if name.is_empty() {
            return Err(ArmorError::Validation("policy name is required".to_string()));
        }
        validate_identifiers(&[name.as_str()])?;
        for rule in policy.rules.iter().flatten() {
            validate_rule(rule)?;
        }
        ex.advance(Stage::Validated);

        if policy.rules.as_ref().map_or(true, Vec::is_empty) {
            policy.rules = Some(vec![default_rule(&req.default_rule_action)]);
            ex.advance(Stage::Synthesized);
        }

        self.bounded(
            ex,
            ResourceKind::Policy,
            project,
            self.store.create_policy(project, &policy),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(policy)
    }

    /// Merge a partial policy onto the current remote snapshot and persist it.
    /// Rules never travel this path.
    pub async fn update_policy(
        &self,
        project: &str,
        policy: &str,
        req: PolicyRequest,
    ) -> Result<Policy, ArmorError> {
        let mut ex = self.exchange("update_policy");
        let out = self.update_policy_steps(&mut ex, project, policy, req).await;
        ex.finish(out)
    }

    async fn update_policy_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        req: PolicyRequest,
    ) -> Result<Policy, ArmorError> {
        validate_identifiers(&[project, policy])?;
        let partial = required(req.policy, "policy")?;
        ex.advance(Stage::Validated);

        let snapshot = self
            .bounded(
                ex,
                ResourceKind::Policy,
                project,
                self.store.get_policy(project, policy),
            )
            .await?;
        ex.advance(Stage::Fetched);

        let merged = merge_policy(&partial, snapshot)?;
        ex.advance(Stage::Merged);

        self.bounded(
            ex,
            ResourceKind::Policy,
            project,
            self.store.update_policy(project, policy, &merged),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(merged)
    }

    pub async fn delete_policy(&self, project: &str, policy: &str) -> Result<(), ArmorError> {
        let mut ex = self.exchange("delete_policy");
        let out = self.delete_policy_steps(&mut ex, project, policy).await;
        ex.finish(out)
    }

    async fn delete_policy_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
    ) -> Result<(), ArmorError> {
        validate_identifiers(&[project, policy])?;
        ex.advance(Stage::Validated);

        self.bounded(
            ex,
            ResourceKind::Policy,
            project,
            self.store.delete_policy(project, policy),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    pub async fn get_rule(
        &self,
        project: &str,
        policy: &str,
        priority: &str,
    ) -> Result<Rule, ArmorError> {
        let mut ex = self.exchange("get_rule");
        let out = self.get_rule_steps(&mut ex, project, policy, priority).await;
        ex.finish(out)
    }

    async fn get_rule_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        priority: &str,
    ) -> Result<Rule, ArmorError> {
        validate_identifiers(&[project, policy, priority])?;
        let priority = parse_priority(priority)?;
        ex.advance(Stage::Validated);

        let scope = rule_scope(project, policy);
        let rule = self
            .bounded(
                ex,
                ResourceKind::Rule,
                &scope,
                self.store.get_rule(project, policy, priority),
            )
            .await?;
        ex.advance(Stage::Fetched);
        Ok(rule)
    }

    pub async fn create_rule(
        &self,
        project: &str,
        policy: &str,
        req: RuleRequest,
    ) -> Result<Rule, ArmorError> {
        let mut ex = self.exchange("create_rule");
        let out = self.create_rule_steps(&mut ex, project, policy, req).await;
        ex.finish(out)
    }

    async fn create_rule_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        req: RuleRequest,
    ) -> Result<Rule, ArmorError> {
        validate_identifiers(&[project, policy])?;
        let rule: Rule = decode_required(req.rule, "rule")?;
        validate_rule(&rule)?;
        ex.advance(Stage::Validated);

        // validate_rule guarantees a priority
        let priority = rule.priority.unwrap_or_default();
        self.guard(ex, "create", priority)?;

        let scope = rule_scope(project, policy);
        self.bounded(
            ex,
            ResourceKind::Rule,
            &scope,
            self.store.add_rule(project, policy, &rule),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(rule)
    }

    /// Merge a partial rule onto the rule currently at `priority`.
    ///
    /// The path priority is guarded before anything is fetched; the merged
    /// priority is guarded again so a rule cannot be moved onto a protected slot.
    pub async fn update_rule(
        &self,
        project: &str,
        policy: &str,
        priority: &str,
        req: RuleRequest,
    ) -> Result<Rule, ArmorError> {
        let mut ex = self.exchange("update_rule");
        let out = self
            .update_rule_steps(&mut ex, project, policy, priority, req)
            .await;
        ex.finish(out)
    }

    async fn update_rule_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        priority: &str,
        req: RuleRequest,
    ) -> Result<Rule, ArmorError> {
        validate_identifiers(&[project, policy, priority])?;
        let priority = parse_priority(priority)?;
        let partial = required(req.rule, "rule")?;
        ex.advance(Stage::Validated);

        self.guard(ex, "update", priority)?;

        let scope = rule_scope(project, policy);
        let snapshot = self
            .bounded(
                ex,
                ResourceKind::Rule,
                &scope,
                self.store.get_rule(project, policy, priority),
            )
            .await?;
        ex.advance(Stage::Fetched);

        let merged = merge_rule(&partial, snapshot)?;
        ex.advance(Stage::Merged);

        if let Some(target) = merged.priority {
            self.guard(ex, "update", target)?;
        }
        validate_rule(&merged)?;

        self.bounded(
            ex,
            ResourceKind::Rule,
            &scope,
            self.store.update_rule(project, policy, priority, &merged),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(merged)
    }

    pub async fn delete_rule(
        &self,
        project: &str,
        policy: &str,
        priority: &str,
    ) -> Result<(), ArmorError> {
        let mut ex = self.exchange("delete_rule");
        let out = self
            .delete_rule_steps(&mut ex, project, policy, priority)
            .await;
        ex.finish(out)
    }

    async fn delete_rule_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        priority: &str,
    ) -> Result<(), ArmorError> {
        validate_identifiers(&[project, policy, priority])?;
        let priority = parse_priority(priority)?;
        ex.advance(Stage::Validated);

        self.guard(ex, "delete", priority)?;

        let scope = rule_scope(project, policy);
        self.bounded(
            ex,
            ResourceKind::Rule,
            &scope,
            self.store.remove_rule(project, policy, priority),
        )
        .await?;
        ex.advance(Stage::Persisted);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Preconfigured rules and backend services
    // -----------------------------------------------------------------------

    pub async fn list_preconfigured_rules(
        &self,
        project: &str,
        rule_type: &str,
        version: &str,
    ) -> Result<Vec<WafExpressionSet>, ArmorError> {
        let mut ex = self.exchange("list_preconfigured_rules");
        let out = self
            .list_preconfigured_steps(&mut ex, project, rule_type, version)
            .await;
        ex.finish(out)
    }

    async fn list_preconfigured_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        rule_type: &str,
        version: &str,
    ) -> Result<Vec<WafExpressionSet>, ArmorError> {
        validate_identifiers(&[project, rule_type, version])?;
        ex.advance(Stage::Validated);

        let sets = self
            .bounded(
                ex,
                ResourceKind::PreconfiguredRules,
                project,
                self.store.list_preconfigured_expression_sets(project),
            )
            .await?;
        ex.advance(Stage::Fetched);
        Ok(filter_expression_sets(sets, rule_type, version))
    }

    pub async fn list_backend_services(
        &self,
        project: &str,
    ) -> Result<Vec<BackendService>, ArmorError> {
        let mut ex = self.exchange("list_backend_services");
        let out = self.list_backend_services_steps(&mut ex, project).await;
        ex.finish(out)
    }

    async fn list_backend_services_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
    ) -> Result<Vec<BackendService>, ArmorError> {
        validate_identifiers(&[project])?;
        ex.advance(Stage::Validated);

        let services = self
            .bounded(
                ex,
                ResourceKind::BackendService,
                project,
                self.store.list_backend_services(project),
            )
            .await?;
        ex.advance(Stage::Fetched);
        Ok(services)
    }

    /// Point `backend` at `policy`, addressed by the policy's self link.
    pub async fn attach_backend(
        &self,
        project: &str,
        policy: &str,
        backend: &str,
    ) -> Result<BackendAttachment, ArmorError> {
        let mut ex = self.exchange("attach_backend");
        let out = self
            .attach_backend_steps(&mut ex, project, policy, backend)
            .await;
        ex.finish(out)
    }

    async fn attach_backend_steps(
        &self,
        ex: &mut Exchange,
        project: &str,
        policy: &str,
        backend: &str,
    ) -> Result<BackendAttachment, ArmorError> {
        validate_identifiers(&[project, policy, backend])?;
        ex.advance(Stage::Validated);

        let found = self
            .bounded(
                ex,
                ResourceKind::Policy,
                project,
                self.store.get_policy(project, policy),
            )
            .await?;
        ex.advance(Stage::Fetched);

        let link = found.self_link.filter(|l| !l.is_empty()).ok_or_else(|| {
            error!(request_id = %ex.request_id, project, policy, "policy has no self link");
            ArmorError::Upstream(format!("policy request failed for {project}"))
        })?;

        self.bounded(
            ex,
            ResourceKind::BackendService,
            project,
            self.store.set_backend_security_policy(project, backend, &link),
        )
        .await?;
        ex.advance(Stage::Persisted);

        Ok(BackendAttachment {
            backend_service: backend.to_string(),
            security_policy: link,
        })
    }
}

fn rule_scope(project: &str, policy: &str) -> String {
    format!("{project}/{policy}")
}

fn required(v: Option<Value>, what: &str) -> Result<Value, ArmorError> {
    match v {
        Some(Value::Null) | None => Err(ArmorError::Validation(format!("{what} is required"))),
        Some(v) => Ok(v),
    }
}

fn decode_required<T: DeserializeOwned>(v: Option<Value>, what: &str) -> Result<T, ArmorError> {
    let raw = required(v, what)?;
    if !raw.is_object() {
        return Err(ArmorError::Validation(format!(
            "parse {what}: expected an object, got {}",
            json_type(&raw)
        )));
    }
    serde_json::from_value(raw).map_err(|e| ArmorError::Validation(format!("parse {what}: {e}")))
}
