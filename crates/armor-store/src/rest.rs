//! [`PolicyStore`] backed by the provider's compute v1 REST API.
//!
//! Mutations return a long-running operation; the store polls the operation's
//! `wait` endpoint until it reports `DONE` and surfaces the operation's own
//! error status, so callers observe the final outcome of the mutation.

use std::collections::BTreeSet;
use std::time::Duration;

use armor_schemas::{BackendService, Policy, Rule, WafExpressionSet};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{PolicyStore, StoreError};

pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Provider-backed store.
///
/// The bearer token is resolved by the caller and passed in; do not log it.
#[derive(Clone)]
pub struct RestPolicyStore {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
}

impl std::fmt::Debug for RestPolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestPolicyStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RestPolicyStore {
    pub fn new(token: Option<String>) -> Self {
        Self::new_with_base_url(token, DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(token: Option<String>, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn global_url(&self, project: &str, tail: &str) -> String {
        format!(
            "{}/projects/{}/global/{}",
            self.base_url.trim_end_matches('/'),
            project,
            tail
        )
    }

    fn policy_url(&self, project: &str, policy: &str, tail: &str) -> String {
        let base = self.global_url(project, &format!("securityPolicies/{policy}"));
        if tail.is_empty() {
            base
        } else {
            format!("{base}/{tail}")
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let rb = self.http.request(method, url);
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
    ) -> Result<T, StoreError> {
        let resp = rb
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Follow every `nextPageToken` and concatenate the pages' `items`.
    async fn list_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen = BTreeSet::new();

        loop {
            let mut rb = self.request(Method::GET, url);
            if let Some(t) = page_token.as_deref() {
                rb = rb.query(&[("pageToken", t)]);
            }
            let page: ListPage<T> = self.send_json(rb).await?;
            out.extend(page.items.unwrap_or_default());

            match page.next_page_token {
                Some(t) if t.is_empty() => break,
                Some(t) => {
                    if !seen.insert(t.clone()) {
                        return Err(StoreError::Decode(format!("page token repeated: {t}")));
                    }
                    page_token = Some(t);
                }
                None => break,
            }
        }

        Ok(out)
    }

    /// Issue a mutation and block until its operation completes.
    async fn mutate(
        &self,
        project: &str,
        rb: reqwest::RequestBuilder,
    ) -> Result<(), StoreError> {
        let mut op: Operation = self.send_json(rb).await?;
        let mut waited = false;

        loop {
            if op.is_done() {
                return op.into_result();
            }
            let name = op
                .name
                .clone()
                .ok_or_else(|| StoreError::Decode("pending operation has no name".to_string()))?;

            tracing::debug!(operation = %name, status = ?op.status, "waiting for operation");
            // wait blocks server-side; back off only when it returns early
            if waited {
                tokio::time::sleep(self.poll_interval).await;
            }

            let url = self.global_url(project, &format!("operations/{name}/wait"));
            op = self.send_json(self.request(Method::POST, &url)).await?;
            waited = true;
        }
    }
}

#[async_trait::async_trait]
impl PolicyStore for RestPolicyStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn list_policies(&self, project: &str) -> Result<Vec<Policy>, StoreError> {
        self.list_all(&self.global_url(project, "securityPolicies"))
            .await
    }

    async fn get_policy(&self, project: &str, policy: &str) -> Result<Policy, StoreError> {
        let url = self.policy_url(project, policy, "");
        self.send_json(self.request(Method::GET, &url)).await
    }

    async fn create_policy(&self, project: &str, policy: &Policy) -> Result<(), StoreError> {
        let url = self.global_url(project, "securityPolicies");
        self.mutate(project, self.request(Method::POST, &url).json(policy))
            .await
    }

    async fn update_policy(
        &self,
        project: &str,
        policy: &str,
        resource: &Policy,
    ) -> Result<(), StoreError> {
        let url = self.policy_url(project, policy, "");
        self.mutate(project, self.request(Method::PATCH, &url).json(resource))
            .await
    }

    async fn delete_policy(&self, project: &str, policy: &str) -> Result<(), StoreError> {
        let url = self.policy_url(project, policy, "");
        self.mutate(project, self.request(Method::DELETE, &url))
            .await
    }

    async fn get_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
    ) -> Result<Rule, StoreError> {
        let url = self.policy_url(project, policy, "getRule");
        let rb = self
            .request(Method::GET, &url)
            .query(&[("priority", priority)]);
        self.send_json(rb).await
    }

    async fn add_rule(&self, project: &str, policy: &str, rule: &Rule) -> Result<(), StoreError> {
        let url = self.policy_url(project, policy, "addRule");
        self.mutate(project, self.request(Method::POST, &url).json(rule))
            .await
    }

    async fn update_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
        rule: &Rule,
    ) -> Result<(), StoreError> {
        let url = self.policy_url(project, policy, "patchRule");
        let rb = self
            .request(Method::POST, &url)
            .query(&[("priority", priority)])
            .json(rule);
        self.mutate(project, rb).await
    }

    async fn remove_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
    ) -> Result<(), StoreError> {
        let url = self.policy_url(project, policy, "removeRule");
        let rb = self
            .request(Method::POST, &url)
            .query(&[("priority", priority)]);
        self.mutate(project, rb).await
    }

    async fn list_preconfigured_expression_sets(
        &self,
        project: &str,
    ) -> Result<Vec<WafExpressionSet>, StoreError> {
        let url = self.global_url(project, "securityPolicies/listPreconfiguredExpressionSets");
        let resp: PreconfiguredResponse = self.send_json(self.request(Method::GET, &url)).await?;
        Ok(resp
            .preconfigured_expression_sets
            .and_then(|p| p.waf_rules)
            .and_then(|w| w.expression_sets)
            .unwrap_or_default())
    }

    async fn list_backend_services(
        &self,
        project: &str,
    ) -> Result<Vec<BackendService>, StoreError> {
        self.list_all(&self.global_url(project, "backendServices"))
            .await
    }

    async fn set_backend_security_policy(
        &self,
        project: &str,
        backend: &str,
        policy_link: &str,
    ) -> Result<(), StoreError> {
        let url = self.global_url(
            project,
            &format!("backendServices/{backend}/setSecurityPolicy"),
        );
        let body = SecurityPolicyReference {
            security_policy: policy_link.to_string(),
        };
        self.mutate(project, self.request(Method::POST, &url).json(&body))
            .await
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    items: Option<Vec<T>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreconfiguredResponse {
    preconfigured_expression_sets: Option<PreconfiguredSets>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreconfiguredSets {
    waf_rules: Option<WafRules>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WafRules {
    expression_sets: Option<Vec<WafExpressionSet>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityPolicyReference {
    security_policy: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: Option<String>,
    status: Option<String>,
    error: Option<OperationErrors>,
    http_error_status_code: Option<u16>,
    http_error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    code: Option<String>,
    message: Option<String>,
}

impl Operation {
    fn is_done(&self) -> bool {
        self.status.as_deref() == Some("DONE")
    }

    fn into_result(self) -> Result<(), StoreError> {
        let Some(err) = self.error else {
            return Ok(());
        };

        let mut parts: Vec<String> = err
            .errors
            .into_iter()
            .filter_map(|e| match (e.code, e.message) {
                (Some(c), Some(m)) => Some(format!("{c}: {m}")),
                (_, Some(m)) => Some(m),
                (Some(c), None) => Some(c),
                (None, None) => None,
            })
            .collect();
        if parts.is_empty() {
            parts.push(
                self.http_error_message
                    .unwrap_or_else(|| "operation failed".to_string()),
            );
        }

        Err(StoreError::Operation {
            status: self.http_error_status_code,
            message: parts.join("; "),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Extract the provider's message from its error envelope, falling back to the raw body.
fn api_error(status: u16, body: &str) -> StoreError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| {
            let t = body.trim();
            if t.is_empty() {
                "unknown".to_string()
            } else {
                t.to_string()
            }
        });
    StoreError::api(status, message)
}

// -----------------
// Tests (no network)
// -----------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_reads_envelope() {
        let body = r#"{"error":{"code":404,"message":"The resource 'x' was not found","errors":[]}}"#;
        assert_eq!(
            api_error(404, body),
            StoreError::api(404, "The resource 'x' was not found")
        );
    }

    #[test]
    fn api_error_falls_back_to_raw_body() {
        assert_eq!(api_error(502, "bad gateway"), StoreError::api(502, "bad gateway"));
        assert_eq!(api_error(500, "  "), StoreError::api(500, "unknown"));
    }

    #[test]
    fn finished_operation_with_error_carries_http_status() {
        let op: Operation = serde_json::from_value(serde_json::json!({
            "name": "operation-1",
            "status": "DONE",
            "httpErrorStatusCode": 400,
            "httpErrorMessage": "BAD REQUEST",
            "error": {"errors": [{"code": "INVALID_USAGE", "message": "bad match"}]}
        }))
        .unwrap();
        assert!(op.is_done());
        assert_eq!(
            op.into_result(),
            Err(StoreError::Operation {
                status: Some(400),
                message: "INVALID_USAGE: bad match".to_string()
            })
        );
    }

    #[test]
    fn urls_are_rooted_at_project_global() {
        let store = RestPolicyStore::new_with_base_url(None, "http://h/compute/v1/".to_string());
        assert_eq!(
            store.policy_url("p1", "pol-a", "addRule"),
            "http://h/compute/v1/projects/p1/global/securityPolicies/pol-a/addRule"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let store = RestPolicyStore::new(Some("ya29.secret".to_string()));
        let s = format!("{store:?}");
        assert!(!s.contains("ya29"));
        assert!(s.contains("<REDACTED>"));
    }
}
