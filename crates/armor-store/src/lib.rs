//! armor-store
//!
//! The `PolicyStore` boundary: everything the reconciliation core needs from
//! the provider's policy service, plus two implementations.
//!
//! - [`MemoryPolicyStore`]: in-process store used by tests and development mode.
//! - [`RestPolicyStore`]: the provider's compute v1 REST API.
//!
//! Long-running provider operations are awaited inside the store; callers see
//! one blocking call per mutation.

mod error;
mod memory;
mod rest;

pub use error::StoreError;
pub use memory::{MemoryPolicyStore, StoreOp};
pub use rest::{RestPolicyStore, DEFAULT_BASE_URL};

use armor_schemas::{BackendService, Policy, Rule, WafExpressionSet};

/// Remote policy/rule persistence and enforcement service.
///
/// Implementations must be `Send + Sync`; the daemon shares one instance
/// across all in-flight requests behind an `Arc<dyn PolicyStore>`.
#[async_trait::async_trait]
pub trait PolicyStore: Send + Sync {
    /// Human-readable name used in logs (e.g. `"memory"`, `"rest"`).
    fn name(&self) -> &'static str;

    async fn list_policies(&self, project: &str) -> Result<Vec<Policy>, StoreError>;

    async fn get_policy(&self, project: &str, policy: &str) -> Result<Policy, StoreError>;

    async fn create_policy(&self, project: &str, policy: &Policy) -> Result<(), StoreError>;

    async fn update_policy(
        &self,
        project: &str,
        policy: &str,
        resource: &Policy,
    ) -> Result<(), StoreError>;

    async fn delete_policy(&self, project: &str, policy: &str) -> Result<(), StoreError>;

    async fn get_rule(&self, project: &str, policy: &str, priority: i32)
        -> Result<Rule, StoreError>;

    async fn add_rule(&self, project: &str, policy: &str, rule: &Rule) -> Result<(), StoreError>;

    /// Patch the rule currently at `priority` with `rule`.
    async fn update_rule(
        &self,
        project: &str,
        policy: &str,
        priority: i32,
        rule: &Rule,
    ) -> Result<(), StoreError>;

    async fn remove_rule(&self, project: &str, policy: &str, priority: i32)
        -> Result<(), StoreError>;

    async fn list_preconfigured_expression_sets(
        &self,
        project: &str,
    ) -> Result<Vec<WafExpressionSet>, StoreError>;

    async fn list_backend_services(&self, project: &str)
        -> Result<Vec<BackendService>, StoreError>;

    /// Attach the policy identified by `policy_link` (its self link) to `backend`.
    async fn set_backend_security_policy(
        &self,
        project: &str,
        backend: &str,
        policy_link: &str,
    ) -> Result<(), StoreError>;
}
