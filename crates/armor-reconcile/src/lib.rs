//! armor-reconcile
//!
//! Reconciliation core for security-policy requests.
//!
//! Architectural decisions:
//! - Path tokens are validated before anything else touches them
//! - Rule payloads are checked for structural and conditional invariants
//! - Protected priorities are refused on create, update and delete alike
//! - A policy created without rules gets exactly one synthesized catch-all rule
//! - Partial updates are merged field by field onto a fresh remote snapshot;
//!   the caller's explicit fields always win, rules never travel this path
//! - Provider failures collapse into a small, stable taxonomy
//!
//! Deterministic, pure logic. No IO. No provider calls.

mod classify;
mod defaults;
mod error;
mod guard;
mod identifier;
mod merge;
mod preconfigured;
mod validate;

pub use classify::{classify, UpstreamStatus};
pub use defaults::{default_rule, DEFAULT_RULE_DESCRIPTION};
pub use error::{ArmorError, ResourceKind};
pub use guard::{ProtectedRuleSet, DEFAULT_PROTECTED_PRIORITIES};
pub use identifier::{is_valid_identifier, parse_priority, validate_identifiers, InvalidIdentifier};
pub use merge::{json_type, merge_policy, merge_rule, MergeError};
pub use preconfigured::filter_expression_sets;
pub use validate::{validate_rule, RuleViolation};
