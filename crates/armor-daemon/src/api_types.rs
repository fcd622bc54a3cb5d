//! Request and response types for armor-daemon HTTP endpoints that are not
//! provider resources themselves (those live in `armor-schemas`).
//!
//! No business logic lives here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

/// JSON error body. `status` mirrors the HTTP status line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    #[serde(rename = "error-message")]
    pub error_message: String,
}

// ---------------------------------------------------------------------------
// GET /projects/:project/preConfiguredRules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreconfiguredQuery {
    #[serde(rename = "rule-type", default)]
    pub rule_type: String,
    #[serde(default)]
    pub version: String,
}

// ---------------------------------------------------------------------------
// POST /projects/:project/policies/:policy/backendServices/:backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAttachment {
    pub backend_service: String,
    /// Self link of the attached policy.
    pub security_policy: String,
}
