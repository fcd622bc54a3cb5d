//! Runtime secret resolution.
//!
//! Config stores the **name** of the env var that holds the provider bearer
//! token (`provider.token-env`). The value is read once at startup, passed to
//! the store constructor and never logged. Errors mention the name only.

use anyhow::{bail, Result};

use crate::ArmorConfig;

/// Secrets resolved from the environment. Values are redacted in `Debug`.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Provider bearer token. `None` if the named env var was absent or blank.
    pub provider_token: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "provider_token",
                &self.provider_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve secrets using `lookup` as the environment.
///
/// The token is required unless `development_mode` is on (the in-memory
/// store needs no credentials).
pub fn resolve_secrets_with<F>(cfg: &ArmorConfig, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let name = cfg.provider.token_env.as_str();
    let provider_token = lookup(name).filter(|v| !v.trim().is_empty());

    if provider_token.is_none() && !cfg.development_mode {
        bail!(
            "SECRETS_MISSING: required env var '{}' (provider bearer token) is not set or empty",
            name
        );
    }

    Ok(ResolvedSecrets { provider_token })
}

/// Resolve secrets from the process environment.
pub fn resolve_secrets(cfg: &ArmorConfig) -> Result<ResolvedSecrets> {
    resolve_secrets_with(cfg, |name| std::env::var(name).ok())
}
