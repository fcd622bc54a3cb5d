//! Shared runtime state for armor-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything in here is
//! read-only after startup.

use std::sync::Arc;
use std::time::Duration;

use armor_config::ArmorConfig;
use armor_reconcile::ProtectedRuleSet;
use armor_store::PolicyStore;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::Orchestrator;

/// Static build metadata.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "armor-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    pub orchestrator: Orchestrator,
    /// Cancelled on SIGINT/SIGTERM; aborts in-flight provider calls.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        protected: ProtectedRuleSet,
        request_timeout: Duration,
    ) -> Self {
        Self::with_shutdown(store, protected, request_timeout, CancellationToken::new())
    }

    pub fn with_shutdown(
        store: Arc<dyn PolicyStore>,
        protected: ProtectedRuleSet,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            build: BuildInfo::default(),
            orchestrator: Orchestrator::new(store, protected, request_timeout, shutdown.clone()),
            shutdown,
        }
    }

    pub fn from_config(
        cfg: &ArmorConfig,
        store: Arc<dyn PolicyStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_shutdown(
            store,
            ProtectedRuleSet::new(cfg.protected_rules.iter().map(|p| p.to_string())),
            Duration::from_secs(cfg.request_timeout_secs),
            shutdown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armor_store::MemoryPolicyStore;

    #[test]
    fn state_carries_build_metadata() {
        let st = AppState::new(
            Arc::new(MemoryPolicyStore::new()),
            ProtectedRuleSet::default(),
            Duration::from_secs(1),
        );
        assert_eq!(st.build.service, "armor-daemon");
        assert_eq!(st.build.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(st.orchestrator.store_name(), "memory");
    }
}
