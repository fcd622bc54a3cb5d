use crate::{ArmorError, ResourceKind};

/// Access to the HTTP status a provider failure carries, if any.
///
/// Transport-level failures (connect, TLS, decode) have none.
pub trait UpstreamStatus {
    fn status(&self) -> Option<u16>;
}

/// Map a provider failure onto the caller-facing taxonomy.
///
/// Raw provider text is echoed only for 400s; 404 and 409 use fixed wording
/// and everything else gets a generic message. Logging is the caller's job.
pub fn classify<E>(err: &E, kind: ResourceKind, scope: &str) -> ArmorError
where
    E: UpstreamStatus + std::fmt::Display + ?Sized,
{
    match err.status() {
        Some(404) => ArmorError::NotFound,
        Some(400) => ArmorError::Validation(format!("{kind} resource {scope}: {err}")),
        Some(409) => ArmorError::Conflict(format!("{kind} exists in {scope}")),
        _ => ArmorError::Upstream(format!("{kind} request failed for {scope}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        status: Option<u16>,
        text: &'static str,
    }

    impl std::fmt::Display for Fake {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.text)
        }
    }

    impl UpstreamStatus for Fake {
        fn status(&self) -> Option<u16> {
            self.status
        }
    }

    fn fake(status: Option<u16>) -> Fake {
        Fake {
            status,
            text: "Invalid value for field 'resource.rules[0].match'",
        }
    }

    #[test]
    fn not_found_has_no_body() {
        let out = classify(&fake(Some(404)), ResourceKind::Policy, "p1");
        assert_eq!(out, ArmorError::NotFound);
        assert_eq!(out.message(), None);
    }

    #[test]
    fn bad_request_echoes_kind_scope_and_provider_text() {
        let out = classify(&fake(Some(400)), ResourceKind::Rule, "p1");
        assert_eq!(
            out,
            ArmorError::Validation(
                "rule resource p1: Invalid value for field 'resource.rules[0].match'".to_string()
            )
        );
        assert!(!out.is_retryable());
    }

    #[test]
    fn conflict_uses_fixed_wording() {
        let out = classify(&fake(Some(409)), ResourceKind::Policy, "p1");
        assert_eq!(out, ArmorError::Conflict("policy exists in p1".to_string()));
        assert!(!out.message().unwrap().contains("Invalid value"));
    }

    #[test]
    fn everything_else_is_upstream_and_generic() {
        for status in [None, Some(401), Some(403), Some(429), Some(500), Some(503)] {
            let out = classify(&fake(status), ResourceKind::BackendService, "p1");
            assert!(matches!(out, ArmorError::Upstream(_)), "status {status:?}");
            assert!(out.is_retryable());
            assert!(!out.message().unwrap().contains("Invalid value"));
        }
    }
}
