/// Which resource a request was acting on. Used in caller-facing messages and
/// in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Policy,
    Rule,
    PreconfiguredRules,
    BackendService,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Policy => "policy",
            ResourceKind::Rule => "rule",
            ResourceKind::PreconfiguredRules => "preconfigured rules",
            ResourceKind::BackendService => "backend service",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified outcome of a failed request.
///
/// The transport maps each variant to a status code with
/// [`ArmorError::http_status`]. Only upstream-class failures are worth
/// retrying; everything else is the caller's to fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmorError {
    /// Malformed identifier, unparsable or contradictory payload, merge failure.
    Validation(String),
    /// Mutation of an administratively protected rule priority.
    Protected(String),
    /// The remote resource does not exist. Carries no body.
    NotFound,
    /// The remote resource already exists.
    Conflict(String),
    /// Provider or transport fault. Message is generic on purpose.
    Upstream(String),
    /// The request was cancelled or ran past its deadline before the
    /// provider answered. Upstream-class.
    Cancelled(String),
}

impl ArmorError {
    pub fn http_status(&self) -> u16 {
        match self {
            ArmorError::Validation(_) | ArmorError::Protected(_) => 400,
            ArmorError::NotFound => 404,
            ArmorError::Conflict(_) => 409,
            ArmorError::Upstream(_) => 502,
            ArmorError::Cancelled(_) => 503,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ArmorError::Upstream(_) | ArmorError::Cancelled(_))
    }

    /// Message safe to return to the caller. `None` means an empty body.
    pub fn message(&self) -> Option<&str> {
        match self {
            ArmorError::Validation(m)
            | ArmorError::Protected(m)
            | ArmorError::Conflict(m)
            | ArmorError::Upstream(m)
            | ArmorError::Cancelled(m) => Some(m),
            ArmorError::NotFound => None,
        }
    }
}

impl std::fmt::Display for ArmorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArmorError::Validation(m) => write!(f, "validation error: {m}"),
            ArmorError::Protected(m) => write!(f, "protected resource: {m}"),
            ArmorError::NotFound => write!(f, "not found"),
            ArmorError::Conflict(m) => write!(f, "conflict: {m}"),
            ArmorError::Upstream(m) => write!(f, "upstream error: {m}"),
            ArmorError::Cancelled(m) => write!(f, "cancelled: {m}"),
        }
    }
}

impl std::error::Error for ArmorError {}
