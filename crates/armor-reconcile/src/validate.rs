use armor_schemas::Rule;

use crate::ArmorError;

/// First invariant a candidate rule broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    MissingAction,
    MissingPriority,
    MissingPreview,
    MissingMatch,
    MissingRateLimitOptions,
    MissingRedirectOptions,
    MissingMatchConfig,
}

impl std::fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleViolation::MissingAction => write!(f, "action is required"),
            RuleViolation::MissingPriority => write!(f, "priority is required"),
            RuleViolation::MissingPreview => write!(f, "preview is required"),
            RuleViolation::MissingMatch => write!(f, "match is required"),
            RuleViolation::MissingRateLimitOptions => write!(
                f,
                "rate limit options is required when rate_based_ban or throttle is used"
            ),
            RuleViolation::MissingRedirectOptions => {
                write!(f, "redirect options is required when redirect is used")
            }
            RuleViolation::MissingMatchConfig => write!(
                f,
                "match config is required when match versioned expr is used"
            ),
        }
    }
}

impl std::error::Error for RuleViolation {}

impl From<RuleViolation> for ArmorError {
    fn from(v: RuleViolation) -> Self {
        ArmorError::Validation(format!("validation of rule: {v}"))
    }
}

/// Check a candidate rule, stopping at the first broken invariant.
///
/// Order matters: presence checks first, then the action-dependent options,
/// then the matcher shape.
pub fn validate_rule(rule: &Rule) -> Result<(), RuleViolation> {
    let action = rule.action.as_deref().ok_or(RuleViolation::MissingAction)?;

    if rule.priority.is_none() {
        return Err(RuleViolation::MissingPriority);
    }
    if rule.preview.is_none() {
        return Err(RuleViolation::MissingPreview);
    }
    let matcher = rule.r#match.as_ref().ok_or(RuleViolation::MissingMatch)?;

    if matches!(action, "rate_based_ban" | "throttle") && rule.rate_limit_options.is_none() {
        return Err(RuleViolation::MissingRateLimitOptions);
    }
    if action == "redirect" && rule.redirect_options.is_none() {
        return Err(RuleViolation::MissingRedirectOptions);
    }
    if matcher.versioned_expr.is_some() && matcher.config.is_none() {
        return Err(RuleViolation::MissingMatchConfig);
    }

    Ok(())
}
