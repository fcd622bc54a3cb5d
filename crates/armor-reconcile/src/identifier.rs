use std::sync::OnceLock;

use regex::Regex;

use crate::ArmorError;

/// One or more alphanumeric segments joined by single hyphens.
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"))
}

/// The first path/query token that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIdentifier(pub String);

impl std::fmt::Display for InvalidIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown parameter: {}", self.0)
    }
}

impl std::error::Error for InvalidIdentifier {}

impl From<InvalidIdentifier> for ArmorError {
    fn from(e: InvalidIdentifier) -> Self {
        ArmorError::Validation(e.to_string())
    }
}

pub fn is_valid_identifier(token: &str) -> bool {
    identifier_re().is_match(token)
}

/// Validate tokens in order and report the first offender.
///
/// Empty tokens stand for omitted optional parameters and pass.
pub fn validate_identifiers(tokens: &[&str]) -> Result<(), InvalidIdentifier> {
    match tokens
        .iter()
        .find(|t| !t.is_empty() && !is_valid_identifier(t))
    {
        Some(bad) => Err(InvalidIdentifier((*bad).to_string())),
        None => Ok(()),
    }
}

/// Parse a rule priority taken from a request path.
pub fn parse_priority(token: &str) -> Result<i32, ArmorError> {
    token
        .parse::<i32>()
        .map_err(|_| ArmorError::Validation(format!("parse priority: {token}")))
}
