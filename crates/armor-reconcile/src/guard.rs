use std::collections::BTreeSet;

use crate::ArmorError;

/// Priorities owned by external change management unless configured otherwise.
pub const DEFAULT_PROTECTED_PRIORITIES: &[&str] = &["1000", "2147483647"];

/// Rule priorities this API must never create, update or remove.
///
/// Membership is exact-match on the canonical decimal form, never a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRuleSet {
    priorities: BTreeSet<String>,
}

impl Default for ProtectedRuleSet {
    fn default() -> Self {
        Self::new(DEFAULT_PROTECTED_PRIORITIES.iter().copied())
    }
}

impl ProtectedRuleSet {
    pub fn new<I, S>(priorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            priorities: priorities
                .into_iter()
                .map(|p| canonical(p.as_ref()))
                .collect(),
        }
    }

    /// `true` when mutation of `priority` must be refused.
    ///
    /// Integer-looking input is compared by value, so `"01000"` hits `"1000"`.
    pub fn is_protected(&self, priority: &str) -> bool {
        self.priorities.contains(&canonical(priority))
    }

    pub fn is_protected_priority(&self, priority: i32) -> bool {
        self.priorities.contains(&priority.to_string())
    }

    /// Refuse `action` ("create" | "update" | "delete") on a protected priority.
    pub fn check(&self, action: &str, priority: i32) -> Result<(), ArmorError> {
        if self.is_protected_priority(priority) {
            return Err(ArmorError::Protected(format!(
                "forbidden to {action} protected rule {priority}"
            )));
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.priorities.iter().map(String::as_str)
    }
}

fn canonical(p: &str) -> String {
    let t = p.trim();
    match t.parse::<i32>() {
        Ok(n) => n.to_string(),
        Err(_) => t.to_string(),
    }
}
