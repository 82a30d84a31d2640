//! Password policy enforced by the identity store when accounts are created.

use serde::Deserialize;

/// Creation-time password requirements.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_digit: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 6,
            require_digit: true,
        }
    }
}

impl PasswordPolicy {
    /// Every requirement `password` fails, in a fixed order. Empty when it passes.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();

        if password.chars().count() < self.min_length {
            violations.push(format!(
                "Passwords must be at least {} characters.",
                self.min_length
            ));
        }

        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("Passwords must have at least one digit ('0'-'9').".to_string());
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_password() {
        assert!(PasswordPolicy::default().violations("secret1").is_empty());
    }

    #[test]
    fn test_all_violations_are_reported() {
        let violations = PasswordPolicy::default().violations("abc");
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("at least 6"));
        assert!(violations[1].contains("digit"));
    }

    #[test]
    fn test_digit_requirement_can_be_disabled() {
        let policy = PasswordPolicy {
            min_length: 4,
            require_digit: false,
        };
        assert!(policy.violations("abcd").is_empty());
    }
}
