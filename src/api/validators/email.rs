use regex::Regex;
use std::sync::LazyLock;

use super::{ValidationError, Validator};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("Invalid regex")
});

/// RFC 5321 limit on a forward path.
const MAX_EMAIL_LEN: usize = 254;

pub struct EmailValidator;

impl Validator for EmailValidator {
    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let s = input.trim();

        if s.is_empty() {
            return Err(ValidationError::new("E101", "email", "Email cannot be empty"));
        }

        if s.len() > MAX_EMAIL_LEN {
            return Err(ValidationError::new(
                "E102",
                "email",
                format!("Email too long ({} chars, max {})", s.len(), MAX_EMAIL_LEN),
            ));
        }

        if !EMAIL.is_match(s) {
            return Err(ValidationError::new("E103", "email", format!("Invalid email address: {}", s))
                .suggest("Use the form name@example.com"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(EmailValidator.validate("ada@example.com").is_ok());
        assert!(EmailValidator.validate("first.last+tag@mail.example.org").is_ok());
        assert!(EmailValidator.validate("  padded@example.com ").is_ok());
    }

    #[test]
    fn test_empty_email() {
        assert_eq!(EmailValidator.validate("   ").unwrap_err().code, "E101");
    }

    #[test]
    fn test_email_too_long() {
        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(EmailValidator.validate(&long).unwrap_err().code, "E102");
    }

    #[test]
    fn test_malformed_emails() {
        for bad in ["plain", "no-at.example.com", "a@b", "a@-bad.com", "a b@example.com"] {
            assert_eq!(EmailValidator.validate(bad).unwrap_err().code, "E103", "{}", bad);
        }
    }
}
