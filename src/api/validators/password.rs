use super::{ValidationError, Validator};
use crate::auth::password::MIN_PASSWORD_LEN;

/// Argon2 accepts far more, but nobody types this much.
const MAX_PASSWORD_LEN: usize = 128;

pub struct PasswordValidator;

impl Validator for PasswordValidator {
    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let len = input.chars().count();

        if len < MIN_PASSWORD_LEN {
            return Err(ValidationError::new(
                "E201",
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            ));
        }

        if len > MAX_PASSWORD_LEN {
            return Err(ValidationError::new(
                "E202",
                "password",
                format!("Password must be at most {} characters", MAX_PASSWORD_LEN),
            ));
        }

        Ok(())
    }
}
