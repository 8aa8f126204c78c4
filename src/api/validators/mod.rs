use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod email;
pub mod password;
pub mod url;

pub use email::EmailValidator;
pub use password::PasswordValidator;
pub use url::BaseUrlValidator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(code: &str, field: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into(), field: field.to_string(), suggestion: None }
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.message)
    }
}

pub trait Validator {
    fn validate(&self, input: &str) -> Result<(), ValidationError>;
}
