use super::{ValidationError, Validator};

/// Base URL of an external system: absolute http(s) with a host.
pub struct BaseUrlValidator;

impl Validator for BaseUrlValidator {
    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let s = input.trim();

        let rest = s
            .strip_prefix("http://")
            .or_else(|| s.strip_prefix("https://"))
            .ok_or_else(|| {
                ValidationError::new("E301", "base_url", format!("base_url must start with http:// or https://: {}", s))
            })?;

        let host = rest.split(['/', '?', '#']).next().unwrap_or("");
        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(ValidationError::new("E302", "base_url", format!("base_url has no valid host: {}", s)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_urls() {
        assert!(BaseUrlValidator.validate("http://127.0.0.1:8080").is_ok());
        assert!(BaseUrlValidator.validate("https://erp.example.com/api").is_ok());
        assert_eq!(BaseUrlValidator.validate("ftp://x").unwrap_err().code, "E301");
        assert_eq!(BaseUrlValidator.validate("https:///path").unwrap_err().code, "E302");
    }
}
