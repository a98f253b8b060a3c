//! Quota meter error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Entitlements configuration error: {0}")]
    Config(String),

    #[error("Entitlements backend error: {0}")]
    Backend(String),

    #[error("Entitlements request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = QuotaError::Config("url required".to_string());
        assert_eq!(
            err.to_string(),
            "Entitlements configuration error: url required"
        );
    }

    #[test]
    fn test_backend_error_display() {
        let err = QuotaError::Backend("POST /meters/check returned 503".to_string());
        assert_eq!(
            err.to_string(),
            "Entitlements backend error: POST /meters/check returned 503"
        );
    }
}
