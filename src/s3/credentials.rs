//! S3 Credentials Module
//!
//! Turns the `s3` configuration section into static AWS credentials.
//!
//! Missing values are not fatal at construction time. They are kept as a
//! [`CredentialsError`] and reported by the client on every call, using
//! the same error codes the service would, so they reach callers as
//! `invalid backend configuration`.
//!
//! # Example
//!
//! ```
//! use squirrelup::config::S3Config;
//! use squirrelup::s3::CredentialsProvider;
//!
//! let config = S3Config {
//!     region: "us-west-004".into(),
//!     id: "key-id".into(),
//!     secret: "application-key".into(),
//!     token: String::new(),
//!     endpoint: None,
//! };
//!
//! let creds = CredentialsProvider::from_config(&config).unwrap();
//! assert_eq!(creds.access_key_id(), "key-id");
//! assert!(creds.session_token().is_none());
//! ```

use super::ApiError;
use crate::config::S3Config;
use aws_credential_types::Credentials;
use thiserror::Error;

/// Name reported by credentials built from configuration
const PROVIDER_NAME: &str = "squirrelup-config";

/// Credential loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("could not find region configuration")]
    MissingRegion,

    #[error("static credentials are empty")]
    EmptyStaticCreds,
}

impl CredentialsError {
    /// Error code matching what the service reports for the same problem
    pub fn code(&self) -> &'static str {
        match self {
            CredentialsError::MissingRegion => "MissingRegion",
            CredentialsError::EmptyStaticCreds => "EmptyStaticCreds",
        }
    }
}

impl From<CredentialsError> for ApiError {
    fn from(err: CredentialsError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}

/// Factory for credentials used by the SDK client
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Build static credentials from the `s3` configuration section
    ///
    /// An empty `token` means no session token.
    pub fn from_config(config: &S3Config) -> Result<Credentials, CredentialsError> {
        if config.region.trim().is_empty() {
            return Err(CredentialsError::MissingRegion);
        }
        if config.id.is_empty() || config.secret.is_empty() {
            return Err(CredentialsError::EmptyStaticCreds);
        }

        let token = (!config.token.is_empty()).then(|| config.token.clone());

        Ok(Credentials::new(
            config.id.clone(),
            config.secret.clone(),
            token,
            None,
            PROVIDER_NAME,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config(region: &str, id: &str, secret: &str, token: &str) -> S3Config {
        S3Config {
            region: region.into(),
            id: id.into(),
            secret: secret.into(),
            token: token.into(),
            endpoint: None,
        }
    }

    #[test]
    fn test_from_config_with_session_token() {
        let creds =
            CredentialsProvider::from_config(&s3_config("eu-central-003", "id", "secret", "tok"))
                .unwrap();
        assert_eq!(creds.access_key_id(), "id");
        assert_eq!(creds.secret_access_key(), "secret");
        assert_eq!(creds.session_token(), Some("tok"));
    }

    #[test]
    fn test_from_config_missing_region() {
        let result = CredentialsProvider::from_config(&s3_config("", "id", "secret", ""));
        assert_eq!(result.unwrap_err(), CredentialsError::MissingRegion);
    }

    #[test]
    fn test_from_config_missing_secret() {
        let result = CredentialsProvider::from_config(&s3_config("us-west-004", "id", "", ""));
        assert_eq!(result.unwrap_err(), CredentialsError::EmptyStaticCreds);
    }

    #[test]
    fn test_credentials_error_codes() {
        let err: ApiError = CredentialsError::EmptyStaticCreds.into();
        assert_eq!(err.code, "EmptyStaticCreds");
        let err: ApiError = CredentialsError::MissingRegion.into();
        assert_eq!(err.code, "MissingRegion");
    }
}
