//! S3 Credentials Module
//!
//! Credentials come from the configuration file when both keys are set there,
//! otherwise from the standard AWS environment variables.
//!
//! # Example
//!
//! ```
//! use mizuchi_stream::s3::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! ```

use crate::config::S3Config;
use std::fmt;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Credentials for AWS authentication
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    fn validate(self) -> Result<Self, CredentialsError> {
        if self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty() {
            return Err(CredentialsError::InvalidCredentials(
                "access key and secret key must not be empty".into(),
            ));
        }
        Ok(self)
    }
}

// Keep secrets out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Factory methods for loading credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        let credentials = match std::env::var("AWS_SESSION_TOKEN").ok() {
            Some(token) => Credentials::with_session_token(access_key, secret_key, token),
            None => Credentials::new(access_key, secret_key),
        };
        credentials.validate()
    }

    /// Load credentials from the `s3` section of the configuration
    pub fn from_config(config: &S3Config) -> Result<Credentials, CredentialsError> {
        let access_key = config.access_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("access_key not set in config".into())
        })?;

        let secret_key = config.secret_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("secret_key not set in config".into())
        })?;

        let credentials = match &config.session_token {
            Some(token) => Credentials::with_session_token(access_key, secret_key, token),
            None => Credentials::new(access_key, secret_key),
        };
        credentials.validate()
    }

    /// Configuration credentials if present, otherwise the environment
    pub fn resolve(config: &S3Config) -> Result<Credentials, CredentialsError> {
        if config.access_key.is_some() || config.secret_key.is_some() {
            return Self::from_config(config);
        }
        tracing::debug!("No credentials in config, reading environment");
        Self::from_env()
    }
}
