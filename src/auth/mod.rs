//! Authentication providers for Airtable.
//!
//! The orchestration layer only needs an `Authorization` header value per
//! request; it never looks inside it. Token acquisition flows live outside this
//! crate, behind the [`AuthProvider`] trait.
//!
//! # Example
//!
//! ```no_run
//! use integrations_airtable::auth::{ApiKeyProvider, AuthProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ApiKeyProvider::new("patXXXXXXXXXXXXXX.XXXXXXXX");
//! let header = provider.authorization().await?;
//! # Ok(())
//! # }
//! ```

use crate::errors::AuthenticationError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Authentication provider abstraction.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the full `Authorization` header value for the next request.
    async fn authorization(&self) -> Result<SecretString, AuthenticationError>;
}

/// Personal access token (or legacy API key) provider.
///
/// The token is sent as `Authorization: Bearer <token>`.
pub struct ApiKeyProvider {
    token: SecretString,
}

impl ApiKeyProvider {
    /// Creates a provider from a raw token.
    ///
    /// A leading `Bearer ` prefix is accepted and stripped.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let trimmed = token.trim();
        let bare = match trimmed.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
            _ => trimmed,
        };
        Self {
            token: SecretString::new(bare.to_string()),
        }
    }

    /// Creates a provider from an already-wrapped secret.
    pub fn from_secret(token: SecretString) -> Self {
        Self::new(token.expose_secret().clone())
    }
}

impl fmt::Debug for ApiKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl AuthProvider for ApiKeyProvider {
    async fn authorization(&self) -> Result<SecretString, AuthenticationError> {
        let token = self.token.expose_secret();
        if token.is_empty() {
            return Err(AuthenticationError::MissingToken(
                "API key is empty".to_string(),
            ));
        }
        Ok(SecretString::new(format!("Bearer {}", token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_prefix_added() {
        let provider = ApiKeyProvider::new("pat123");
        let header = provider.authorization().await.unwrap();
        assert_eq!(header.expose_secret(), "Bearer pat123");
    }

    #[tokio::test]
    async fn test_existing_prefix_not_doubled() {
        let provider = ApiKeyProvider::new("bEaReR pat123");
        let header = provider.authorization().await.unwrap();
        assert_eq!(header.expose_secret(), "Bearer pat123");
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let provider = ApiKeyProvider::new("   ");
        assert!(provider.authorization().await.is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let provider = ApiKeyProvider::new("secret-token");
        let debug = format!("{:?}", provider);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
