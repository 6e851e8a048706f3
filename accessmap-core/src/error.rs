//! Error types with credential sanitization.
//!
//! Errors in this module are *fatal*: they abort a pipeline run. Anything that
//! concerns a single database, user or connection is reported as an
//! [`Issue`](crate::issue::Issue) instead and never reaches this type.
//!
//! Master passwords, API tokens and secret values are never included in any
//! error message.

use thiserror::Error;

/// Main error type for accessmap operations.
///
/// # Security
/// All error messages are sanitized to prevent credential leakage.
#[derive(Debug, Error)]
pub enum AccessMapError {
    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A declaration file is malformed
    #[error("Invalid declaration: {context}")]
    Declaration {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A backend is not compiled into this build
    #[error("Unsupported operation: {feature} ({suggestion})")]
    UnsupportedFeature { feature: String, suggestion: String },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Secret store call failed at the transport level
    #[error("Secret store request failed: {context}")]
    SecretStore {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Cloud account identity lookup failed
    #[error("Account identity request failed: {context}")]
    Account {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Cloud inventory call failed at the transport level
    #[error("Inventory request failed: {context}")]
    Inventory {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Identity provider call failed at the transport level
    #[error("Identity provider request failed: {context}")]
    IdentityProvider {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Identity provider answered with an unexpected status code
    #[error("Identity provider returned HTTP {status}: {context}")]
    IdentityProviderStatus { status: u16, context: String },

    /// Database access probe failed
    #[error("Database access check failed: {context}")]
    Probe {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Database access probe did not finish in time
    #[error("Database access check timed out after {timeout_secs}s")]
    ProbeTimeout { timeout_secs: u64 },
}

/// Convenience type alias for Results with AccessMapError
pub type Result<T> = std::result::Result<T, AccessMapError>;

impl AccessMapError {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a declaration error for a malformed YAML document
    pub fn declaration(context: impl Into<String>, source: serde_yaml::Error) -> Self {
        Self::Declaration {
            context: context.into(),
            source,
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an unsupported feature error
    pub fn unsupported_feature(feature: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a secret store transport error
    pub fn secret_store_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::SecretStore {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates an account identity transport error
    pub fn account_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Account {
            context: context.into(),
            source: error.into(),
        }
    }

    /// Creates an inventory transport error
    pub fn inventory_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Inventory {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates an identity provider transport error
    pub fn identity_provider_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::IdentityProvider {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a database access probe error
    pub fn probe_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Probe {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Returns true when the failure happened while talking to a remote
    /// system rather than because of local input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::SecretStore { .. }
                | Self::Account { .. }
                | Self::Inventory { .. }
                | Self::IdentityProvider { .. }
                | Self::IdentityProviderStatus { .. }
                | Self::Probe { .. }
                | Self::ProbeTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = AccessMapError::configuration("max_workers must be greater than 0");
        assert!(error.to_string().contains("max_workers"));
        assert!(!error.is_transport());

        let error = AccessMapError::io(
            "reading users.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(error.to_string().contains("users.yaml"));
    }

    #[test]
    fn test_transport_classification() {
        let error = AccessMapError::inventory_failed(
            "eu-west-2",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
        );
        assert!(error.is_transport());

        let error = AccessMapError::IdentityProviderStatus {
            status: 500,
            context: "user search".to_string(),
        };
        assert!(error.is_transport());
        assert!(error.to_string().contains("500"));

        let error = AccessMapError::account_failed("caller identity", "response carries no account");
        assert!(error.is_transport());
        assert!(error.to_string().starts_with("Account identity request failed"));
    }
}
