//! Error types for gitprov.
//!
//! Every failure an adapter reports is one of the variants below. Raw
//! transport errors are converted at the HTTP boundary (see [`crate::http`]).

use std::time::Duration;

use thiserror::Error;

/// Backoff used when a 429 response carries no `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 60;

/// Main error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Credentials missing, invalid, or lacking the required scope.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The provider throttled the request.
    #[error("Rate limited, retry after {retry_after}s: {message}")]
    RateLimit { retry_after: u64, message: String },

    /// The requested resource does not exist (or is invisible to the caller).
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    /// The request was rejected locally or by the provider.
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// The provider has no equivalent for the requested capability.
    #[error("{operation} is not supported by {provider}")]
    NotSupported { provider: String, operation: String },

    /// Timeouts, DNS and connection failures, 5xx responses.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// No provider could be resolved from configuration or the git remote.
    #[error("No provider configured: {0}")]
    NotConfigured(String),
}

/// Result type alias for gitprov operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn not_supported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::NotSupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    /// Map a non-success HTTP status to the error taxonomy.
    ///
    /// | status | error |
    /// |---|---|
    /// | 401, 403 | `Authentication` |
    /// | 404 | `NotFound` |
    /// | 400, 422, other 4xx | `Validation` |
    /// | 429 | `RateLimit` (`retry_after` or the default backoff) |
    /// | 5xx and anything else | `TransientNetwork` |
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Authentication(format!("invalid or missing credentials: {}", message)),
            403 => Error::Authentication(format!("insufficient scope: {}", message)),
            404 => Error::NotFound {
                resource: "resource".to_string(),
                id: message,
            },
            429 => Error::RateLimit {
                retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF_SECS),
                message,
            },
            400..=499 => Error::Validation {
                field: "request".to_string(),
                message: format!("{} {}", status, message),
            },
            _ => Error::TransientNetwork(format!("{} {}", status, message)),
        }
    }

    /// Attach resource context to a `NotFound` produced by the HTTP layer.
    ///
    /// Other variants pass through unchanged.
    pub fn for_resource(self, resource: &str, id: impl ToString) -> Self {
        match self {
            Error::NotFound { .. } => Error::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            },
            other => other,
        }
    }

    /// Whether the retry policy may repeat the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientNetwork(_) | Error::RateLimit { .. })
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => Some(Duration::from_secs(*retry_after)),
            _ => None,
        }
    }

    /// One actionable message per taxonomy member, for user-facing output.
    pub fn hint(&self) -> String {
        match self {
            Error::Authentication(_) => {
                "Check your credentials: run `gh auth login`, or set GITLAB_TOKEN / AZURE_DEVOPS_PAT"
                    .to_string()
            }
            Error::RateLimit { retry_after, .. } => {
                format!("Rate limit reached, try again in {} seconds", retry_after)
            }
            Error::NotFound { resource, id } => {
                format!("No {} '{}' exists, or you cannot see it", resource, id)
            }
            Error::Validation { field, .. } => format!("Fix the '{}' value and retry", field),
            Error::NotSupported { provider, .. } => {
                format!("This operation is not available on {}", provider)
            }
            Error::TransientNetwork(_) => {
                "Network problem talking to the provider, retry later".to_string()
            }
            Error::NotConfigured(_) => {
                "Set `provider` in the configuration or run inside a repository with a recognised remote"
                    .to_string()
            }
        }
    }
}
