//! Error types for the Shardline operator
//!
//! [`Error`] carries structured context about what failed. [`ReconcileError`]
//! is the classified form returned by every reconcile step: the controller's
//! error policy only ever looks at whether a failure is `Fatal` or `Temporary`.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Shardline operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs or persisted status
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.deployment.name")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// An external call did not complete within its deadline
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        /// The operation that was cut off
        operation: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "client_cache", "backup_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the API response, if this is a Kubernetes API error
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// Check if the API server reported the object as missing
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// Check if the API server rejected our credentials
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.api_code(), Some(401) | Some(403))
    }

    /// Check if the API server rejected the object itself (bad request,
    /// conflicting object, or schema validation)
    pub fn is_rejected(&self) -> bool {
        matches!(self.api_code(), Some(400) | Some(409) | Some(422))
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors are not retryable (require a spec fix).
    /// Kubernetes 4xx responses are not retryable, except the ones that describe
    /// a transient condition (not found, request timeout, conflict, throttling).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || matches!(ae.code, 404 | 408 | 409 | 429)
                }
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

}

/// Classified reconcile failure
///
/// Every failure path of a reconcile step maps to exactly one of these two
/// kinds. `Fatal` stops automated retries until the resource changes;
/// `Temporary` is retried on the next requeue without touching status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Not retryable: malformed record or a rejected object
    #[error("fatal: {0}")]
    Fatal(String),

    /// Retryable: network, client construction, or transient backend failure
    #[error("temporary: {0}")]
    Temporary(String),
}

impl ReconcileError {
    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a temporary error
    pub fn temporary(msg: impl Into<String>) -> Self {
        Self::Temporary(msg.into())
    }

    /// Classify a Shardline error, prefixing the message with what was attempted
    pub fn classify(context: &str, e: Error) -> Self {
        let msg = format!("{}: {}", context, e);
        if e.is_retryable() {
            Self::Temporary(msg)
        } else {
            Self::Fatal(msg)
        }
    }

    /// True for the non-retryable kind
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// True for the retryable kind
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Fatal(m) | Self::Temporary(m) => m,
        }
    }
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        if e.is_retryable() {
            Self::Temporary(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("request failed with {}", code),
        reason: "Test".to_string(),
        code,
    })
}
