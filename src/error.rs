//! Error types for the AzureRM provider.

use thiserror::Error;

/// Errors that can occur while planning or applying Azure resources.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The management API returned an error body.
    #[error("Azure API error (status {status}, code {code}): {message}")]
    Api {
        /// HTTP status code of the failed response.
        status: u16,
        /// ARM error code (e.g. `InvalidParameter`).
        code: String,
        /// ARM error message.
        message: String,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An HTTP transport error occurred.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource already exists and should be imported.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from the host.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg) => msg,
            Self::Api { message, .. } => message,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Http(_err) => "http error (see Debug output)",
        }
    }

    /// Map a failed management API response onto an error variant.
    ///
    /// `code` and `message` come from the ARM error envelope
    /// (`{"error": {"code": ..., "message": ...}}`) when one was present.
    pub fn from_status(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            401 | 403 => Self::PermissionDenied(format!("{}: {}", code, message)),
            409 if code.eq_ignore_ascii_case("Conflict") => {
                Self::AlreadyExists(message)
            },
            429 => Self::ResourceExhausted(message),
            503 => Self::Unavailable(message),
            _ => Self::Api {
                status,
                code,
                message,
            },
        }
    }

    /// Error returned when a resource that is about to be created already exists.
    pub fn import_as_exists(resource_type: &str, id: &str) -> Self {
        Self::AlreadyExists(format!(
            "A resource with the ID {:?} already exists - to be managed via this provider \
             this resource needs to be imported into the State. Please see the resource \
             documentation for {:?} for more information.",
            id, resource_type
        ))
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("disk-123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: disk-123");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("azurerm_foo".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: azurerm_foo");
    }

    #[test]
    fn test_api_error_display() {
        let err = ProviderError::Api {
            status: 400,
            code: "InvalidParameter".to_string(),
            message: "diskSizeGB is invalid".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Azure API error (status 400, code InvalidParameter): diskSizeGB is invalid"
        );
        assert_eq!(err.message(), "diskSizeGB is invalid");
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(404, "ResourceNotFound", "gone"),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "AuthorizationFailed", "nope"),
            ProviderError::PermissionDenied(_)
        ));
        assert!(matches!(
            ProviderError::from_status(409, "Conflict", "exists"),
            ProviderError::AlreadyExists(_)
        ));
        assert!(matches!(
            ProviderError::from_status(409, "OperationNotAllowed", "busy"),
            ProviderError::Api { status: 409, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(429, "TooManyRequests", "slow down"),
            ProviderError::ResourceExhausted(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "ServiceUnavailable", "later"),
            ProviderError::Unavailable(_)
        ));
    }

    #[test]
    fn test_is_not_found() {
        assert!(ProviderError::NotFound("x".to_string()).is_not_found());
        assert!(ProviderError::Api {
            status: 404,
            code: "NotFound".to_string(),
            message: String::new(),
        }
        .is_not_found());
        assert!(!ProviderError::Validation("x".to_string()).is_not_found());
    }

    #[test]
    fn test_import_as_exists() {
        let err = ProviderError::import_as_exists("azurerm_managed_disk", "/subscriptions/x");
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
        assert!(err.message().contains("needs to be imported"));
        assert!(err.message().contains("azurerm_managed_disk"));
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("missing tenant".to_string());
        assert_eq!(err.message(), "missing tenant");

        let err = ProviderError::InvalidRequest("bad request".to_string());
        assert_eq!(err.message(), "bad request");
    }
}
