//! services/api/src/error.rs
//!
//! Defines the primary error type for the API service and the mapping from
//! core errors to HTTP responses.

use crate::config::ConfigError;
use axum::http::StatusCode;
use quill_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failed schema migration at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The status code a handler answers with when a core operation fails.
pub fn status_for(error: &PortError) -> StatusCode {
    match error {
        PortError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        PortError::NotAuthorized => StatusCode::FORBIDDEN,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::ConcurrentUpdateLost(_) => StatusCode::CONFLICT,
        PortError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns a core error into the `(status, message)` pair handlers return.
/// Internal details are only exposed for client errors.
pub fn port_error_response(error: PortError) -> (StatusCode, String) {
    let status = status_for(&error);
    let message = if status.is_server_error() {
        "Internal server error".to_string()
    } else {
        error.to_string()
    };
    (status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_map_to_statuses() {
        assert_eq!(status_for(&PortError::NotAuthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&PortError::NotAuthorized), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&PortError::NotFound("doc".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PortError::ConcurrentUpdateLost("xp".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&PortError::InvalidInput("range".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let (status, message) =
            port_error_response(PortError::Unexpected("connection reset".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("connection reset"));

        let (status, message) = port_error_response(PortError::NotFound("Document 1".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(message.contains("Document 1"));
    }
}
