//! Error types and handling for Elspot
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Elspot operations
pub type Result<T> = std::result::Result<T, ElspotError>;

/// Main error type for Elspot
#[derive(Debug, Error)]
pub enum ElspotError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network/transport errors (connection failure, non-success status)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Clock errors (unsynchronized or invalid wall-clock time)
    #[error("Clock error: {message}")]
    Clock { message: String },

    /// Market API errors (unauthorized, no usable data for the request)
    #[error("API error: {message}")]
    Api { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Durable blob storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Persisted blob header mismatch (magic/version/shape)
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl ElspotError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ElspotError::Config {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        ElspotError::Network {
            message: message.into(),
        }
    }

    /// Create a new clock error
    pub fn clock<S: Into<String>>(message: S) -> Self {
        ElspotError::Clock {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        ElspotError::Api {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ElspotError::Io {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(message: S) -> Self {
        ElspotError::Storage {
            message: message.into(),
        }
    }

    /// Create a new schema error
    pub fn schema<S: Into<String>>(message: S) -> Self {
        ElspotError::Schema {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        ElspotError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        ElspotError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        ElspotError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ElspotError {
    fn from(err: std::io::Error) -> Self {
        ElspotError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ElspotError {
    fn from(err: serde_yaml::Error) -> Self {
        ElspotError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ElspotError {
    fn from(err: serde_json::Error) -> Self {
        ElspotError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ElspotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ElspotError::timeout(err.to_string())
        } else {
            ElspotError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for ElspotError {
    fn from(err: chrono::ParseError) -> Self {
        ElspotError::validation("datetime", err.to_string().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ElspotError::config("test config error");
        assert!(matches!(err, ElspotError::Config { .. }));

        let err = ElspotError::schema("bad magic");
        assert!(matches!(err, ElspotError::Schema { .. }));

        let err = ElspotError::validation("field", "test validation error");
        assert!(matches!(err, ElspotError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = ElspotError::network("test error");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Network error: test error");

        let err = ElspotError::validation("test_field", "invalid value");
        let error_string = format!("{}", err);
        assert_eq!(error_string, "Validation error: test_field - invalid value");
    }
}
