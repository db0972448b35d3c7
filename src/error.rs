//! Error types and handling for Tarifa
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Tarifa operations
pub type Result<T> = std::result::Result<T, TarifaError>;

/// Main error type for Tarifa
#[derive(Debug, Error)]
pub enum TarifaError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Upstream price API errors (ESIOS)
    #[error("API error: {message}")]
    Api { message: String },

    /// Authentication/authorization errors (bad API token)
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Holiday source errors (dataset download/parse, rule evaluation)
    #[error("Holiday source error: {message}")]
    Holiday { message: String },

    /// Payload rejected: incomplete or inconsistent hourly coverage
    #[error("Price data error: {message}")]
    PriceData { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

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

impl TarifaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        TarifaError::Config {
            message: message.into(),
        }
    }

    /// Create a new API error
    pub fn api<S: Into<String>>(message: S) -> Self {
        TarifaError::Api {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        TarifaError::Auth {
            message: message.into(),
        }
    }

    /// Create a new holiday source error
    pub fn holiday<S: Into<String>>(message: S) -> Self {
        TarifaError::Holiday {
            message: message.into(),
        }
    }

    /// Create a new price data error
    pub fn price_data<S: Into<String>>(message: S) -> Self {
        TarifaError::PriceData {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        TarifaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        TarifaError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        TarifaError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        TarifaError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        TarifaError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TarifaError {
    fn from(err: std::io::Error) -> Self {
        TarifaError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for TarifaError {
    fn from(err: serde_yaml::Error) -> Self {
        TarifaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TarifaError {
    fn from(err: serde_json::Error) -> Self {
        TarifaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for TarifaError {
    fn from(err: csv::Error) -> Self {
        TarifaError::holiday(err.to_string())
    }
}

#[cfg(feature = "esios")]
impl From<reqwest::Error> for TarifaError {
    fn from(err: reqwest::Error) -> Self {
        TarifaError::network(err.to_string())
    }
}

impl From<chrono::ParseError> for TarifaError {
    fn from(err: chrono::ParseError) -> Self {
        TarifaError::validation("datetime", err.to_string())
    }
}
