//! # Error Handling
//!
//! This module provides error handling for the routeplane parser. It defines
//! custom error types using `thiserror` for all operations.

pub mod resource;

pub use resource::ResourceInvalid;

/// Custom result type for routeplane operations
pub type Result<T> = std::result::Result<T, RouteplaneError>;

/// Main error type for the routeplane crate
#[derive(thiserror::Error, Debug)]
pub enum RouteplaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Parsing/decoding errors
    #[error("Parse error: {context}")]
    Parse {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An xDS resource failed validation and the whole update was rejected
    #[error("Rejected xDS resource update: {0}")]
    Resource(#[from] ResourceInvalid),

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Alias used throughout the crate
pub type Error = RouteplaneError;

impl RouteplaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a parse error
    pub fn parse<S: Into<String>>(context: S) -> Self {
        Self::Parse { context: context.into(), source: None }
    }

    /// Create a parse error with source
    pub fn parse_with_source<S: Into<String>>(
        context: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Parse { context: context.into(), source: Some(source) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }
}
