//! Error types for the feature server

use thiserror::Error;

/// Feature server error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Invalid Featureserver configuration: {0}")]
    ConfigError(String),

    // Database Errors
    #[error("Database access problem: {0}")]
    DatabaseError(String),

    // Validation Errors
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid query parameter: {0}")]
    InvalidQueryParam(String),

    #[error("{first} and {second} must contain the same number of entries ({first_len} vs {second_len})")]
    SizeMismatch {
        first: &'static str,
        second: &'static str,
        first_len: usize,
        second_len: usize,
    },

    // Lookup Errors
    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error("Table {table} does not have property {property}")]
    PropertyNotFound { table: String, property: String },

    #[error("Property {property} of Table {table} is not of type String, Integer, Byte or Boolean")]
    DistinctNotSupported { table: String, property: String },

    // General Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for feature server operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status code for each error type
impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidFilter(_) | Self::InvalidQueryParam(_) | Self::SizeMismatch { .. } => 400,

            // 404 Not Found
            Self::TableNotFound(_) | Self::PropertyNotFound { .. } => 404,

            // 412 Precondition Failed
            Self::DistinctNotSupported { .. } => 412,

            // 500 Internal Server Error
            Self::ConfigError(_)
            | Self::DatabaseError(_)
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::TomlError(_) => 500,
        }
    }

    /// Short machine-readable error code, used in logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::TomlError(_) => "config_error",
            Self::DatabaseError(_) => "database_error",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::InvalidQueryParam(_) => "invalid_param",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::TableNotFound(_) => "table_not_found",
            Self::PropertyNotFound { .. } => "property_not_found",
            Self::DistinctNotSupported { .. } => "distinct_not_supported",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
        }
    }

    /// True for failures caused by the request itself rather than the server
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
