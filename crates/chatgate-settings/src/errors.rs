//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A provider failed to read, or the merged document did not fit the schema.
    #[error("failed to load settings: {0}")]
    Figment(#[from] Box<figment::Error>),
    /// An explicitly requested config file does not exist.
    #[error("config file not found: {0}")]
    MissingFile(String),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
