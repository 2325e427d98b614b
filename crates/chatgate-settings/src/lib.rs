//! # chatgate-settings
//!
//! Layered configuration for the chatgate server: compiled defaults, YAML
//! files, then `CHATGATE_*` environment variables. See [`loader`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{default_search_paths, load_settings, SettingsLoader, ENV_PREFIX};
pub use types::*;
