//! Storage Core - Foundation for storage element access
//!
//! Provides the error taxonomy, configuration options and the
//! logical/physical path translation shared by all storage backends.

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackendSettings, StorageOptions};
pub use error::{Error, Result};
pub use types::*;
