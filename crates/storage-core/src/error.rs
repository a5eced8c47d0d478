//! Error types for storage element access

use thiserror::Error;

/// Result type alias using the storage Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for storage element access
#[derive(Error, Debug)]
pub enum Error {
    // Backend errors
    #[error("Storage path not found: {path}")]
    PathNotFound { path: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Failed to execute '{command}':\n{output}")]
    CommandFailed { command: String, output: String },

    #[error("Chirp request '{request}' failed with status {status}")]
    ChirpStatus { request: String, status: i64 },

    #[error("Backend unsupported on this build: {protocol}")]
    BackendUnsupported { protocol: String },

    // Dispatch errors
    #[error("No working backend for {operation} on path '{path}'")]
    NoWorkingBackend { operation: String, path: String },

    // Configuration errors
    #[error("No match found for protocol {protocol} at site {site}, using {path}")]
    SiteRuleNotFound {
        protocol: String,
        site: String,
        path: String,
    },

    #[error("Invalid storage URL: {url}")]
    InvalidUrl { url: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Chirp authentication failed for {server}")]
    AuthenticationFailed { server: String },

    #[error("Can't create LFN for {filename} without local storage access")]
    NoLocalAccess { filename: String },

    #[error("Site rule file error: {0}")]
    Xml(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns true if the registry should move on to the next backend
    ///
    /// Covers the outcomes of a single backend failing to serve a path:
    /// missing paths, unreachable services, failed tool invocations and
    /// protocol-level refusals. Anything else is a caller or configuration
    /// problem and is propagated as is.
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            Error::PathNotFound { .. }
                | Error::StorageUnavailable { .. }
                | Error::Storage { .. }
                | Error::CommandFailed { .. }
                | Error::ChirpStatus { .. }
                | Error::Io(_)
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SiteRuleNotFound { .. }
                | Error::InvalidUrl { .. }
                | Error::InvalidConfig { .. }
                | Error::AuthenticationFailed { .. }
                | Error::BackendUnsupported { .. }
                | Error::Xml(_)
                | Error::Pattern(_)
        )
    }

    /// Map an I/O error on `path`, keeping "not found" distinguishable
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::PathNotFound {
                path: path.to_string(),
            },
            _ => Error::Storage {
                message: format!("{}: {}", path, err),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_falls_through() {
        let err = Error::PathNotFound {
            path: "/store/user/a.root".to_string(),
        };
        assert!(err.falls_through());

        let err = Error::CommandFailed {
            command: "lcg-ls srm://x".to_string(),
            output: "no such file".to_string(),
        };
        assert!(err.falls_through());

        let err = Error::BackendUnsupported {
            protocol: "hdfs".to_string(),
        };
        assert!(!err.falls_through());

        let err = Error::NoWorkingBackend {
            operation: "exists".to_string(),
            path: "/a.txt".to_string(),
        };
        assert!(!err.falls_through());
    }

    #[test]
    fn test_error_fatal() {
        let err = Error::SiteRuleNotFound {
            protocol: "xrootd".to_string(),
            site: "T3_US_NotreDame".to_string(),
            path: "/store".to_string(),
        };
        assert!(err.is_fatal());

        let err = Error::PathNotFound {
            path: "/missing".to_string(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_from_io_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            Error::from_io("/data/a", io),
            Error::PathNotFound { .. }
        ));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            Error::from_io("/data/a", io),
            Error::Storage { .. }
        ));
    }

    #[test]
    fn test_no_working_backend_message() {
        let err = Error::NoWorkingBackend {
            operation: "getsize".to_string(),
            path: "/store/a.root".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("getsize"));
        assert!(msg.contains("/store/a.root"));
    }
}
