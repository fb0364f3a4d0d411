//! Error types for the resolver layer
//!
//! Composition problems in the catalog are *not* reported here: they are
//! collected as [`crate::CompositionError`] values on the configuration so a
//! single pass reports all of them. These errors cover the session itself:
//! configuration files and the fatal discovery-error policy.

use partwire_core::DiscoveryError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors raised by a resolution session
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Reading or writing a configuration file failed
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A configuration file could not be parsed
    #[error("Invalid configuration in '{path}': {message}")]
    InvalidConfig {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A configuration could not be serialized
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    /// The catalog carried discovery errors under the fatal policy
    #[error("Catalog has {count} discovery error(s); first: {first}")]
    DiscoveryFailed {
        /// Number of discovery errors
        count: usize,
        /// The first one reported
        first: DiscoveryError,
    },
}
