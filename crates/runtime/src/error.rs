//! Error types for the runtime layer
//!
//! Three families, one per stage:
//! - [`BuildError`]: lowering a configuration into a runtime composition
//! - [`PersistError`]: reading or writing the persisted form
//! - [`ProviderError`]: executing a runtime composition
//!
//! Build and provider errors indicate misuse or a broken invariant rather
//! than bad user data; they are never downgraded to default values.

use std::io;
use std::path::PathBuf;

use partwire_core::{ContractId, ImportCardinality, TypeRef};
use thiserror::Error;

/// Failure reported by an [`crate::Activator`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActivationError {
    message: String,
}

impl ActivationError {
    /// Create an activation error with a description
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Description given by the activator
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors raised while lowering a configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The configuration still carries composition errors
    #[error("Configuration has {count} composition error(s); first: {first}")]
    ConfigurationHasErrors {
        /// Number of composition errors
        count: usize,
        /// The first error, rendered
        first: String,
    },

    /// A binding or plan entry points outside the composition
    #[error("Part '{part}' references {reference}, which does not exist")]
    DanglingReference {
        /// Part holding the reference
        part: TypeRef,
        /// What was referenced
        reference: String,
    },

    /// Eager constructor edges form a cycle
    #[error("Eager constructor cycle between {}", join(.parts))]
    ConstructorCycle {
        /// Parts on the cycle
        parts: Vec<TypeRef>,
    },

    /// An eager cycle passes through a non-shared part
    #[error("Eager cycle through non-shared part(s): {}", join(.parts))]
    NonSharedCycle {
        /// Parts of the cycle
        parts: Vec<TypeRef>,
    },
}

fn join(parts: &[TypeRef]) -> String {
    parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while reading or writing a persisted composition
#[derive(Debug, Error)]
pub enum PersistError {
    /// File system failure
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Input shorter than the fixed header
    #[error("Persisted composition too small: {len} bytes")]
    TooShort {
        /// Input length
        len: usize,
    },

    /// Input does not start with the expected magic bytes
    #[error("Bad magic bytes in persisted composition")]
    BadMagic,

    /// Format version this build cannot read
    #[error("Unsupported persisted composition version {0}")]
    UnsupportedVersion(u32),

    /// Payload checksum does not match the header
    #[error("Checksum mismatch: header {expected:#018x}, payload {actual:#018x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u64,
        /// Checksum of the payload read
        actual: u64,
    },

    /// Serialization failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Deserialization failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Decoded composition is structurally inconsistent
    #[error("Invalid persisted composition: {0}")]
    Invalid(#[from] BuildError),
}

/// Errors raised by an [`crate::ExportProvider`]
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The number of visible exports does not fit the request
    #[error("Expected {expected} export(s) of '{contract}', found {actual}")]
    Cardinality {
        /// Requested contract
        contract: ContractId,
        /// Cardinality of the request
        expected: ImportCardinality,
        /// Number of visible exports
        actual: usize,
    },

    /// The provider owning the instance has been disposed
    #[error("Export provider has been disposed")]
    Disposed,

    /// The part lives in a sharing boundary this provider has not opened
    #[error("Part '{part}' lives in sharing boundary '{boundary}', which is not open")]
    BoundaryNotOpen {
        /// Requested part
        part: TypeRef,
        /// Its boundary
        boundary: String,
    },

    /// The calling thread is already constructing this part's group
    #[error("Re-entrant construction of '{part}' on the same thread")]
    ReentrantConstruction {
        /// Part being constructed
        part: TypeRef,
    },

    /// The activator failed
    #[error("Activation of '{part}' failed: {source}")]
    Activation {
        /// Part being activated
        part: TypeRef,
        /// Activator error
        #[source]
        source: ActivationError,
    },

    /// One or more instances failed to dispose
    #[error("{count} instance(s) failed to dispose; first: {first}")]
    DisposeFailed {
        /// Number of failures
        count: usize,
        /// The first failure, rendered
        first: String,
    },

    /// The runtime composition contradicts itself
    #[error("Runtime composition invariant violated: {0}")]
    Invariant(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_build_error_display() {
        let err = BuildError::ConstructorCycle {
            parts: vec![TypeRef::named("A"), TypeRef::named("B")],
        };
        assert_eq!(err.to_string(), "Eager constructor cycle between A, B");
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = PersistError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(err.to_string().contains("0x0000000000000001"));
    }

    #[test]
    fn test_activation_error_is_source() {
        let err = ProviderError::Activation {
            part: TypeRef::named("Db"),
            source: ActivationError::new("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "Activation of 'Db' failed: connection refused"
        );
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_cardinality_display() {
        let err = ProviderError::Cardinality {
            contract: ContractId::new("Logger"),
            expected: ImportCardinality::ExactlyOne,
            actual: 0,
        };
        assert_eq!(err.to_string(), "Expected ExactlyOne export(s) of 'Logger', found 0");
    }
}
