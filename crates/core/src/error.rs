//! Error types for the partwire data model
//!
//! Model errors are raised while building type references and specializing
//! open-generic parts. Problems with the *graph* (missing exports, cycles and
//! so on) are not errors in this sense: the resolver collects them as data.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::TypeRef;
use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the partwire data model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A textual type reference could not be parsed
    #[error("Invalid type reference '{input}': {reason}")]
    InvalidTypeRef {
        /// The text that failed to parse
        input: String,
        /// What went wrong
        reason: String,
    },

    /// Specialization was attempted with the wrong number of type arguments
    #[error("Cannot specialize '{identity}': expected {expected} type arguments, got {actual}")]
    ArityMismatch {
        /// Identity of the open-generic part
        identity: TypeRef,
        /// Number of type parameters the part declares
        expected: usize,
        /// Number of arguments supplied
        actual: usize,
    },

    /// A type argument supplied for specialization was itself open
    #[error("Cannot specialize '{identity}' with open type argument '{argument}'")]
    OpenTypeArgument {
        /// Identity of the open-generic part
        identity: TypeRef,
        /// The offending argument
        argument: TypeRef,
    },

    /// Specialization was requested for a part without type parameters
    #[error("Part '{0}' is not an open generic")]
    NotGeneric(TypeRef),
}
