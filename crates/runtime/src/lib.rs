//! Runtime layer for partwire
//!
//! This crate executes validated configurations:
//! - RuntimeComposition: flattened parts addressed by index, construction
//!   order and construction groups
//! - Persisted form: checksummed MessagePack and portable JSON
//! - ExportProvider: concurrent, at-most-once construction of shared parts
//!   through a host Activator, with sharing boundaries and disposal
//! - testing: a recording activator for exercising providers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activator;
pub mod composition;
pub mod error;
pub mod persist;
pub mod provider;
pub mod testing; // Recording activator for provider tests

pub use activator::{Activator, ImportValue, Instance};
pub use composition::{
    ContractExports, ExportLocation, RuntimeComposition, RuntimeExport, RuntimeImport, RuntimePart,
};
pub use error::{ActivationError, BuildError, PersistError, ProviderError};
pub use persist::{FORMAT_VERSION, MAGIC};
pub use provider::{ExportProvider, LazyExport};
