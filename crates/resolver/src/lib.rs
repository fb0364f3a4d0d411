//! Composition graph resolution for partwire
//!
//! This crate turns a [`partwire_core::Catalog`] into a validated
//! [`Configuration`]:
//! - ExportIndex: contract name lookups built once per catalog
//! - Resolver: import matching, open-generic specialization, cycle checks
//!   and leveled error collection
//! - Configuration: composed parts, leveled errors, deterministic rendering
//! - DependencyGraph: cycle, component and construction-order queries shared
//!   with the runtime builder
//! - ResolverConfig: session settings loaded from `partwire.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod configuration;
pub mod error;
pub mod graph;
pub mod index;
mod resolver;

pub use config::{DiscoveryErrorPolicy, ResolverConfig, CONFIG_FILE_NAME, DEFAULT_MAX_GENERIC_DEPTH};
pub use configuration::{
    ComposedPart, CompositionError, CompositionErrorKind, Configuration, ExportRef, ImportBinding,
};
pub use error::{ResolverError, Result};
pub use graph::{Cycle, Dependency, DependencyGraph};
pub use index::{ExportIndex, ExportSlot, ImportSlot};
