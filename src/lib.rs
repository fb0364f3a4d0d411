//! Partwire - composition engine for declarative part catalogs
//!
//! Partwire takes a catalog of parts, each declaring the contracts it exports
//! and imports, and resolves it into a validated object graph that can be
//! persisted and executed.
//!
//! # Quick Start
//!
//! ```
//! use partwire::{
//!     Catalog, Configuration, ContractId, ExportProvider, ImportDefinition, PartDefinition,
//!     RuntimeComposition, TypeRef,
//! };
//! use partwire::testing::RecordingActivator;
//! use std::sync::Arc;
//!
//! let catalog = Catalog::from_parts([
//!     PartDefinition::builder(TypeRef::named("Logger")).export_self().build(),
//!     PartDefinition::builder(TypeRef::named("Service"))
//!         .export_self()
//!         .constructor_import(ImportDefinition::exactly_one("Logger"))
//!         .build(),
//! ]);
//!
//! let configuration = Configuration::create(&catalog);
//! assert!(configuration.is_valid());
//!
//! let composition = Arc::new(RuntimeComposition::build(&configuration)?);
//! let provider = ExportProvider::new(composition, Arc::new(RecordingActivator::new()));
//! let service = provider.get_export(&ContractId::new("Service"))?;
//! # let _ = service;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! - `partwire-core`: the data model (types, contracts, metadata, parts, catalogs)
//! - `partwire-resolver`: export index, graph resolution, leveled composition errors
//! - `partwire-runtime`: runtime composition, persisted form, export provider
//!
//! Data flows strictly core → resolver → runtime; this crate re-exports all three.

pub use partwire_core::{
    Catalog, ContractId, DiscoveryError, Error, ExportDefinition, ExportSite, IdentityResolver,
    ImportCardinality, ImportDefinition, ImportSite, Metadata, MetadataConstraint,
    MetadataExpectation, MetadataKind, MetadataValue, PartBuilder, PartDefinition, Result, Sharing,
    SharingScope, SourceRequirement, TypeBindings, TypeRef, TypeResolver,
};
pub use partwire_resolver::{
    ComposedPart, CompositionError, CompositionErrorKind, Configuration, Cycle, Dependency,
    DependencyGraph, DiscoveryErrorPolicy, ExportIndex, ExportRef, ExportSlot, ImportBinding,
    ImportSlot, ResolverConfig, ResolverError, CONFIG_FILE_NAME, DEFAULT_MAX_GENERIC_DEPTH,
};
pub use partwire_runtime::{
    testing, ActivationError, Activator, BuildError, ContractExports, ExportLocation,
    ExportProvider, ImportValue, Instance, LazyExport, PersistError, ProviderError,
    RuntimeComposition, RuntimeExport, RuntimeImport, RuntimePart, FORMAT_VERSION, MAGIC,
};
