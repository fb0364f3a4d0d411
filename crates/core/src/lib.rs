//! Core types and traits for partwire
//!
//! This crate defines the data model shared by every layer of the
//! composition engine:
//! - TypeRef: Type identity of a part or contract, possibly open-generic
//! - ContractId: Named capability used to match exports to imports
//! - Metadata: Ordered key/value data attached to exports
//! - PartDefinition: A potential component with its exports, imports and sharing scope
//! - Catalog: Immutable set of part definitions plus discovery errors
//! - TypeResolver: Injected capability that canonicalizes type identities
//! - Error: Error type for model construction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod contract;
pub mod error;
pub mod metadata;
pub mod part;
pub mod traits;
pub mod types;

pub use catalog::{Catalog, DiscoveryError};
pub use contract::ContractId;
pub use error::{Error, Result};
pub use metadata::{Metadata, MetadataConstraint, MetadataExpectation, MetadataKind, MetadataValue};
pub use part::{
    ExportDefinition, ExportSite, ImportCardinality, ImportDefinition, ImportSite, PartBuilder,
    PartDefinition, Sharing, SharingScope, SourceRequirement,
};
pub use traits::{IdentityResolver, TypeResolver};
pub use types::{TypeBindings, TypeRef};
