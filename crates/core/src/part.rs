//! Part definitions
//!
//! A part is a potential component: it offers exports, requires imports, and
//! declares a sharing scope. Parts whose identity carries unbound type
//! parameters are open-generic templates; they are never instantiated
//! directly and only become usable through [`PartDefinition::specialize`].
//!
//! ## Registration
//!
//! ```ignore
//! let service = PartDefinition::builder(TypeRef::named("Service"))
//!     .export(ExportDefinition::new("Service"))
//!     .constructor_import(ImportDefinition::exactly_one("Logger"))
//!     .member_import("cache", ImportDefinition::zero_or_one("Cache").lazy())
//!     .build();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::ContractId;
use crate::error::{Error, Result};
use crate::metadata::{Metadata, MetadataConstraint, MetadataValue};
use crate::types::{TypeBindings, TypeRef};

// ============================================================================
// Sharing
// ============================================================================

/// Instance lifetime of a part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sharing {
    /// One instance per provider (per open boundary for boundary-scoped parts)
    Shared,
    /// A fresh instance per request
    NonShared,
}

/// Sharing scope: lifetime plus an optional named sharing boundary
///
/// A part declared inside boundary `b` is only visible to importers that
/// live in the same boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharingScope {
    /// Instance lifetime
    pub sharing: Sharing,
    /// Named boundary the part lives in, `None` for the global scope
    pub boundary: Option<String>,
}

impl SharingScope {
    /// Shared in the global scope (the default)
    pub fn shared() -> Self {
        Self {
            sharing: Sharing::Shared,
            boundary: None,
        }
    }

    /// Fresh instance per request, global scope
    pub fn non_shared() -> Self {
        Self {
            sharing: Sharing::NonShared,
            boundary: None,
        }
    }

    /// Shared within a named boundary
    pub fn shared_in(boundary: impl Into<String>) -> Self {
        Self {
            sharing: Sharing::Shared,
            boundary: Some(boundary.into()),
        }
    }

    /// Fresh instance per request, visible only inside a named boundary
    pub fn non_shared_in(boundary: impl Into<String>) -> Self {
        Self {
            sharing: Sharing::NonShared,
            boundary: Some(boundary.into()),
        }
    }

    /// True for [`Sharing::Shared`]
    pub fn is_shared(&self) -> bool {
        self.sharing == Sharing::Shared
    }
}

impl Default for SharingScope {
    fn default() -> Self {
        Self::shared()
    }
}

impl fmt::Display for SharingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sharing {
            Sharing::Shared => write!(f, "shared")?,
            Sharing::NonShared => write!(f, "non-shared")?,
        }
        if let Some(boundary) = &self.boundary {
            write!(f, "@{}", boundary)?;
        }
        Ok(())
    }
}

/// Where an importer requires its exporter to live
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceRequirement {
    /// Any visible exporter
    #[default]
    Any,
    /// Shared exporters only
    SharedOnly,
    /// Non-shared exporters only
    NonSharedOnly,
    /// Exporters declared inside the named boundary only
    Boundary(String),
}

impl SourceRequirement {
    /// Check an exporter's scope against this requirement
    pub fn admits(&self, exporter: &SharingScope) -> bool {
        match self {
            SourceRequirement::Any => true,
            SourceRequirement::SharedOnly => exporter.sharing == Sharing::Shared,
            SourceRequirement::NonSharedOnly => exporter.sharing == Sharing::NonShared,
            SourceRequirement::Boundary(name) => exporter.boundary.as_deref() == Some(name),
        }
    }
}

impl fmt::Display for SourceRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRequirement::Any => write!(f, "any"),
            SourceRequirement::SharedOnly => write!(f, "shared-only"),
            SourceRequirement::NonSharedOnly => write!(f, "non-shared-only"),
            SourceRequirement::Boundary(name) => write!(f, "boundary {}", name),
        }
    }
}

// ============================================================================
// Exports
// ============================================================================

/// What an export hands out
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportSite {
    /// The part instance itself
    Part,
    /// A member read from the part instance
    Member {
        /// Member name
        name: String,
    },
}

/// A capability offered by a part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDefinition {
    /// Contract offered
    pub contract: ContractId,
    /// Part itself or one of its members
    pub site: ExportSite,
    /// Export metadata
    pub metadata: Metadata,
}

impl ExportDefinition {
    /// Export the part instance under `contract`
    pub fn new(contract: impl Into<ContractId>) -> Self {
        Self {
            contract: contract.into(),
            site: ExportSite::Part,
            metadata: Metadata::new(),
        }
    }

    /// Export a member of the part instance under `contract`
    pub fn member(contract: impl Into<ContractId>, name: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            site: ExportSite::Member { name: name.into() },
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry (repeated keys accumulate)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key, value);
        self
    }

    fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> ExportDefinition {
        Self {
            contract: self.contract.map_types(f),
            site: self.site.clone(),
            metadata: self.metadata.map_types(f),
        }
    }
}

// ============================================================================
// Imports
// ============================================================================

/// How many exports an import accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportCardinality {
    /// Exactly one export must match
    ExactlyOne,
    /// At most one export may match
    ZeroOrOne,
    /// Every matching export, in index order
    ZeroOrMore,
}

impl fmt::Display for ImportCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportCardinality::ExactlyOne => write!(f, "ExactlyOne"),
            ImportCardinality::ZeroOrOne => write!(f, "ZeroOrOne"),
            ImportCardinality::ZeroOrMore => write!(f, "ZeroOrMore"),
        }
    }
}

/// How an import is delivered to the part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSite {
    /// Constructor argument at the given position
    Constructor {
        /// Zero-based argument position
        position: usize,
    },
    /// Member assigned after construction
    Member {
        /// Member name
        name: String,
    },
}

impl ImportSite {
    /// True for constructor arguments
    pub fn is_constructor(&self) -> bool {
        matches!(self, ImportSite::Constructor { .. })
    }
}

impl fmt::Display for ImportSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportSite::Constructor { position } => write!(f, "constructor #{}", position),
            ImportSite::Member { name } => write!(f, "member {}", name),
        }
    }
}

/// A capability required by a part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDefinition {
    /// Contract requested
    pub contract: ContractId,
    /// Accepted number of exports
    pub cardinality: ImportCardinality,
    /// Deferred: satisfied by an accessor that constructs on first use
    pub lazy: bool,
    /// Metadata every matching export must satisfy
    pub constraints: Vec<MetadataConstraint>,
    /// Constructor argument or member
    pub site: ImportSite,
    /// Scope the exporter must live in
    pub source: SourceRequirement,
}

impl ImportDefinition {
    /// Create an import; the site defaults to constructor position 0
    pub fn new(contract: impl Into<ContractId>, cardinality: ImportCardinality) -> Self {
        Self {
            contract: contract.into(),
            cardinality,
            lazy: false,
            constraints: Vec::new(),
            site: ImportSite::Constructor { position: 0 },
            source: SourceRequirement::Any,
        }
    }

    /// Import requiring exactly one export
    pub fn exactly_one(contract: impl Into<ContractId>) -> Self {
        Self::new(contract, ImportCardinality::ExactlyOne)
    }

    /// Import accepting zero or one export
    pub fn zero_or_one(contract: impl Into<ContractId>) -> Self {
        Self::new(contract, ImportCardinality::ZeroOrOne)
    }

    /// Import collecting every matching export
    pub fn zero_or_more(contract: impl Into<ContractId>) -> Self {
        Self::new(contract, ImportCardinality::ZeroOrMore)
    }

    /// Mark the import as deferred
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Add a metadata constraint
    pub fn require(mut self, constraint: MetadataConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Restrict the exporter's scope
    pub fn from_source(mut self, source: SourceRequirement) -> Self {
        self.source = source;
        self
    }

    /// Deliver as constructor argument at `position`
    pub fn at_constructor(mut self, position: usize) -> Self {
        self.site = ImportSite::Constructor { position };
        self
    }

    /// Deliver by assigning member `name` after construction
    pub fn at_member(mut self, name: impl Into<String>) -> Self {
        self.site = ImportSite::Member { name: name.into() };
        self
    }

    /// Non-lazy constructor import: must be acyclic
    pub fn is_eager_constructor(&self) -> bool {
        !self.lazy && self.site.is_constructor()
    }

    /// Check exporter metadata against every constraint
    pub fn accepts_metadata(&self, metadata: &Metadata) -> bool {
        self.constraints.iter().all(|c| c.is_satisfied_by(metadata))
    }

    fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> ImportDefinition {
        Self {
            contract: self.contract.map_types(f),
            cardinality: self.cardinality,
            lazy: self.lazy,
            constraints: self.constraints.iter().map(|c| c.map_types(f)).collect(),
            site: self.site.clone(),
            source: self.source.clone(),
        }
    }
}

// ============================================================================
// Part definition
// ============================================================================

/// A potential component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDefinition {
    identity: TypeRef,
    exports: Vec<ExportDefinition>,
    imports: Vec<ImportDefinition>,
    scope: SharingScope,
}

impl PartDefinition {
    /// Create a part from its parts
    pub fn new(
        identity: TypeRef,
        exports: Vec<ExportDefinition>,
        imports: Vec<ImportDefinition>,
        scope: SharingScope,
    ) -> Self {
        Self {
            identity,
            exports,
            imports,
            scope,
        }
    }

    /// Start a fluent definition
    pub fn builder(identity: TypeRef) -> PartBuilder {
        PartBuilder::new(identity)
    }

    /// Type identity
    pub fn identity(&self) -> &TypeRef {
        &self.identity
    }

    /// Exports in declaration order
    pub fn exports(&self) -> &[ExportDefinition] {
        &self.exports
    }

    /// Imports in declaration order
    pub fn imports(&self) -> &[ImportDefinition] {
        &self.imports
    }

    /// Sharing scope
    pub fn scope(&self) -> &SharingScope {
        &self.scope
    }

    /// True if the identity carries unbound type parameters
    pub fn is_open_generic(&self) -> bool {
        self.identity.is_open()
    }

    /// Type parameters of the identity, in order
    pub fn type_parameters(&self) -> Vec<String> {
        self.identity.params()
    }

    /// Parameters used by exports or imports but absent from the identity
    pub fn unbound_parameters(&self) -> Vec<String> {
        let declared = self.type_parameters();
        let mut used = Vec::new();
        for export in &self.exports {
            export.contract.collect_params(&mut used);
            export.metadata.collect_params(&mut used);
        }
        for import in &self.imports {
            import.contract.collect_params(&mut used);
        }
        used.retain(|p| !declared.contains(p));
        used
    }

    /// Apply `f` to every type identity in the definition
    pub fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> PartDefinition {
        Self {
            identity: f(&self.identity),
            exports: self.exports.iter().map(|e| e.map_types(f)).collect(),
            imports: self.imports.iter().map(|i| i.map_types(f)).collect(),
            scope: self.scope.clone(),
        }
    }

    /// Produce the closed part for the given type arguments
    ///
    /// Arguments bind the identity's type parameters in order and are
    /// substituted throughout exports, metadata and imports.
    ///
    /// # Errors
    /// - [`Error::NotGeneric`] if the part has no type parameters
    /// - [`Error::ArityMismatch`] if the argument count differs
    /// - [`Error::OpenTypeArgument`] if an argument is itself open
    pub fn specialize(&self, args: &[TypeRef]) -> Result<PartDefinition> {
        let params = self.type_parameters();
        if params.is_empty() {
            return Err(Error::NotGeneric(self.identity.clone()));
        }
        if params.len() != args.len() {
            return Err(Error::ArityMismatch {
                identity: self.identity.clone(),
                expected: params.len(),
                actual: args.len(),
            });
        }
        if let Some(open) = args.iter().find(|a| a.is_open()) {
            return Err(Error::OpenTypeArgument {
                identity: self.identity.clone(),
                argument: open.clone(),
            });
        }
        let bindings: TypeBindings = params.into_iter().zip(args.iter().cloned()).collect();
        Ok(self.map_types(&|t| t.substitute(&bindings)))
    }

    /// Constructor imports ordered by argument position, with their index
    pub fn constructor_imports(&self) -> Vec<(usize, &ImportDefinition)> {
        let mut ctor: Vec<(usize, &ImportDefinition)> = self
            .imports
            .iter()
            .enumerate()
            .filter(|(_, i)| i.site.is_constructor())
            .collect();
        ctor.sort_by_key(|(index, import)| match import.site {
            ImportSite::Constructor { position } => (position, *index),
            ImportSite::Member { .. } => (usize::MAX, *index),
        });
        ctor
    }

    /// Member imports in declaration order, with their index
    pub fn member_imports(&self) -> Vec<(usize, &ImportDefinition)> {
        self.imports
            .iter()
            .enumerate()
            .filter(|(_, i)| !i.site.is_constructor())
            .collect()
    }
}

/// Fluent builder for [`PartDefinition`]
#[derive(Debug, Clone)]
pub struct PartBuilder {
    identity: TypeRef,
    exports: Vec<ExportDefinition>,
    imports: Vec<ImportDefinition>,
    scope: SharingScope,
    next_position: usize,
}

impl PartBuilder {
    /// Create a builder with no exports, no imports and shared scope
    pub fn new(identity: TypeRef) -> Self {
        Self {
            identity,
            exports: Vec::new(),
            imports: Vec::new(),
            scope: SharingScope::shared(),
            next_position: 0,
        }
    }

    /// Add an export
    pub fn export(mut self, export: ExportDefinition) -> Self {
        self.exports.push(export);
        self
    }

    /// Export the part itself under the contract named after its identity
    pub fn export_self(mut self) -> Self {
        self.exports
            .push(ExportDefinition::new(ContractId::from(self.identity.clone())));
        self
    }

    /// Add an import with its site as given
    pub fn import(mut self, import: ImportDefinition) -> Self {
        self.imports.push(import);
        self
    }

    /// Add an import delivered as the next constructor argument
    pub fn constructor_import(mut self, import: ImportDefinition) -> Self {
        let position = self.next_position;
        self.next_position += 1;
        self.imports.push(import.at_constructor(position));
        self
    }

    /// Add an import assigned to member `name` after construction
    pub fn member_import(mut self, name: impl Into<String>, import: ImportDefinition) -> Self {
        self.imports.push(import.at_member(name));
        self
    }

    /// Set the sharing scope
    pub fn scope(mut self, scope: SharingScope) -> Self {
        self.scope = scope;
        self
    }

    /// Shorthand for a non-shared global scope
    pub fn non_shared(self) -> Self {
        self.scope(SharingScope::non_shared())
    }

    /// Finish the definition
    pub fn build(self) -> PartDefinition {
        PartDefinition {
            identity: self.identity,
            exports: self.exports,
            imports: self.imports,
            scope: self.scope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataConstraint;

    fn ty(s: &str) -> TypeRef {
        TypeRef::parse(s).unwrap()
    }

    fn repository_template() -> PartDefinition {
        PartDefinition::builder(ty("Repository<'T>"))
            .export(
                ExportDefinition::new(ContractId::parse("IRepository<'T>").unwrap())
                    .with_metadata("Entity", TypeRef::param("T")),
            )
            .constructor_import(ImportDefinition::exactly_one(
                ContractId::parse("Store<'T>").unwrap(),
            ))
            .build()
    }

    #[test]
    fn test_builder_assigns_constructor_positions() {
        let part = PartDefinition::builder(ty("Service"))
            .constructor_import(ImportDefinition::exactly_one("Logger"))
            .member_import("cache", ImportDefinition::zero_or_one("Cache"))
            .constructor_import(ImportDefinition::zero_or_more("Plugin"))
            .build();
        let ctor = part.constructor_imports();
        assert_eq!(ctor.len(), 2);
        assert_eq!(ctor[0].1.contract.name(), "Logger");
        assert_eq!(ctor[1].1.site, ImportSite::Constructor { position: 1 });
        assert_eq!(part.member_imports().len(), 1);
    }

    #[test]
    fn test_specialize_substitutes_everywhere() {
        let template = repository_template();
        assert!(template.is_open_generic());
        let closed = template.specialize(&[ty("Customer")]).unwrap();
        assert_eq!(closed.identity(), &ty("Repository<Customer>"));
        assert!(!closed.is_open_generic());
        assert_eq!(
            closed.exports()[0].contract,
            ContractId::parse("IRepository<Customer>").unwrap()
        );
        assert_eq!(
            closed.exports()[0].metadata.get("Entity"),
            Some(&MetadataValue::Type(ty("Customer")))
        );
        assert_eq!(
            closed.imports()[0].contract,
            ContractId::parse("Store<Customer>").unwrap()
        );
    }

    #[test]
    fn test_specialize_errors() {
        let template = repository_template();
        assert!(matches!(
            template.specialize(&[ty("A"), ty("B")]),
            Err(Error::ArityMismatch { expected: 1, actual: 2, .. })
        ));
        assert!(matches!(
            template.specialize(&[ty("List<'U>")]),
            Err(Error::OpenTypeArgument { .. })
        ));
        let closed = PartDefinition::builder(ty("Logger")).build();
        assert!(matches!(closed.specialize(&[]), Err(Error::NotGeneric(_))));
    }

    #[test]
    fn test_unbound_parameters() {
        let part = PartDefinition::builder(ty("Broken"))
            .export(ExportDefinition::new(ContractId::parse("Handler<'T>").unwrap()))
            .build();
        assert_eq!(part.unbound_parameters(), vec!["T".to_string()]);
        assert!(repository_template().unbound_parameters().is_empty());
    }

    #[test]
    fn test_source_requirement_admits() {
        let request = SharingScope::shared_in("Request");
        assert!(SourceRequirement::Any.admits(&request));
        assert!(SourceRequirement::SharedOnly.admits(&request));
        assert!(!SourceRequirement::NonSharedOnly.admits(&request));
        assert!(SourceRequirement::Boundary("Request".into()).admits(&request));
        assert!(!SourceRequirement::Boundary("Session".into()).admits(&SharingScope::shared()));
    }

    #[test]
    fn test_import_accepts_metadata() {
        let import = ImportDefinition::zero_or_more("Handler")
            .require(MetadataConstraint::equals("Verb", "GET"));
        assert!(import.accepts_metadata(&Metadata::new().with("Verb", "GET")));
        assert!(!import.accepts_metadata(&Metadata::new().with("Verb", "POST")));
        assert!(ImportDefinition::zero_or_more("Handler").accepts_metadata(&Metadata::new()));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(SharingScope::shared().to_string(), "shared");
        assert_eq!(SharingScope::non_shared_in("Request").to_string(), "non-shared@Request");
    }
}
