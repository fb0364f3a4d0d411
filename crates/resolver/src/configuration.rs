//! Composition configuration
//!
//! The validated but still declarative result of resolving one catalog: the
//! surviving composed parts with their wiring plans, plus every composition
//! error grouped by level. A configuration is immutable once created.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use partwire_core::{
    Catalog, DiscoveryError, ExportSite, ImportCardinality, ImportDefinition, PartDefinition,
    SharingScope, TypeRef, TypeResolver,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::resolver::Resolver;

/// Reference to one export of a composed part
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExportRef {
    /// Identity of the exporting part
    pub part: TypeRef,
    /// Export position within that part
    pub export: usize,
}

/// Exports bound to one import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    /// Import position within the importing part
    pub import: usize,
    /// Bound exports; `ZeroOrMore` keeps export index order
    pub exports: Vec<ExportRef>,
}

/// Wiring plan for one valid part
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPart {
    definition: Arc<PartDefinition>,
    bindings: Vec<ImportBinding>,
    specialization_of: Option<TypeRef>,
}

impl ComposedPart {
    pub(crate) fn new(
        definition: Arc<PartDefinition>,
        bindings: Vec<ImportBinding>,
        specialization_of: Option<TypeRef>,
    ) -> Self {
        Self {
            definition,
            bindings,
            specialization_of,
        }
    }

    /// Part identity
    pub fn identity(&self) -> &TypeRef {
        self.definition.identity()
    }

    /// Canonical part definition (specialized for generic parts)
    pub fn definition(&self) -> &Arc<PartDefinition> {
        &self.definition
    }

    /// Resolved sharing scope
    pub fn scope(&self) -> &SharingScope {
        self.definition.scope()
    }

    /// Bindings in construction order: constructor arguments by position,
    /// then member assignments in declaration order
    pub fn bindings(&self) -> &[ImportBinding] {
        &self.bindings
    }

    /// Binding of the import at `import` position
    pub fn binding(&self, import: usize) -> Option<&ImportBinding> {
        self.bindings.iter().find(|b| b.import == import)
    }

    /// Import definition behind a binding
    pub fn import_of(&self, binding: &ImportBinding) -> Option<&ImportDefinition> {
        self.definition.imports().get(binding.import)
    }

    /// Open-generic template this part was specialized from
    pub fn specialization_of(&self) -> Option<&TypeRef> {
        self.specialization_of.as_ref()
    }
}

/// Category of a composition error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompositionErrorKind {
    /// A required import found no export with its contract
    MissingExport,
    /// More exports matched than the cardinality allows
    AmbiguousExports,
    /// Exports exist but none satisfies the metadata constraints
    MetadataMismatch,
    /// Exports exist but none lives in a visible sharing scope
    SharingBoundaryViolation,
    /// Parts require each other as eager constructor arguments
    ConstructorCycle,
    /// An eager cycle passes through a non-shared part
    NonSharedCycle,
    /// Specialization would nest type arguments too deeply
    GenericDepthExceeded,
    /// Every export a required import depends on was rejected
    DependencyRejected,
}

impl fmt::Display for CompositionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A validation failure that removes parts from the configuration
///
/// Level 1 errors are intrinsic to a part; level N errors exist only because
/// parts were removed at level N-1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionError {
    /// Category
    pub kind: CompositionErrorKind,
    /// Human-readable description
    pub message: String,
    /// Implicated parts; the rejected part comes first
    pub parts: Vec<TypeRef>,
    /// Removal stage, starting at 1
    pub level: u32,
}

impl fmt::Display for CompositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[level {}] {}: {}", self.level, self.kind, self.message)
    }
}

/// Resolved composition of one catalog snapshot
#[derive(Debug, Clone)]
pub struct Configuration {
    parts: Vec<ComposedPart>,
    by_identity: FxHashMap<TypeRef, usize>,
    errors: Vec<CompositionError>,
    rejected: BTreeMap<TypeRef, u32>,
    discovery_errors: Vec<DiscoveryError>,
}

impl Configuration {
    /// Resolve `catalog` with default settings
    ///
    /// Discovery errors are logged and skipped, so this cannot fail.
    pub fn create(catalog: &Catalog) -> Self {
        Resolver::new(&ResolverConfig::default()).resolve_lenient(catalog)
    }

    /// Resolve `catalog` with explicit settings
    ///
    /// # Errors
    ///
    /// [`crate::ResolverError::DiscoveryFailed`] if the catalog carries
    /// discovery errors under the fatal policy.
    pub fn create_with(catalog: &Catalog, config: &ResolverConfig) -> Result<Self> {
        Resolver::new(config).resolve(catalog)
    }

    /// Resolve `catalog` with explicit settings and type resolution
    ///
    /// # Errors
    ///
    /// Same as [`Configuration::create_with`].
    pub fn create_with_resolver(
        catalog: &Catalog,
        config: &ResolverConfig,
        type_resolver: &dyn TypeResolver,
    ) -> Result<Self> {
        Resolver::new(config)
            .with_type_resolver(type_resolver)
            .resolve(catalog)
    }

    pub(crate) fn from_parts(
        parts: Vec<ComposedPart>,
        mut errors: Vec<CompositionError>,
        rejected: BTreeMap<TypeRef, u32>,
        discovery_errors: Vec<DiscoveryError>,
    ) -> Self {
        errors.sort_by(|a, b| {
            (a.level, &a.message, a.kind).cmp(&(b.level, &b.message, b.kind))
        });
        let by_identity = parts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.identity().clone(), i))
            .collect();
        Self {
            parts,
            by_identity,
            errors,
            rejected,
            discovery_errors,
        }
    }

    /// Valid composed parts: catalog order, then specializations in creation order
    pub fn parts(&self) -> &[ComposedPart] {
        &self.parts
    }

    /// Look up a composed part by canonical identity
    pub fn part(&self, identity: &TypeRef) -> Option<&ComposedPart> {
        self.part_index(identity).map(|i| &self.parts[i])
    }

    /// Position of a composed part in [`Configuration::parts`]
    pub fn part_index(&self, identity: &TypeRef) -> Option<usize> {
        self.by_identity.get(identity).copied()
    }

    /// Composition errors sorted by level, then message
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Composition errors grouped by level
    pub fn errors_by_level(&self) -> BTreeMap<u32, Vec<&CompositionError>> {
        let mut levels: BTreeMap<u32, Vec<&CompositionError>> = BTreeMap::new();
        for error in &self.errors {
            levels.entry(error.level).or_default().push(error);
        }
        levels
    }

    /// Highest error level, 0 when there are no errors
    pub fn max_error_level(&self) -> u32 {
        self.errors.iter().map(|e| e.level).max().unwrap_or(0)
    }

    /// Level at which a part was removed, `None` if it was not
    pub fn error_level(&self, identity: &TypeRef) -> Option<u32> {
        self.rejected.get(identity).copied()
    }

    /// Parts removed from the configuration with their levels
    pub fn rejected_parts(&self) -> &BTreeMap<TypeRef, u32> {
        &self.rejected
    }

    /// True if resolution produced no composition errors
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Discovery errors carried over from the catalog
    pub fn discovery_errors(&self) -> &[DiscoveryError] {
        &self.discovery_errors
    }

    /// Deterministic text rendering for diff-based comparison
    ///
    /// Parts are sorted by identity, `ZeroOrMore` bindings by exporter, and
    /// errors by level then message, so equivalent catalogs render
    /// identically whatever order their parts were added in.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut parts: Vec<&ComposedPart> = self.parts.iter().collect();
        parts.sort_by(|a, b| a.identity().cmp(b.identity()));

        let _ = writeln!(out, "parts: {}", parts.len());
        for part in parts {
            let _ = write!(out, "  {} [{}]", part.identity(), part.scope());
            if let Some(template) = part.specialization_of() {
                let _ = write!(out, " specializes {}", template);
            }
            out.push('\n');
            for export in part.definition().exports() {
                let _ = write!(out, "    export {}", export.contract);
                if let ExportSite::Member { name } = &export.site {
                    let _ = write!(out, " via {}", name);
                }
                if !export.metadata.is_empty() {
                    let _ = write!(out, " {}", export.metadata);
                }
                out.push('\n');
            }
            for binding in part.bindings() {
                let Some(import) = part.import_of(binding) else {
                    continue;
                };
                let mut exports = binding.exports.clone();
                if import.cardinality == ImportCardinality::ZeroOrMore {
                    exports.sort();
                }
                let sources: Vec<String> = exports
                    .iter()
                    .map(|e| format!("{}#{}", e.part, e.export))
                    .collect();
                let _ = writeln!(
                    out,
                    "    import {} ({}, {}{}) <- [{}]",
                    import.contract,
                    import.cardinality,
                    import.site,
                    if import.lazy { ", lazy" } else { "" },
                    sources.join(", ")
                );
            }
        }

        let _ = writeln!(out, "errors: {}", self.errors.len());
        for error in &self.errors {
            let _ = writeln!(out, "  {}", error);
        }
        out
    }
}
