//! Export/import index
//!
//! Built once per catalog: canonicalizes every part through the session's
//! [`TypeResolver`], then maps each contract name to its exports and its
//! importers in catalog order. The index is never mutated afterwards, so the
//! resolver can share it across worker threads.

use std::sync::Arc;

use partwire_core::{
    Catalog, DiscoveryError, ExportDefinition, ImportDefinition, PartDefinition, TypeRef,
    TypeResolver,
};
use rustc_hash::FxHashMap;

/// Address of an export: part position plus export position within the part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExportSlot {
    /// Part position
    pub part: usize,
    /// Export position within the part
    pub export: usize,
}

/// Address of an import: part position plus import position within the part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportSlot {
    /// Part position
    pub part: usize,
    /// Import position within the part
    pub import: usize,
}

/// Contract name lookups over a canonicalized catalog
#[derive(Debug, Clone, Default)]
pub struct ExportIndex {
    parts: Vec<Arc<PartDefinition>>,
    by_identity: FxHashMap<TypeRef, usize>,
    exports: FxHashMap<String, Vec<ExportSlot>>,
    importers: FxHashMap<String, Vec<ImportSlot>>,
    collisions: Vec<DiscoveryError>,
}

impl ExportIndex {
    /// Index every part of `catalog` after canonicalizing it
    ///
    /// Two parts whose identities canonicalize to the same type keep the
    /// first one; the later one is reported through [`ExportIndex::collisions`].
    pub fn build(catalog: &Catalog, resolver: &dyn TypeResolver) -> Self {
        let mut index = Self::default();
        for part in catalog.parts() {
            let canonical = resolver.canonicalize_part(part);
            let part = if canonical == **part {
                Arc::clone(part)
            } else {
                Arc::new(canonical)
            };
            if index.by_identity.contains_key(part.identity()) {
                index.collisions.push(DiscoveryError::DuplicatePart {
                    identity: part.identity().clone(),
                });
                continue;
            }

            let position = index.parts.len();
            for (export, definition) in part.exports().iter().enumerate() {
                index
                    .exports
                    .entry(definition.contract.name().to_string())
                    .or_default()
                    .push(ExportSlot {
                        part: position,
                        export,
                    });
            }
            for (import, definition) in part.imports().iter().enumerate() {
                index
                    .importers
                    .entry(definition.contract.name().to_string())
                    .or_default()
                    .push(ImportSlot {
                        part: position,
                        import,
                    });
            }
            index.by_identity.insert(part.identity().clone(), position);
            index.parts.push(part);
        }
        index
    }

    /// Canonical parts in catalog order
    pub fn parts(&self) -> &[Arc<PartDefinition>] {
        &self.parts
    }

    /// Part at `position`
    pub fn part(&self, position: usize) -> Option<&Arc<PartDefinition>> {
        self.parts.get(position)
    }

    /// Position of the part with this canonical identity
    pub fn position(&self, identity: &TypeRef) -> Option<usize> {
        self.by_identity.get(identity).copied()
    }

    /// Exports offering a contract with this name, in catalog order
    pub fn exports_of(&self, contract: &str) -> &[ExportSlot] {
        self.exports.get(contract).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Imports requesting a contract with this name, in catalog order
    pub fn importers_of(&self, contract: &str) -> &[ImportSlot] {
        self.importers.get(contract).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Export definition at `slot`
    pub fn export(&self, slot: ExportSlot) -> Option<&ExportDefinition> {
        self.parts.get(slot.part)?.exports().get(slot.export)
    }

    /// Import definition at `slot`
    pub fn import(&self, slot: ImportSlot) -> Option<&ImportDefinition> {
        self.parts.get(slot.part)?.imports().get(slot.import)
    }

    /// Identity collisions introduced by canonicalization
    pub fn collisions(&self) -> &[DiscoveryError] {
        &self.collisions
    }

    /// Number of indexed parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True if no part was indexed
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
