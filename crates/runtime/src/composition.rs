//! Runtime composition
//!
//! A configuration references parts by identity. The runtime composition
//! flattens it: every import source becomes a direct `(part, export)` index
//! pair, constructor arguments are ordered by position, and the construction
//! order is computed once. The result is immutable and serializable, so it
//! can be persisted and executed many times without re-resolving.
//!
//! ## Construction groups
//!
//! Shared parts are partitioned into groups: the strongly connected
//! components of eager edges (constructor arguments and non-lazy member
//! assignments). A group is constructed and published as one unit, which is
//! what lets shared parts wire each other through members while keeping the
//! at-most-once guarantee under concurrent requests. Non-shared parts have
//! no group.

use partwire_core::{
    ContractId, ExportSite, ImportCardinality, ImportSite, Metadata, SharingScope, TypeRef,
};
use partwire_resolver::{ComposedPart, Configuration, Dependency, DependencyGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::BuildError;

/// Direct address of an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExportLocation {
    /// Part index in [`RuntimeComposition::parts`]
    pub part: usize,
    /// Export index within the part
    pub export: usize,
}

/// An export with fully materialized metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeExport {
    /// Contract offered
    pub contract: ContractId,
    /// Part itself or one of its members
    pub site: ExportSite,
    /// Export metadata
    pub metadata: Metadata,
}

/// An import with its sources resolved to indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeImport {
    /// Contract requested
    pub contract: ContractId,
    /// Accepted number of exports
    pub cardinality: ImportCardinality,
    /// Delivered as a deferred accessor
    pub lazy: bool,
    /// Constructor argument or member
    pub site: ImportSite,
    /// Bound exports
    pub sources: Vec<ExportLocation>,
}

impl RuntimeImport {
    /// Delivery flags as a graph edge label
    pub fn dependency(&self) -> Dependency {
        Dependency {
            constructor: self.site.is_constructor(),
            lazy: self.lazy,
        }
    }
}

/// Execution plan for one part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimePart {
    /// Part identity
    pub identity: TypeRef,
    /// Sharing scope
    pub scope: SharingScope,
    /// Template for specialized generic parts
    pub specialization_of: Option<TypeRef>,
    /// Exports in declaration order
    pub exports: Vec<RuntimeExport>,
    /// Constructor imports by argument position
    pub constructor: Vec<RuntimeImport>,
    /// Member imports in declaration order
    pub members: Vec<RuntimeImport>,
    /// Construction group, `None` for non-shared parts
    pub group: Option<usize>,
}

impl RuntimePart {
    /// Constructor imports followed by member imports
    pub fn imports(&self) -> impl Iterator<Item = &RuntimeImport> {
        self.constructor.iter().chain(&self.members)
    }
}

/// Exports of one contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractExports {
    /// Contract
    pub contract: ContractId,
    /// Exports in part order
    pub exports: Vec<ExportLocation>,
}

/// Flattened, execution-ready composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeComposition {
    parts: Vec<RuntimePart>,
    construction_order: Vec<usize>,
    groups: Vec<Vec<usize>>,
    contracts: Vec<ContractExports>,
}

impl RuntimeComposition {
    /// Lower a configuration without composition errors
    ///
    /// # Errors
    ///
    /// - [`BuildError::ConfigurationHasErrors`] if the configuration is invalid
    /// - [`BuildError::DanglingReference`] if a binding names an unknown part
    /// - [`BuildError::ConstructorCycle`] / [`BuildError::NonSharedCycle`] if
    ///   the wiring contradicts the resolver's cycle rules
    pub fn build(configuration: &Configuration) -> Result<Self, BuildError> {
        if let Some(first) = configuration.errors().first() {
            return Err(BuildError::ConfigurationHasErrors {
                count: configuration.errors().len(),
                first: first.to_string(),
            });
        }

        let mut parts = configuration
            .parts()
            .iter()
            .map(|composed| lower_part(configuration, composed))
            .collect::<Result<Vec<_>, _>>()?;

        let graph = dependency_graph(&parts);
        let construction_order = graph
            .construction_order()
            .ok_or_else(|| constructor_cycle(&graph, &parts))?;
        let groups = assign_groups(&graph, &construction_order, &mut parts)?;
        let contracts = index_contracts(&parts);

        let composition = Self {
            parts,
            construction_order,
            groups,
            contracts,
        };
        info!(
            target: "partwire::runtime",
            parts = composition.parts.len(),
            groups = composition.groups.len(),
            contracts = composition.contracts.len(),
            "Built runtime composition"
        );
        Ok(composition)
    }

    /// Parts in configuration order
    pub fn parts(&self) -> &[RuntimePart] {
        &self.parts
    }

    /// Part at `index`
    pub fn part(&self, index: usize) -> Option<&RuntimePart> {
        self.parts.get(index)
    }

    /// Index of the part with this identity
    pub fn part_index(&self, identity: &TypeRef) -> Option<usize> {
        self.parts.iter().position(|p| &p.identity == identity)
    }

    /// Part indices, constructor dependencies first
    pub fn construction_order(&self) -> &[usize] {
        &self.construction_order
    }

    /// Construction groups; members in construction order
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Exports of `contract` in part order
    pub fn exports_for(&self, contract: &ContractId) -> &[ExportLocation] {
        self.contracts
            .binary_search_by(|c| c.contract.cmp(contract))
            .map(|i| self.contracts[i].exports.as_slice())
            .unwrap_or(&[])
    }

    /// Export definition at `location`
    pub fn export(&self, location: ExportLocation) -> Option<&RuntimeExport> {
        self.parts.get(location.part)?.exports.get(location.export)
    }

    /// Check every index against the composition's own tables
    ///
    /// Used after decoding a persisted composition.
    pub fn validate(&self) -> Result<(), BuildError> {
        let count = self.parts.len();
        let dangling = |part: &TypeRef, reference: String| BuildError::DanglingReference {
            part: part.clone(),
            reference,
        };
        let root = TypeRef::named("<composition>");

        for (index, part) in self.parts.iter().enumerate() {
            for import in part.imports() {
                for &source in &import.sources {
                    if self.export(source).is_none() {
                        return Err(dangling(
                            &part.identity,
                            format!("export {}#{}", source.part, source.export),
                        ));
                    }
                }
            }
            if let Some(group) = part.group {
                if self.groups.get(group).map_or(true, |g| !g.contains(&index)) {
                    return Err(dangling(&part.identity, format!("group {}", group)));
                }
            }
        }

        let mut seen = vec![false; count];
        for &index in &self.construction_order {
            if seen.get(index) != Some(&false) {
                return Err(dangling(&root, format!("construction order entry {}", index)));
            }
            seen[index] = true;
        }
        if seen.iter().any(|s| !s) {
            return Err(dangling(&root, "incomplete construction order".to_string()));
        }

        for (g, members) in self.groups.iter().enumerate() {
            for &member in members {
                if self.parts.get(member).and_then(|p| p.group) != Some(g) {
                    return Err(dangling(&root, format!("group {} member {}", g, member)));
                }
            }
        }
        if self.contracts.windows(2).any(|w| w[0].contract >= w[1].contract) {
            return Err(dangling(&root, "unsorted contract table".to_string()));
        }
        for entry in &self.contracts {
            for &location in &entry.exports {
                if self.export(location).map(|e| &e.contract) != Some(&entry.contract) {
                    return Err(dangling(
                        &root,
                        format!("contract {} export {}#{}", entry.contract, location.part, location.export),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn lower_part(configuration: &Configuration, composed: &ComposedPart) -> Result<RuntimePart, BuildError> {
    let definition = composed.definition();
    let mut constructor = Vec::new();
    let mut members = Vec::new();

    for binding in composed.bindings() {
        let import = composed
            .import_of(binding)
            .ok_or_else(|| BuildError::DanglingReference {
                part: composed.identity().clone(),
                reference: format!("import {}", binding.import),
            })?;
        let sources = binding
            .exports
            .iter()
            .map(|export| {
                configuration
                    .part_index(&export.part)
                    .filter(|&part| configuration.parts()[part].definition().exports().len() > export.export)
                    .map(|part| ExportLocation {
                        part,
                        export: export.export,
                    })
                    .ok_or_else(|| BuildError::DanglingReference {
                        part: composed.identity().clone(),
                        reference: format!("export {}#{}", export.part, export.export),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let lowered = RuntimeImport {
            contract: import.contract.clone(),
            cardinality: import.cardinality,
            lazy: import.lazy,
            site: import.site.clone(),
            sources,
        };
        if import.site.is_constructor() {
            constructor.push(lowered);
        } else {
            members.push(lowered);
        }
    }

    Ok(RuntimePart {
        identity: composed.identity().clone(),
        scope: composed.scope().clone(),
        specialization_of: composed.specialization_of().cloned(),
        exports: definition
            .exports()
            .iter()
            .map(|e| RuntimeExport {
                contract: e.contract.clone(),
                site: e.site.clone(),
                metadata: e.metadata.clone(),
            })
            .collect(),
        constructor,
        members,
        group: None,
    })
}

fn dependency_graph(parts: &[RuntimePart]) -> DependencyGraph {
    let mut graph = DependencyGraph::new(parts.len());
    for (index, part) in parts.iter().enumerate() {
        for import in part.imports() {
            for source in &import.sources {
                graph.add_dependency(index, source.part, import.dependency());
            }
        }
    }
    graph
}

fn constructor_cycle(graph: &DependencyGraph, parts: &[RuntimePart]) -> BuildError {
    let rank: Vec<usize> = (0..parts.len()).collect();
    let members = graph
        .constructor_cycles(&rank)
        .into_iter()
        .next()
        .map(|cycle| cycle.members)
        .unwrap_or_default();
    BuildError::ConstructorCycle {
        parts: members.iter().map(|&p| parts[p].identity.clone()).collect(),
    }
}

/// Group shared parts by eager strongly connected component
fn assign_groups(
    graph: &DependencyGraph,
    construction_order: &[usize],
    parts: &mut [RuntimePart],
) -> Result<Vec<Vec<usize>>, BuildError> {
    let mut position = vec![0usize; parts.len()];
    for (i, &part) in construction_order.iter().enumerate() {
        position[part] = i;
    }

    let mut groups = Vec::new();
    for mut component in graph.eager_components() {
        let shared = component.iter().all(|&p| parts[p].scope.is_shared());
        if !shared {
            let cyclic = component.len() > 1
                || graph
                    .dependencies_of(component[0], Dependency::is_eager)
                    .contains(&component[0]);
            if cyclic {
                return Err(BuildError::NonSharedCycle {
                    parts: component.iter().map(|&p| parts[p].identity.clone()).collect(),
                });
            }
            continue;
        }
        component.sort_by_key(|&p| position[p]);
        let group = groups.len();
        for &member in &component {
            parts[member].group = Some(group);
        }
        groups.push(component);
    }
    Ok(groups)
}

fn index_contracts(parts: &[RuntimePart]) -> Vec<ContractExports> {
    let mut contracts: BTreeMap<ContractId, Vec<ExportLocation>> = BTreeMap::new();
    for (part, definition) in parts.iter().enumerate() {
        for (export, e) in definition.exports.iter().enumerate() {
            contracts
                .entry(e.contract.clone())
                .or_default()
                .push(ExportLocation { part, export });
        }
    }
    contracts
        .into_iter()
        .map(|(contract, exports)| ContractExports { contract, exports })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use partwire_core::{Catalog, ExportDefinition, ImportDefinition, PartDefinition};

    fn ty(s: &str) -> TypeRef {
        TypeRef::parse(s).unwrap()
    }

    fn logger_service() -> Catalog {
        Catalog::from_parts([
            PartDefinition::builder(ty("Service"))
                .export_self()
                .constructor_import(ImportDefinition::exactly_one("Logger"))
                .build(),
            PartDefinition::builder(ty("Logger")).export_self().build(),
        ])
    }

    #[test]
    fn test_construction_order_puts_dependencies_first() {
        let composition =
            RuntimeComposition::build(&Configuration::create(&logger_service())).unwrap();
        let order: Vec<String> = composition
            .construction_order()
            .iter()
            .map(|&i| composition.parts()[i].identity.to_string())
            .collect();
        assert_eq!(order, vec!["Logger", "Service"]);
        assert!(composition.validate().is_ok());
    }

    #[test]
    fn test_sources_are_direct_indices() {
        let composition =
            RuntimeComposition::build(&Configuration::create(&logger_service())).unwrap();
        let service = &composition.parts()[0];
        assert_eq!(
            service.constructor[0].sources,
            vec![ExportLocation { part: 1, export: 0 }]
        );
        assert_eq!(
            composition.exports_for(&ContractId::new("Logger")),
            &[ExportLocation { part: 1, export: 0 }]
        );
        assert!(composition.exports_for(&ContractId::new("Missing")).is_empty());
    }

    #[test]
    fn test_invalid_configuration_is_refused() {
        let catalog = Catalog::from_parts([PartDefinition::builder(ty("Orphan"))
            .constructor_import(ImportDefinition::exactly_one("Nothing"))
            .build()]);
        let err = RuntimeComposition::build(&Configuration::create(&catalog)).unwrap_err();
        assert!(matches!(err, BuildError::ConfigurationHasErrors { count: 1, .. }));
    }

    #[test]
    fn test_member_cycle_forms_one_group() {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("A"))
                .export_self()
                .member_import("b", ImportDefinition::exactly_one("B"))
                .build(),
            PartDefinition::builder(ty("B"))
                .export_self()
                .constructor_import(ImportDefinition::exactly_one("A"))
                .build(),
            PartDefinition::builder(ty("Fresh"))
                .export_self()
                .non_shared()
                .build(),
        ]);
        let composition = RuntimeComposition::build(&Configuration::create(&catalog)).unwrap();
        assert_eq!(composition.groups(), &[vec![0, 1]]);
        assert_eq!(composition.parts()[2].group, None);
    }

    #[test]
    fn test_validate_detects_dangling_source() {
        let mut composition =
            RuntimeComposition::build(&Configuration::create(&logger_service())).unwrap();
        composition.parts[0].constructor[0].sources[0].part = 7;
        assert!(matches!(
            composition.validate(),
            Err(BuildError::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_export_metadata_is_materialized() {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("Repository<'T>"))
                .export(
                    ExportDefinition::new(ContractId::parse("IRepository<'T>").unwrap())
                        .with_metadata("Entity", TypeRef::param("T")),
                )
                .build(),
            PartDefinition::builder(ty("Orders"))
                .constructor_import(ImportDefinition::exactly_one(
                    ContractId::parse("IRepository<Order>").unwrap(),
                ))
                .build(),
        ]);
        let composition = RuntimeComposition::build(&Configuration::create(&catalog)).unwrap();
        let index = composition.part_index(&ty("Repository<Order>")).unwrap();
        let part = &composition.parts()[index];
        assert_eq!(part.specialization_of, Some(ty("Repository<'T>")));
        assert_eq!(
            part.exports[0].metadata.get("Entity"),
            Some(&partwire_core::MetadataValue::Type(ty("Order")))
        );
    }
}
