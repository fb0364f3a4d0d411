//! Graph resolution
//!
//! Resolution runs in rounds. Each round matches every import of a frontier
//! of parts against the [`ExportIndex`]; matching is a pure function of one
//! part and may run on the rayon pool. Imports that can only be satisfied by
//! an open-generic template yield pending candidates, which are turned into
//! specialized parts sequentially and in frontier order after the round. The
//! new specializations form the next frontier, so the outcome never depends
//! on thread scheduling.
//!
//! Once every part is matched, removal is leveled: level 1 rejects parts with
//! intrinsic problems (cardinality, metadata, sharing scope, eager cycles),
//! and each following level rejects parts whose required imports lost every
//! export to the previous level, until nothing changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use partwire_core::{
    Catalog, DiscoveryError, IdentityResolver, ImportCardinality, ImportDefinition,
    PartDefinition, SharingScope, TypeBindings, TypeRef, TypeResolver,
};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryErrorPolicy, ResolverConfig};
use crate::configuration::{
    ComposedPart, CompositionError, CompositionErrorKind, Configuration, ExportRef, ImportBinding,
};
use crate::error::{ResolverError, Result};
use crate::graph::{Dependency, DependencyGraph};
use crate::index::{ExportIndex, ExportSlot};

static IDENTITY: IdentityResolver = IdentityResolver;

/// One resolution session: settings plus the injected type resolution
pub(crate) struct Resolver<'a> {
    config: ResolverConfig,
    type_resolver: &'a dyn TypeResolver,
}

impl Resolver<'static> {
    pub(crate) fn new(config: &ResolverConfig) -> Self {
        Self {
            config: config.clone(),
            type_resolver: &IDENTITY,
        }
    }
}

impl<'a> Resolver<'a> {
    pub(crate) fn with_type_resolver<'b>(self, type_resolver: &'b dyn TypeResolver) -> Resolver<'b> {
        Resolver {
            config: self.config,
            type_resolver,
        }
    }

    /// Resolve under the configured discovery error policy
    pub(crate) fn resolve(&self, catalog: &Catalog) -> Result<Configuration> {
        let (index, discovery_errors) = self.discover(catalog);
        if self.config.discovery_errors == DiscoveryErrorPolicy::Fatal {
            if let Some(first) = discovery_errors.first() {
                return Err(ResolverError::DiscoveryFailed {
                    count: discovery_errors.len(),
                    first: first.clone(),
                });
            }
        }
        Ok(self.compose(&index, discovery_errors))
    }

    /// Resolve, logging discovery errors whatever the policy says
    pub(crate) fn resolve_lenient(&self, catalog: &Catalog) -> Configuration {
        let (index, discovery_errors) = self.discover(catalog);
        self.compose(&index, discovery_errors)
    }

    fn discover(&self, catalog: &Catalog) -> (ExportIndex, Vec<DiscoveryError>) {
        let index = ExportIndex::build(catalog, self.type_resolver);
        let mut errors = catalog.discovery_errors().to_vec();
        errors.extend(index.collisions().iter().cloned());
        (index, errors)
    }

    fn compose(&self, index: &ExportIndex, discovery_errors: Vec<DiscoveryError>) -> Configuration {
        for error in &discovery_errors {
            warn!(target: "partwire::resolver", error = %error, "Discovery error, part skipped");
        }
        let mut session = Session::new(index, &self.config);
        session.match_imports();
        let (levels, errors) = session.level();
        session.into_configuration(levels, errors, discovery_errors)
    }
}

// ============================================================================
// Matching
// ============================================================================

/// An export accepted for an import before specialization
#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Resolved(ExportSlot),
    Pending {
        template: usize,
        export: usize,
        args: Vec<TypeRef>,
    },
}

#[derive(Debug, Default)]
struct ImportMatch {
    candidates: Vec<Candidate>,
    rejected_by_metadata: usize,
    rejected_by_boundary: usize,
    depth_exceeded: Option<TypeRef>,
}

/// Import outcome once pending candidates became parts
#[derive(Debug, Default)]
struct ResolvedImport {
    exports: Vec<ExportSlot>,
    rejected_by_metadata: usize,
    rejected_by_boundary: usize,
    depth_exceeded: Option<TypeRef>,
}

#[derive(Clone, Copy)]
struct Matcher<'a> {
    index: &'a ExportIndex,
    max_generic_depth: usize,
}

impl Matcher<'_> {
    fn match_part(&self, part: &PartDefinition) -> Vec<ImportMatch> {
        part.imports()
            .iter()
            .map(|import| self.match_import(part.scope(), import))
            .collect()
    }

    /// Closed exports win; templates are only consulted when none survives
    fn match_import(&self, importer: &SharingScope, import: &ImportDefinition) -> ImportMatch {
        let mut result = ImportMatch::default();
        let slots = self.index.exports_of(import.contract.name());

        for &slot in slots {
            let Some(exporter) = self.index.part(slot.part) else {
                continue;
            };
            if exporter.is_open_generic() {
                continue;
            }
            let Some(export) = exporter.exports().get(slot.export) else {
                continue;
            };
            if export.contract != import.contract {
                continue;
            }
            if !visible(importer, import, exporter.scope()) {
                result.rejected_by_boundary += 1;
                continue;
            }
            if !import.accepts_metadata(&export.metadata) {
                result.rejected_by_metadata += 1;
                continue;
            }
            result.candidates.push(Candidate::Resolved(slot));
        }
        if !result.candidates.is_empty() {
            return result;
        }

        for &slot in slots {
            let Some(template) = self.index.part(slot.part) else {
                continue;
            };
            if !template.is_open_generic() {
                continue;
            }
            let Some(export) = template.exports().get(slot.export) else {
                continue;
            };
            let mut bindings = TypeBindings::new();
            if !export.contract.unify(&import.contract, &mut bindings) {
                continue;
            }
            let Some(args) = template
                .type_parameters()
                .iter()
                .map(|p| bindings.get(p).cloned())
                .collect::<Option<Vec<TypeRef>>>()
            else {
                continue;
            };
            if args.iter().any(|a| a.depth() > self.max_generic_depth) {
                let identity = template.identity().substitute(&bindings);
                result.depth_exceeded = match result.depth_exceeded.take() {
                    Some(current) if current <= identity => Some(current),
                    _ => Some(identity),
                };
                continue;
            }
            if !visible(importer, import, template.scope()) {
                result.rejected_by_boundary += 1;
                continue;
            }
            let metadata = export.metadata.map_types(&|t| t.substitute(&bindings));
            if !import.accepts_metadata(&metadata) {
                result.rejected_by_metadata += 1;
                continue;
            }
            result.candidates.push(Candidate::Pending {
                template: slot.part,
                export: slot.export,
                args,
            });
        }
        result
    }
}

/// Boundary visibility plus the importer's source requirement
fn visible(importer: &SharingScope, import: &ImportDefinition, exporter: &SharingScope) -> bool {
    let in_boundary = match &exporter.boundary {
        None => true,
        Some(boundary) => importer.boundary.as_ref() == Some(boundary),
    };
    in_boundary && import.source.admits(exporter)
}

// ============================================================================
// Session
// ============================================================================

struct Session<'a> {
    index: &'a ExportIndex,
    max_generic_depth: usize,
    parallel: bool,
    /// Canonical catalog parts followed by specializations
    parts: Vec<Arc<PartDefinition>>,
    /// Template position for specializations
    templates: Vec<Option<usize>>,
    /// Resolved imports; `None` for open templates
    imports: Vec<Option<Vec<ResolvedImport>>>,
    identities: FxHashMap<TypeRef, usize>,
    specializations: FxHashMap<(usize, Vec<TypeRef>), usize>,
}

impl<'a> Session<'a> {
    fn new(index: &'a ExportIndex, config: &ResolverConfig) -> Self {
        let parts = index.parts().to_vec();
        let identities = parts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.identity().clone(), i))
            .collect();
        Self {
            index,
            max_generic_depth: config.max_generic_depth,
            parallel: config.parallel,
            templates: vec![None; parts.len()],
            imports: (0..parts.len()).map(|_| None).collect(),
            parts,
            identities,
            specializations: FxHashMap::default(),
        }
    }

    fn match_imports(&mut self) {
        let mut frontier: Vec<usize> = (0..self.parts.len())
            .filter(|&p| !self.parts[p].is_open_generic())
            .collect();
        let mut round = 0usize;

        while !frontier.is_empty() {
            round += 1;
            let matcher = Matcher {
                index: self.index,
                max_generic_depth: self.max_generic_depth,
            };
            let parts = &self.parts;
            let matched: Vec<(usize, Vec<ImportMatch>)> = if self.parallel {
                frontier
                    .par_iter()
                    .map(|&p| (p, matcher.match_part(&parts[p])))
                    .collect()
            } else {
                frontier
                    .iter()
                    .map(|&p| (p, matcher.match_part(&parts[p])))
                    .collect()
            };

            let mut next = Vec::new();
            for (part, matches) in matched {
                let resolved = matches
                    .into_iter()
                    .map(|m| self.materialize(m, &mut next))
                    .collect();
                self.imports[part] = Some(resolved);
            }
            debug!(
                target: "partwire::resolver",
                round,
                parts = frontier.len(),
                specialized = next.len(),
                "Matched resolution round"
            );
            frontier = next;
        }
    }

    fn materialize(&mut self, matched: ImportMatch, next: &mut Vec<usize>) -> ResolvedImport {
        let mut exports = Vec::with_capacity(matched.candidates.len());
        for candidate in matched.candidates {
            match candidate {
                Candidate::Resolved(slot) => exports.push(slot),
                Candidate::Pending {
                    template,
                    export,
                    args,
                } => {
                    if let Some(part) = self.specialize(template, args, next) {
                        exports.push(ExportSlot { part, export });
                    }
                }
            }
        }
        ResolvedImport {
            exports,
            rejected_by_metadata: matched.rejected_by_metadata,
            rejected_by_boundary: matched.rejected_by_boundary,
            depth_exceeded: matched.depth_exceeded,
        }
    }

    /// Cached specialization of `template` for `args`
    fn specialize(&mut self, template: usize, args: Vec<TypeRef>, next: &mut Vec<usize>) -> Option<usize> {
        let key = (template, args);
        if let Some(&part) = self.specializations.get(&key) {
            return Some(part);
        }
        let source = self.parts.get(template)?;
        let definition = match source.specialize(&key.1) {
            Ok(definition) => definition,
            Err(e) => {
                warn!(target: "partwire::resolver", template = %source.identity(), error = %e, "Specialization failed");
                return None;
            }
        };
        if self.identities.contains_key(definition.identity()) {
            debug!(
                target: "partwire::resolver",
                part = %definition.identity(),
                "Specialization shadowed by an existing part"
            );
            return None;
        }

        let position = self.parts.len();
        debug!(
            target: "partwire::resolver",
            part = %definition.identity(),
            template = %source.identity(),
            "Specialized open-generic part"
        );
        self.identities
            .insert(definition.identity().clone(), position);
        self.parts.push(Arc::new(definition));
        self.templates.push(Some(template));
        self.imports.push(None);
        self.specializations.insert(key, position);
        next.push(position);
        Some(position)
    }

    // ------------------------------------------------------------------------
    // Leveling
    // ------------------------------------------------------------------------

    /// Removal level per part plus the errors that caused it
    fn level(&self) -> (Vec<Option<u32>>, Vec<CompositionError>) {
        let mut levels: Vec<Option<u32>> = vec![None; self.parts.len()];
        let mut errors = Vec::new();
        let mut removed = Vec::new();

        for (part, imports) in self.composable() {
            for (position, resolved) in imports.iter().enumerate() {
                if let Some(error) = self.check_cardinality(part, position, resolved) {
                    errors.push(error);
                    removed.push(part);
                }
            }
        }

        let graph = self.dependency_graph();
        let rank = self.rank();
        for cycle in graph.constructor_cycles(&rank) {
            let path: Vec<String> = cycle.path.iter().map(|&p| self.identity(p).to_string()).collect();
            let Some(&first) = cycle.members.first() else {
                continue;
            };
            errors.push(CompositionError {
                kind: CompositionErrorKind::ConstructorCycle,
                message: format!(
                    "Cannot construct '{}' because of a cycle requiring eager construction: {}",
                    self.identity(first),
                    path.join(" -> ")
                ),
                parts: cycle.members.iter().map(|&p| self.identity(p).clone()).collect(),
                level: 1,
            });
            removed.extend(&cycle.members);
        }
        for mut component in graph.eager_cycles() {
            component.sort_by_key(|&p| rank[p]);
            let Some(&non_shared) = component
                .iter()
                .find(|&&p| !self.parts[p].scope().is_shared())
            else {
                continue;
            };
            let members: Vec<String> = component.iter().map(|&p| self.identity(p).to_string()).collect();
            errors.push(CompositionError {
                kind: CompositionErrorKind::NonSharedCycle,
                message: format!(
                    "Non-shared part '{}' is part of an eager cycle: {}",
                    self.identity(non_shared),
                    members.join(", ")
                ),
                parts: component.iter().map(|&p| self.identity(p).clone()).collect(),
                level: 1,
            });
            removed.extend(&component);
        }

        let mut level = 1;
        loop {
            for part in removed.drain(..) {
                levels[part].get_or_insert(level);
            }
            level += 1;
            for (part, imports) in self.composable() {
                if levels[part].is_some() {
                    continue;
                }
                for (position, resolved) in imports.iter().enumerate() {
                    if let Some(error) = self.check_dependencies(part, position, resolved, &levels, level) {
                        errors.push(error);
                        removed.push(part);
                    }
                }
            }
            if removed.is_empty() {
                break;
            }
        }
        (levels, errors)
    }

    fn check_cardinality(&self, part: usize, position: usize, resolved: &ResolvedImport) -> Option<CompositionError> {
        let import = self.parts[part].imports().get(position)?;
        let subject = self.describe(part, import);
        let (kind, message) = match (import.cardinality, resolved.exports.len()) {
            (ImportCardinality::ExactlyOne, 0) => {
                if let Some(identity) = &resolved.depth_exceeded {
                    (
                        CompositionErrorKind::GenericDepthExceeded,
                        format!(
                            "{}: specializing '{}' exceeds the maximum generic depth of {}",
                            subject, identity, self.max_generic_depth
                        ),
                    )
                } else if resolved.rejected_by_boundary > 0 {
                    (
                        CompositionErrorKind::SharingBoundaryViolation,
                        format!(
                            "{}: {} export(s) are outside the sharing scopes visible from {} (source {})",
                            subject,
                            resolved.rejected_by_boundary,
                            self.parts[part].scope(),
                            import.source
                        ),
                    )
                } else if resolved.rejected_by_metadata > 0 {
                    let constraints: Vec<String> =
                        import.constraints.iter().map(ToString::to_string).collect();
                    (
                        CompositionErrorKind::MetadataMismatch,
                        format!(
                            "{}: {} export(s) do not satisfy [{}]",
                            subject,
                            resolved.rejected_by_metadata,
                            constraints.join(", ")
                        ),
                    )
                } else {
                    (
                        CompositionErrorKind::MissingExport,
                        format!("{}: no export matches", subject),
                    )
                }
            }
            (ImportCardinality::ExactlyOne | ImportCardinality::ZeroOrOne, count) if count > 1 => (
                CompositionErrorKind::AmbiguousExports,
                format!(
                    "{}: {} exports match: {}",
                    subject,
                    count,
                    self.describe_exports(&resolved.exports).join(", ")
                ),
            ),
            _ => return None,
        };
        Some(CompositionError {
            kind,
            message,
            parts: self.implicated(part, &resolved.exports),
            level: 1,
        })
    }

    fn check_dependencies(
        &self,
        part: usize,
        position: usize,
        resolved: &ResolvedImport,
        levels: &[Option<u32>],
        level: u32,
    ) -> Option<CompositionError> {
        let import = self.parts[part].imports().get(position)?;
        if import.cardinality != ImportCardinality::ExactlyOne
            || resolved.exports.is_empty()
            || resolved.exports.iter().any(|s| levels[s.part].is_none())
        {
            return None;
        }
        Some(CompositionError {
            kind: CompositionErrorKind::DependencyRejected,
            message: format!(
                "{}: every matching export was rejected: {}",
                self.describe(part, import),
                self.describe_exports(&resolved.exports).join(", ")
            ),
            parts: self.implicated(part, &resolved.exports),
            level,
        })
    }

    fn describe(&self, part: usize, import: &ImportDefinition) -> String {
        format!(
            "Part '{}' import '{}' ({}, {})",
            self.identity(part),
            import.contract,
            import.cardinality,
            import.site
        )
    }

    /// Export addresses sorted by identity, independent of part numbering
    fn describe_exports(&self, exports: &[ExportSlot]) -> Vec<String> {
        let mut refs: Vec<(&TypeRef, usize)> = exports
            .iter()
            .map(|s| (self.identity(s.part), s.export))
            .collect();
        refs.sort();
        refs.into_iter()
            .map(|(identity, export)| format!("{}#{}", identity, export))
            .collect()
    }

    fn implicated(&self, part: usize, exports: &[ExportSlot]) -> Vec<TypeRef> {
        let mut others: Vec<TypeRef> = exports
            .iter()
            .map(|s| self.identity(s.part).clone())
            .filter(|identity| identity != self.identity(part))
            .collect();
        others.sort();
        others.dedup();
        let mut parts = vec![self.identity(part).clone()];
        parts.extend(others);
        parts
    }

    fn identity(&self, part: usize) -> &TypeRef {
        self.parts[part].identity()
    }

    /// Parts that take part in composition, with their resolved imports
    fn composable(&self) -> impl Iterator<Item = (usize, &Vec<ResolvedImport>)> + '_ {
        self.imports
            .iter()
            .enumerate()
            .filter_map(|(part, imports)| imports.as_ref().map(|i| (part, i)))
    }

    fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new(self.parts.len());
        for (part, imports) in self.composable() {
            for (import, resolved) in self.parts[part].imports().iter().zip(imports) {
                let dependency = Dependency {
                    constructor: import.site.is_constructor(),
                    lazy: import.lazy,
                };
                for slot in &resolved.exports {
                    graph.add_dependency(part, slot.part, dependency);
                }
            }
        }
        graph
    }

    /// Position of each part when sorted by identity
    fn rank(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.parts.len()).collect();
        order.sort_by(|&a, &b| self.identity(a).cmp(self.identity(b)));
        let mut rank = vec![0; order.len()];
        for (r, part) in order.into_iter().enumerate() {
            rank[part] = r;
        }
        rank
    }

    fn into_configuration(
        self,
        levels: Vec<Option<u32>>,
        errors: Vec<CompositionError>,
        discovery_errors: Vec<DiscoveryError>,
    ) -> Configuration {
        let mut parts = Vec::new();
        let mut rejected = BTreeMap::new();
        let mut specializations = 0usize;

        for (part, imports) in self.composable() {
            let definition = &self.parts[part];
            if let Some(level) = levels[part] {
                rejected.insert(definition.identity().clone(), level);
                continue;
            }
            let bindings = definition
                .constructor_imports()
                .into_iter()
                .chain(definition.member_imports())
                .filter_map(|(position, _)| {
                    let resolved = imports.get(position)?;
                    Some(ImportBinding {
                        import: position,
                        exports: resolved
                            .exports
                            .iter()
                            .filter(|s| levels[s.part].is_none())
                            .map(|s| ExportRef {
                                part: self.identity(s.part).clone(),
                                export: s.export,
                            })
                            .collect(),
                    })
                })
                .collect();
            let template = self.templates[part].map(|t| self.identity(t).clone());
            if template.is_some() {
                specializations += 1;
            }
            parts.push(ComposedPart::new(Arc::clone(definition), bindings, template));
        }

        let configuration = Configuration::from_parts(parts, errors, rejected, discovery_errors);
        info!(
            target: "partwire::resolver",
            parts = configuration.parts().len(),
            specializations,
            errors = configuration.errors().len(),
            max_level = configuration.max_error_level(),
            "Resolved configuration"
        );
        configuration
    }
}
