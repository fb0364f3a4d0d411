//! Resolution tests for partwire-resolver
//!
//! These tests drive whole catalogs through `Configuration::create*` and check
//! the observable result:
//!
//! 1. **Cardinality** - ExactlyOne, ZeroOrOne and ZeroOrMore bindings
//! 2. **Cycles** - eager constructor cycles are rejected, lazy ones are not
//! 3. **Leveling** - dependents of rejected parts fail at the next level
//! 4. **Generics** - specializations are created once and shared
//! 5. **Determinism** - catalog order and parallelism do not change renderings

use partwire_core::{
    Catalog, ContractId, ExportDefinition, ImportDefinition, MetadataConstraint, MetadataKind,
    PartDefinition, TypeRef,
};
use partwire_resolver::{
    CompositionErrorKind, Configuration, ExportRef, ResolverConfig, CONFIG_FILE_NAME,
};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn ty(s: &str) -> TypeRef {
    TypeRef::parse(s).unwrap()
}

fn contract(s: &str) -> ContractId {
    ContractId::parse(s).unwrap()
}

fn logger() -> PartDefinition {
    PartDefinition::builder(ty("Logger")).export_self().build()
}

fn service() -> PartDefinition {
    PartDefinition::builder(ty("Service"))
        .export_self()
        .constructor_import(ImportDefinition::exactly_one("Logger"))
        .build()
}

fn plugin(name: &str, priority: i64) -> PartDefinition {
    PartDefinition::builder(ty(name))
        .export(ExportDefinition::new("Plugin").with_metadata("Priority", priority))
        .build()
}

/// A catalog exercising generics, lazy cycles, metadata and leveling at once
fn mixed_parts() -> Vec<PartDefinition> {
    vec![
        logger(),
        service(),
        plugin("AlphaPlugin", 1),
        plugin("BetaPlugin", 2),
        PartDefinition::builder(ty("Host"))
            .export_self()
            .constructor_import(ImportDefinition::zero_or_more("Plugin"))
            .build(),
        PartDefinition::builder(ty("Repository<'T>"))
            .export(
                ExportDefinition::new(contract("IRepository<'T>"))
                    .with_metadata("Entity", TypeRef::param("T")),
            )
            .constructor_import(ImportDefinition::exactly_one("Logger"))
            .build(),
        PartDefinition::builder(ty("Orders"))
            .constructor_import(ImportDefinition::exactly_one(contract(
                "IRepository<Order>",
            )))
            .build(),
        PartDefinition::builder(ty("Invoices"))
            .constructor_import(ImportDefinition::exactly_one(contract(
                "IRepository<Order>",
            )))
            .build(),
        PartDefinition::builder(ty("Ping"))
            .export_self()
            .constructor_import(ImportDefinition::exactly_one("Pong"))
            .build(),
        PartDefinition::builder(ty("Pong"))
            .export_self()
            .constructor_import(ImportDefinition::exactly_one("Ping").lazy())
            .build(),
        PartDefinition::builder(ty("X"))
            .export_self()
            .constructor_import(ImportDefinition::exactly_one("Database"))
            .build(),
        PartDefinition::builder(ty("Y"))
            .export_self()
            .constructor_import(ImportDefinition::exactly_one("X"))
            .build(),
    ]
}

// ============================================================================
// Cardinality
// ============================================================================

mod cardinality {
    use super::*;

    #[test]
    fn end_to_end_logger_service() {
        let config = Configuration::create(&Catalog::from_parts([logger(), service()]));
        assert!(config.is_valid());
        let service = config.part(&ty("Service")).unwrap();
        assert_eq!(
            service.bindings()[0].exports,
            vec![ExportRef {
                part: ty("Logger"),
                export: 0
            }]
        );
    }

    #[test]
    fn exactly_one_with_two_exports_is_ambiguous() {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("ConsoleLogger"))
                .export(ExportDefinition::new("Logger"))
                .build(),
            PartDefinition::builder(ty("FileLogger"))
                .export(ExportDefinition::new("Logger"))
                .build(),
            service(),
        ]);
        let config = Configuration::create(&catalog);
        let error = &config.errors()[0];
        assert_eq!(error.kind, CompositionErrorKind::AmbiguousExports);
        assert_eq!(
            error.parts,
            vec![ty("Service"), ty("ConsoleLogger"), ty("FileLogger")]
        );
        assert_eq!(config.error_level(&ty("Service")), Some(1));
    }

    #[test]
    fn zero_or_one_accepts_nothing() {
        let catalog = Catalog::from_parts([PartDefinition::builder(ty("Cache"))
            .member_import("backing", ImportDefinition::zero_or_one("Store"))
            .build()]);
        let config = Configuration::create(&catalog);
        assert!(config.is_valid());
        assert!(config.part(&ty("Cache")).unwrap().bindings()[0]
            .exports
            .is_empty());
    }

    #[test]
    fn zero_or_more_keeps_index_order() {
        let catalog = Catalog::from_parts(mixed_parts());
        let config = Configuration::create(&catalog);
        let host = config.part(&ty("Host")).unwrap();
        let names: Vec<String> = host.bindings()[0]
            .exports
            .iter()
            .map(|e| e.part.to_string())
            .collect();
        assert_eq!(names, vec!["AlphaPlugin", "BetaPlugin"]);
    }

    #[test]
    fn metadata_kind_constraint_filters_plugins() {
        let catalog = Catalog::from_parts([
            plugin("AlphaPlugin", 1),
            PartDefinition::builder(ty("Untyped"))
                .export(ExportDefinition::new("Plugin").with_metadata("Priority", "high"))
                .build(),
            PartDefinition::builder(ty("Host"))
                .constructor_import(
                    ImportDefinition::zero_or_more("Plugin")
                        .require(MetadataConstraint::of_kind("Priority", MetadataKind::Float)),
                )
                .build(),
        ]);
        let config = Configuration::create(&catalog);
        let exports = &config.part(&ty("Host")).unwrap().bindings()[0].exports;
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].part, ty("AlphaPlugin"));
    }

    #[test]
    fn bindings_follow_construction_plan_order() {
        let catalog = Catalog::from_parts([
            logger(),
            PartDefinition::builder(ty("Worker"))
                .member_import("log", ImportDefinition::exactly_one("Logger"))
                .import(ImportDefinition::exactly_one("Logger").at_constructor(1))
                .import(ImportDefinition::zero_or_more("Plugin").at_constructor(0))
                .build(),
        ]);
        let config = Configuration::create(&catalog);
        let order: Vec<usize> = config
            .part(&ty("Worker"))
            .unwrap()
            .bindings()
            .iter()
            .map(|b| b.import)
            .collect();
        assert_eq!(order, vec![2, 1, 0]);
    }
}

// ============================================================================
// Cycles
// ============================================================================

mod cycles {
    use super::*;

    fn pair(a_lazy: bool, b_lazy: bool) -> Catalog {
        let import = |name: &str, lazy: bool| {
            let import = ImportDefinition::exactly_one(name);
            if lazy {
                import.lazy()
            } else {
                import
            }
        };
        Catalog::from_parts([
            PartDefinition::builder(ty("A"))
                .export_self()
                .constructor_import(import("B", a_lazy))
                .build(),
            PartDefinition::builder(ty("B"))
                .export_self()
                .constructor_import(import("A", b_lazy))
                .build(),
        ])
    }

    #[test]
    fn eager_constructor_cycle_is_invalid() {
        let config = Configuration::create(&pair(false, false));
        assert_eq!(config.errors().len(), 1);
        let error = &config.errors()[0];
        assert_eq!(error.kind, CompositionErrorKind::ConstructorCycle);
        assert_eq!(error.parts, vec![ty("A"), ty("B")]);
        assert!(error.message.contains("A -> B -> A"));
        assert!(config.parts().is_empty());
    }

    #[test]
    fn either_lazy_edge_makes_cycle_valid() {
        assert!(Configuration::create(&pair(true, false)).is_valid());
        assert!(Configuration::create(&pair(false, true)).is_valid());
    }

    #[test]
    fn member_edges_do_not_form_constructor_cycles() {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("A"))
                .export_self()
                .constructor_import(ImportDefinition::exactly_one("B"))
                .build(),
            PartDefinition::builder(ty("B"))
                .export_self()
                .member_import("a", ImportDefinition::exactly_one("A"))
                .build(),
        ]);
        assert!(Configuration::create(&catalog).is_valid());
    }

    #[test]
    fn dependents_of_a_cycle_fail_at_level_two() {
        let catalog = pair(false, false).with_part(
            PartDefinition::builder(ty("C"))
                .constructor_import(ImportDefinition::exactly_one("A"))
                .build(),
        );
        let config = Configuration::create(&catalog);
        assert_eq!(config.error_level(&ty("C")), Some(2));
        assert_eq!(config.errors_by_level()[&2][0].kind, CompositionErrorKind::DependencyRejected);
    }
}

// ============================================================================
// Leveling
// ============================================================================

mod leveling {
    use super::*;

    #[test]
    fn missing_import_then_dependent() {
        let config = Configuration::create(&Catalog::from_parts(mixed_parts()));
        assert_eq!(config.error_level(&ty("X")), Some(1));
        assert_eq!(config.error_level(&ty("Y")), Some(2));
        assert_eq!(config.max_error_level(), 2);
        assert_eq!(config.errors().len(), 2);
        assert_eq!(config.errors()[0].kind, CompositionErrorKind::MissingExport);

        // Everything else survives
        for name in ["Logger", "Service", "Host", "Orders", "Invoices", "Ping", "Pong"] {
            assert!(config.part(&ty(name)).is_some(), "{} missing", name);
        }
    }

    #[test]
    fn chain_levels_increase_by_one() {
        let mut parts = vec![PartDefinition::builder(ty("P0"))
            .export_self()
            .constructor_import(ImportDefinition::exactly_one("Nothing"))
            .build()];
        for i in 1..5 {
            parts.push(
                PartDefinition::builder(ty(&format!("P{}", i)))
                    .export_self()
                    .constructor_import(ImportDefinition::exactly_one(format!("P{}", i - 1).as_str()))
                    .build(),
            );
        }
        let config = Configuration::create(&Catalog::from_parts(parts));
        for i in 0..5u32 {
            assert_eq!(config.error_level(&ty(&format!("P{}", i))), Some(i + 1));
        }
        assert_eq!(config.errors_by_level().len(), 5);
    }

    #[test]
    fn zero_or_one_survives_rejected_exporter() {
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("Broken"))
                .export(ExportDefinition::new("Cache"))
                .constructor_import(ImportDefinition::exactly_one("Nothing"))
                .build(),
            PartDefinition::builder(ty("User"))
                .constructor_import(ImportDefinition::zero_or_one("Cache"))
                .build(),
        ]);
        let config = Configuration::create(&catalog);
        assert_eq!(config.errors().len(), 1);
        assert!(config.part(&ty("User")).unwrap().bindings()[0]
            .exports
            .is_empty());
    }
}

// ============================================================================
// Generics
// ============================================================================

mod generics {
    use super::*;

    #[test]
    fn same_specialization_is_shared() {
        let config = Configuration::create(&Catalog::from_parts(mixed_parts()));
        let specialized: Vec<_> = config
            .parts()
            .iter()
            .filter(|p| p.specialization_of().is_some())
            .collect();
        assert_eq!(specialized.len(), 1);
        assert_eq!(specialized[0].identity(), &ty("Repository<Order>"));

        let orders = config.part(&ty("Orders")).unwrap();
        let invoices = config.part(&ty("Invoices")).unwrap();
        assert_eq!(orders.bindings()[0].exports, invoices.bindings()[0].exports);
    }

    #[test]
    fn specialization_materializes_type_metadata() {
        let config = Configuration::create(&Catalog::from_parts(mixed_parts()));
        let repository = config.part(&ty("Repository<Order>")).unwrap();
        let export = &repository.definition().exports()[0];
        assert_eq!(export.contract, contract("IRepository<Order>"));
        assert_eq!(
            export.metadata.get("Entity").and_then(|v| match v {
                partwire_core::MetadataValue::Type(t) => Some(t.clone()),
                _ => None,
            }),
            Some(ty("Order"))
        );
    }

    #[test]
    fn templates_are_never_composed() {
        let config = Configuration::create(&Catalog::from_parts(mixed_parts()));
        assert!(config.part(&ty("Repository<'T>")).is_none());
        assert!(config.error_level(&ty("Repository<'T>")).is_none());
    }

    #[test]
    fn unbindable_template_is_missing_export() {
        // The export does not mention 'T, so the import cannot supply it
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("Handler<'T>"))
                .export(ExportDefinition::new("IHandler"))
                .build(),
            PartDefinition::builder(ty("Dispatcher"))
                .constructor_import(ImportDefinition::exactly_one("IHandler"))
                .build(),
        ]);
        let config = Configuration::create(&catalog);
        assert_eq!(config.errors()[0].kind, CompositionErrorKind::MissingExport);
    }
}

// ============================================================================
// Sessions
// ============================================================================

mod sessions {
    use super::*;

    #[test]
    fn injected_type_resolver_redirects_identities() {
        let redirect = |t: &TypeRef| match t {
            TypeRef::Named { name, args } if name == "legacy::Logger" => TypeRef::Named {
                name: "Logger".to_string(),
                args: args.clone(),
            },
            other => other.clone(),
        };
        // Contract names are stable; type arguments go through the resolver
        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("Service"))
                .constructor_import(ImportDefinition::exactly_one(contract(
                    "Sink<legacy::Logger>",
                )))
                .build(),
            PartDefinition::builder(ty("LogSink"))
                .export(ExportDefinition::new(contract("Sink<Logger>")))
                .build(),
        ]);

        let plain = Configuration::create(&catalog);
        assert!(!plain.is_valid());

        let redirected =
            Configuration::create_with_resolver(&catalog, &ResolverConfig::default(), &redirect)
                .unwrap();
        assert!(redirected.is_valid(), "{}", redirected.render());
    }

    #[test]
    fn config_file_drives_session() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "parallel = true\nmax_generic_depth = 1\n").unwrap();
        let config = ResolverConfig::from_file(&path).unwrap();

        let catalog = Catalog::from_parts([
            PartDefinition::builder(ty("Box<'T>"))
                .export(ExportDefinition::new(contract("IBox<'T>")))
                .build(),
            PartDefinition::builder(ty("Shallow"))
                .constructor_import(ImportDefinition::exactly_one(contract("IBox<Int>")))
                .build(),
            PartDefinition::builder(ty("Deep"))
                .constructor_import(ImportDefinition::exactly_one(contract("IBox<List<Int>>")))
                .build(),
        ]);
        let configuration = Configuration::create_with(&catalog, &config).unwrap();
        assert!(configuration.part(&ty("Shallow")).is_some());
        assert_eq!(
            configuration.errors()[0].kind,
            CompositionErrorKind::GenericDepthExceeded
        );
        assert_eq!(configuration.error_level(&ty("Deep")), Some(1));
    }
}

// ============================================================================
// Determinism
// ============================================================================

mod determinism {
    use super::*;

    #[test]
    fn render_is_stable_across_runs() {
        let catalog = Catalog::from_parts(mixed_parts());
        assert_eq!(
            Configuration::create(&catalog).render(),
            Configuration::create(&catalog).render()
        );
    }

    #[test]
    fn parallel_matches_sequential() {
        let catalog = Catalog::from_parts(mixed_parts());
        let parallel =
            Configuration::create_with(&catalog, &ResolverConfig::default().parallel(true))
                .unwrap();
        assert_eq!(parallel.render(), Configuration::create(&catalog).render());
    }

    #[test]
    fn add_and_merge_paths_render_identically() {
        let parts = mixed_parts();
        let (left, right) = parts.split_at(5);
        let merged = Catalog::from_parts(right.to_vec()).merge(&Catalog::from_parts(left.to_vec()));
        let added = parts
            .iter()
            .cloned()
            .fold(Catalog::new(), |catalog, part| catalog.with_part(part));
        assert_eq!(
            Configuration::create(&merged).render(),
            Configuration::create(&added).render()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn catalog_order_does_not_change_render(
            order in Just((0..mixed_parts().len()).collect::<Vec<usize>>()).prop_shuffle()
        ) {
            let parts = mixed_parts();
            let shuffled: Vec<PartDefinition> = order.iter().map(|&i| parts[i].clone()).collect();
            let expected = Configuration::create(&Catalog::from_parts(parts)).render();
            prop_assert_eq!(Configuration::create(&Catalog::from_parts(shuffled)).render(), expected);
        }
    }
}
