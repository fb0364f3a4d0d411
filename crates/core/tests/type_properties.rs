//! Property tests for type identities
//!
//! 1. **Text form** - `parse(t.to_string())` gives back `t`
//! 2. **Unification** - a pattern unified with a closed type substitutes back
//!    to that type

use partwire_core::{TypeBindings, TypeRef};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn name() -> impl Strategy<Value = String> {
    "[A-Z][A-Za-z0-9_]{0,6}(::[A-Z][a-z0-9]{0,4})?"
}

fn closed_type() -> impl Strategy<Value = TypeRef> {
    name().prop_map(TypeRef::named).prop_recursive(3, 16, 3, |inner| {
        (name(), prop::collection::vec(inner, 1..4))
            .prop_map(|(name, args)| TypeRef::generic(name, args))
    })
}

fn any_type() -> impl Strategy<Value = TypeRef> {
    prop_oneof![
        3 => name().prop_map(TypeRef::named),
        1 => name().prop_map(TypeRef::param),
    ]
    .prop_recursive(3, 16, 3, |inner| {
        (name(), prop::collection::vec(inner, 1..4))
            .prop_map(|(name, args)| TypeRef::generic(name, args))
    })
}

/// Replace the masked top-level arguments of `ty` with fresh parameters
fn generalize(ty: &TypeRef, mask: &[bool]) -> TypeRef {
    let args = ty.args().iter().enumerate().map(|(i, arg)| {
        if mask.get(i).copied().unwrap_or(false) {
            TypeRef::param(format!("T{}", i))
        } else {
            arg.clone()
        }
    });
    TypeRef::generic(ty.name(), args)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn display_then_parse_is_identity(ty in any_type()) {
        let text = ty.to_string();
        prop_assert_eq!(TypeRef::parse(&text).unwrap(), ty);
    }

    #[test]
    fn unify_then_substitute_restores_the_concrete_type(
        concrete in closed_type(),
        mask in prop::collection::vec(any::<bool>(), 0..4),
    ) {
        let pattern = generalize(&concrete, &mask);
        let mut bindings = TypeBindings::new();
        prop_assert!(pattern.unify(&concrete, &mut bindings));
        prop_assert_eq!(pattern.substitute(&bindings), concrete.clone());
        prop_assert_eq!(bindings.len(), pattern.params().len());
    }

    #[test]
    fn closed_types_unify_only_with_themselves(a in closed_type(), b in closed_type()) {
        let mut bindings = TypeBindings::new();
        prop_assert_eq!(a.unify(&b, &mut bindings), a == b);
        prop_assert!(bindings.is_empty());
    }
}
