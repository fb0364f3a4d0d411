//! Capability traits
//!
//! Type resolution is injected into each resolution session instead of living
//! in process-wide state, so independent sessions can canonicalize type
//! identities differently (for example with different version redirects)
//! without interfering with one another.

use crate::part::PartDefinition;
use crate::types::TypeRef;

/// Canonicalizes type identities before matching
///
/// Implementations must be deterministic: the same input always maps to the
/// same output within one session.
pub trait TypeResolver: Send + Sync {
    /// Return the canonical form of `ty`
    fn canonicalize(&self, ty: &TypeRef) -> TypeRef;

    /// Canonicalize every type identity in a part definition
    fn canonicalize_part(&self, part: &PartDefinition) -> PartDefinition {
        part.map_types(&|ty| self.canonicalize(ty))
    }
}

/// Leaves every type identity untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl TypeResolver for IdentityResolver {
    fn canonicalize(&self, ty: &TypeRef) -> TypeRef {
        ty.clone()
    }
}

impl<F> TypeResolver for F
where
    F: Fn(&TypeRef) -> TypeRef + Send + Sync,
{
    fn canonicalize(&self, ty: &TypeRef) -> TypeRef {
        self(ty)
    }
}
