//! Activator capability
//!
//! The engine decides what to instantiate and in which order; the host
//! performs the instantiation. An [`Activator`] creates a part from its
//! constructor arguments, assigns member imports, reads member exports and
//! releases instances on disposal.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use partwire_core::TypeRef;

use crate::error::ActivationError;
use crate::provider::LazyExport;

/// A constructed part or member value
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Value delivered to one import
#[derive(Clone)]
pub enum ImportValue {
    /// `ZeroOrOne` import with no export
    Empty,
    /// `ExactlyOne` or `ZeroOrOne` import
    Single(Instance),
    /// `ZeroOrMore` import, in export index order
    Many(Vec<Instance>),
    /// Lazy `ExactlyOne` or `ZeroOrOne` import
    Lazy(LazyExport),
    /// Lazy `ZeroOrMore` import
    LazyMany(Vec<LazyExport>),
}

impl ImportValue {
    /// The instance of a `Single` value
    pub fn single(&self) -> Option<&Instance> {
        match self {
            ImportValue::Single(instance) => Some(instance),
            _ => None,
        }
    }

    /// The instances of a `Many` value
    pub fn many(&self) -> &[Instance] {
        match self {
            ImportValue::Many(instances) => instances,
            _ => &[],
        }
    }

    /// The accessor of a `Lazy` value
    pub fn lazy(&self) -> Option<&LazyExport> {
        match self {
            ImportValue::Lazy(export) => Some(export),
            _ => None,
        }
    }

    /// The accessors of a `LazyMany` value
    pub fn lazy_many(&self) -> &[LazyExport] {
        match self {
            ImportValue::LazyMany(exports) => exports,
            _ => &[],
        }
    }

    /// True for `Empty`
    pub fn is_empty(&self) -> bool {
        matches!(self, ImportValue::Empty)
    }
}

impl fmt::Debug for ImportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportValue::Empty => write!(f, "Empty"),
            ImportValue::Single(_) => write!(f, "Single(..)"),
            ImportValue::Many(instances) => write!(f, "Many({})", instances.len()),
            ImportValue::Lazy(export) => f.debug_tuple("Lazy").field(export).finish(),
            ImportValue::LazyMany(exports) => f.debug_tuple("LazyMany").field(exports).finish(),
        }
    }
}

/// Host capability that instantiates and wires parts
///
/// Implementations are shared between threads; the provider guarantees that
/// a shared part is created at most once per provider.
pub trait Activator: Send + Sync {
    /// Create `part` from its constructor arguments, ordered by position
    fn create(&self, part: &TypeRef, args: Vec<ImportValue>) -> Result<Instance, ActivationError>;

    /// Assign a member import after construction
    fn assign(
        &self,
        part: &TypeRef,
        instance: &Instance,
        member: &str,
        value: ImportValue,
    ) -> Result<(), ActivationError>;

    /// Read a member export from a constructed instance
    fn read_member(
        &self,
        part: &TypeRef,
        _instance: &Instance,
        member: &str,
    ) -> Result<Instance, ActivationError> {
        Err(ActivationError::new(format!(
            "member export '{}' of '{}' is not supported by this activator",
            member, part
        )))
    }

    /// Release a shared instance when its provider is disposed
    fn dispose(&self, _part: &TypeRef, _instance: &Instance) -> Result<(), ActivationError> {
        Ok(())
    }
}
