//! Contract identity
//!
//! A contract is the named capability exports offer and imports request.
//! Contracts may be generic (`Repository<'T>` on an open-generic exporter,
//! `Repository<Customer>` on an importer). Metadata constraints are carried
//! by the import itself, see [`crate::ImportDefinition`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{TypeBindings, TypeRef};

/// Named capability identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId {
    name: String,
    type_args: Vec<TypeRef>,
}

impl ContractId {
    /// Create a non-generic contract
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_args: Vec::new(),
        }
    }

    /// Create a generic contract
    pub fn generic(name: impl Into<String>, type_args: impl IntoIterator<Item = TypeRef>) -> Self {
        Self {
            name: name.into(),
            type_args: type_args.into_iter().collect(),
        }
    }

    /// Parse the text form, e.g. `Repository<Customer>`
    ///
    /// # Errors
    /// Returns [`Error::InvalidTypeRef`] if the text is malformed or is a bare
    /// type parameter.
    pub fn parse(input: &str) -> Result<Self> {
        match TypeRef::parse(input)? {
            TypeRef::Named { name, args } => Ok(Self {
                name,
                type_args: args,
            }),
            TypeRef::Param(_) => Err(Error::InvalidTypeRef {
                input: input.to_string(),
                reason: "a contract cannot be a bare type parameter".to_string(),
            }),
        }
    }

    /// Contract name without type arguments
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generic arguments
    pub fn type_args(&self) -> &[TypeRef] {
        &self.type_args
    }

    /// Number of generic arguments
    pub fn arity(&self) -> usize {
        self.type_args.len()
    }

    /// True if any type argument is open
    pub fn is_open(&self) -> bool {
        self.type_args.iter().any(TypeRef::is_open)
    }

    /// Substitute bound type parameters in the type arguments
    pub fn substitute(&self, bindings: &TypeBindings) -> ContractId {
        self.map_types(&|t| t.substitute(bindings))
    }

    /// Apply `f` to every type argument
    pub fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> ContractId {
        Self {
            name: self.name.clone(),
            type_args: self.type_args.iter().map(f).collect(),
        }
    }

    /// Unify this (possibly open) contract with a closed requested contract
    pub fn unify(&self, requested: &ContractId, bindings: &mut TypeBindings) -> bool {
        self.name == requested.name
            && self.arity() == requested.arity()
            && self
                .type_args
                .iter()
                .zip(&requested.type_args)
                .all(|(a, b)| a.unify(b, bindings))
    }

    pub(crate) fn collect_params(&self, out: &mut Vec<String>) {
        for arg in &self.type_args {
            arg.collect_params(out);
        }
    }
}

impl From<&str> for ContractId {
    fn from(name: &str) -> Self {
        ContractId::new(name)
    }
}

impl From<TypeRef> for ContractId {
    /// The contract conventionally exported by a type: same name and arguments
    fn from(ty: TypeRef) -> Self {
        match ty {
            TypeRef::Named { name, args } => Self {
                name,
                type_args: args,
            },
            TypeRef::Param(name) => Self::new(name),
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            TypeRef::generic(self.name.clone(), self.type_args.iter().cloned())
        )
    }
}
