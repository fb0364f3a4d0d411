//! Type identities for parts and contracts
//!
//! This module defines the foundational identity type:
//! - TypeRef: A named type with optional generic arguments, or an unbound
//!   type parameter
//! - TypeBindings: Parameter name → concrete type, produced by unification
//!
//! Generic types are modelled as data rather than through the host type
//! system. An open-generic part is a template whose identity carries
//! [`TypeRef::Param`] entries; specializing it is an explicit substitution.
//!
//! Text form: `Name`, `Name<Arg, Arg>`, and `'T` for a type parameter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Bindings from type parameter name to concrete type
pub type TypeBindings = BTreeMap<String, TypeRef>;

/// Identity of a type, possibly generic
///
/// Ordering and hashing are structural, which gives every derived lookup
/// table a deterministic order independent of discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeRef {
    /// A concrete or generic named type (`Repository<Customer>`)
    Named {
        /// Qualified type name
        name: String,
        /// Generic arguments, empty for non-generic types
        args: Vec<TypeRef>,
    },
    /// An unbound type parameter (`'T`)
    Param(String),
}

impl TypeRef {
    /// Create a non-generic named type
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Create a generic named type with the given arguments
    pub fn generic(name: impl Into<String>, args: impl IntoIterator<Item = TypeRef>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Create an unbound type parameter
    pub fn param(name: impl Into<String>) -> Self {
        TypeRef::Param(name.into())
    }

    /// Parse the text form (`Name<Arg, 'T>`)
    ///
    /// # Errors
    /// Returns [`Error::InvalidTypeRef`] on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser { input, pos: 0 };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != input.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(ty)
    }

    /// Name of the type (or of the parameter)
    pub fn name(&self) -> &str {
        match self {
            TypeRef::Named { name, .. } => name,
            TypeRef::Param(name) => name,
        }
    }

    /// Generic arguments; empty for parameters and non-generic types
    pub fn args(&self) -> &[TypeRef] {
        match self {
            TypeRef::Named { args, .. } => args,
            TypeRef::Param(_) => &[],
        }
    }

    /// True if this is an unbound type parameter
    pub fn is_param(&self) -> bool {
        matches!(self, TypeRef::Param(_))
    }

    /// True if any type parameter occurs anywhere in this type
    pub fn is_open(&self) -> bool {
        match self {
            TypeRef::Named { args, .. } => args.iter().any(TypeRef::is_open),
            TypeRef::Param(_) => true,
        }
    }

    /// Type parameters in first-occurrence order, without duplicates
    pub fn params(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_params(&mut out);
        out
    }

    pub(crate) fn collect_params(&self, out: &mut Vec<String>) {
        match self {
            TypeRef::Named { args, .. } => {
                for arg in args {
                    arg.collect_params(out);
                }
            }
            TypeRef::Param(name) => {
                if !out.iter().any(|p| p == name) {
                    out.push(name.clone());
                }
            }
        }
    }

    /// Nesting depth: `Foo` is 1, `Foo<Bar>` is 2, `Foo<Bar<Baz>>` is 3
    pub fn depth(&self) -> usize {
        match self {
            TypeRef::Named { args, .. } => 1 + args.iter().map(TypeRef::depth).max().unwrap_or(0),
            TypeRef::Param(_) => 1,
        }
    }

    /// Replace bound parameters; unbound ones are left in place
    pub fn substitute(&self, bindings: &TypeBindings) -> TypeRef {
        match self {
            TypeRef::Named { name, args } => TypeRef::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(bindings)).collect(),
            },
            TypeRef::Param(name) => bindings
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
        }
    }

    /// Match this (possibly open) pattern against a closed type
    ///
    /// On success every parameter of the pattern is bound in `bindings`,
    /// consistently with bindings already present. On failure `bindings`
    /// may hold partial results; callers unify into a scratch map.
    pub fn unify(&self, concrete: &TypeRef, bindings: &mut TypeBindings) -> bool {
        match (self, concrete) {
            (TypeRef::Param(name), _) => {
                if concrete.is_open() {
                    return false;
                }
                match bindings.get(name) {
                    Some(bound) => bound == concrete,
                    None => {
                        bindings.insert(name.clone(), concrete.clone());
                        true
                    }
                }
            }
            (
                TypeRef::Named { name, args },
                TypeRef::Named {
                    name: other_name,
                    args: other_args,
                },
            ) => {
                name == other_name
                    && args.len() == other_args.len()
                    && args
                        .iter()
                        .zip(other_args)
                        .all(|(a, b)| a.unify(b, bindings))
            }
            (TypeRef::Named { .. }, TypeRef::Param(_)) => false,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeRef::Param(name) => write!(f, "'{}", name),
        }
    }
}

impl FromStr for TypeRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TypeRef::parse(s)
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn error(&self, reason: &str) -> Error {
        Error::InvalidTypeRef {
            input: self.input.to_string(),
            reason: format!("{} at offset {}", reason, self.pos),
        }
    }

    fn ident(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '<' | '>' | ',' | '\'') {
                break;
            }
            self.pos += c.len_utf8();
        }
        if self.pos == start {
            return Err(self.error("expected a type name"));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        if self.eat('\'') {
            return Ok(TypeRef::Param(self.ident()?));
        }
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.eat('<') {
            loop {
                args.push(self.parse_type()?);
                if self.eat(',') {
                    continue;
                }
                if self.eat('>') {
                    break;
                }
                return Err(self.error("expected ',' or '>'"));
            }
        }
        Ok(TypeRef::Named { name, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> TypeRef {
        TypeRef::parse(s).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        assert_eq!(ty("Logger"), TypeRef::named("Logger"));
        assert_eq!(ty("  app::Logger "), TypeRef::named("app::Logger"));
    }

    #[test]
    fn test_parse_generic_and_params() {
        let parsed = ty("Map<'K, List<Customer>>");
        assert_eq!(
            parsed,
            TypeRef::generic(
                "Map",
                [
                    TypeRef::param("K"),
                    TypeRef::generic("List", [TypeRef::named("Customer")]),
                ]
            )
        );
        assert_eq!(parsed.to_string(), "Map<'K, List<Customer>>");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TypeRef::parse("").is_err());
        assert!(TypeRef::parse("Foo<").is_err());
        assert!(TypeRef::parse("Foo<Bar").is_err());
        assert!(TypeRef::parse("Foo<>").is_err());
        assert!(TypeRef::parse("Foo Bar").is_err());
    }

    #[test]
    fn test_open_and_params() {
        assert!(!ty("Foo<Bar>").is_open());
        assert!(ty("Foo<List<'T>>").is_open());
        assert_eq!(ty("Pair<'A, Map<'B, 'A>>").params(), vec!["A", "B"]);
    }

    #[test]
    fn test_depth() {
        assert_eq!(ty("Foo").depth(), 1);
        assert_eq!(ty("Foo<Bar>").depth(), 2);
        assert_eq!(ty("Foo<Bar, List<Baz>>").depth(), 3);
    }

    #[test]
    fn test_substitute_leaves_unbound() {
        let mut bindings = TypeBindings::new();
        bindings.insert("A".to_string(), ty("Int"));
        assert_eq!(ty("Pair<'A, 'B>").substitute(&bindings), ty("Pair<Int, 'B>"));
    }

    #[test]
    fn test_unify_binds_consistently() {
        let mut bindings = TypeBindings::new();
        assert!(ty("Pair<'A, 'A>").unify(&ty("Pair<Int, Int>"), &mut bindings));
        assert_eq!(bindings["A"], ty("Int"));

        let mut bindings = TypeBindings::new();
        assert!(!ty("Pair<'A, 'A>").unify(&ty("Pair<Int, Str>"), &mut bindings));
    }

    #[test]
    fn test_unify_rejects_shape_mismatch() {
        let mut bindings = TypeBindings::new();
        assert!(!ty("List<'T>").unify(&ty("Set<Int>"), &mut bindings));
        assert!(!ty("List<'T>").unify(&ty("List<Int, Int>"), &mut bindings));
        assert!(!ty("List<'T>").unify(&ty("List<'U>"), &mut bindings));
    }

    #[test]
    fn test_unify_nested() {
        let mut bindings = TypeBindings::new();
        assert!(ty("Repo<List<'T>>").unify(&ty("Repo<List<Order>>"), &mut bindings));
        assert_eq!(bindings["T"], ty("Order"));
    }

    #[test]
    fn test_ordering_is_structural() {
        let mut types = vec![ty("B"), ty("A<Z>"), ty("A")];
        types.sort();
        assert_eq!(types, vec![ty("A"), ty("A<Z>"), ty("B")]);
    }
}
