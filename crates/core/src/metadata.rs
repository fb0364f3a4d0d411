//! Export metadata and import constraints
//!
//! Metadata is an ordered string-keyed map of typed values attached to each
//! export. Discovery populates it; the resolver only reads it.
//!
//! Repeated keys accumulate: inserting a key that already holds a value turns
//! the entry into a [`MetadataValue::List`] holding every value in insertion
//! order. Hosts that declare the same metadata key several times on one
//! export therefore see all of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::TypeRef;

/// A typed metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    String(String),
    /// A type identity
    Type(TypeRef),
    /// Ordered list of values (also produced by repeated keys)
    List(Vec<MetadataValue>),
}

/// Kind of a metadata value, used by type constraints
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetadataKind {
    /// [`MetadataValue::Bool`]
    Bool,
    /// [`MetadataValue::Int`]
    Int,
    /// [`MetadataValue::Float`]; integers are assignable too
    Float,
    /// [`MetadataValue::String`]
    String,
    /// [`MetadataValue::Type`]
    Type,
    /// [`MetadataValue::List`] whose elements are all of the inner kind
    List(Box<MetadataKind>),
}

impl MetadataValue {
    /// Kind of this value; lists report the kind of their first element
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataValue::Bool(_) => MetadataKind::Bool,
            MetadataValue::Int(_) => MetadataKind::Int,
            MetadataValue::Float(_) => MetadataKind::Float,
            MetadataValue::String(_) => MetadataKind::String,
            MetadataValue::Type(_) => MetadataKind::Type,
            MetadataValue::List(items) => MetadataKind::List(Box::new(
                items
                    .first()
                    .map(MetadataValue::kind)
                    .unwrap_or(MetadataKind::String),
            )),
        }
    }

    /// True if this value can be assigned to a slot of the given kind
    pub fn is_assignable_to(&self, kind: &MetadataKind) -> bool {
        match (self, kind) {
            (MetadataValue::Bool(_), MetadataKind::Bool)
            | (MetadataValue::Int(_), MetadataKind::Int)
            | (MetadataValue::Int(_), MetadataKind::Float)
            | (MetadataValue::Float(_), MetadataKind::Float)
            | (MetadataValue::String(_), MetadataKind::String)
            | (MetadataValue::Type(_), MetadataKind::Type) => true,
            (MetadataValue::List(items), MetadataKind::List(inner)) => {
                items.iter().all(|item| item.is_assignable_to(inner))
            }
            _ => false,
        }
    }

    /// Apply `f` to every type identity held by this value
    pub fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> MetadataValue {
        match self {
            MetadataValue::Type(ty) => MetadataValue::Type(f(ty)),
            MetadataValue::List(items) => {
                MetadataValue::List(items.iter().map(|v| v.map_types(f)).collect())
            }
            other => other.clone(),
        }
    }

    /// False if this value holds a NaN or infinite float
    pub fn is_finite(&self) -> bool {
        match self {
            MetadataValue::Float(v) => v.is_finite(),
            MetadataValue::List(items) => items.iter().all(MetadataValue::is_finite),
            _ => true,
        }
    }

    /// Borrow as a string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Copy out as an integer, if this is an integer value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{:?}", v),
            MetadataValue::String(v) => write!(f, "{:?}", v),
            MetadataValue::Type(v) => write!(f, "type {}", v),
            MetadataValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKind::Bool => write!(f, "bool"),
            MetadataKind::Int => write!(f, "int"),
            MetadataKind::Float => write!(f, "float"),
            MetadataKind::String => write!(f, "string"),
            MetadataKind::Type => write!(f, "type"),
            MetadataKind::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::String(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::String(v)
    }
}

impl From<TypeRef> for MetadataValue {
    fn from(v: TypeRef) -> Self {
        MetadataValue::Type(v)
    }
}

// ============================================================================
// Metadata map
// ============================================================================

/// Ordered key → value metadata attached to an export
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, accumulating into a list when the key already exists
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        let value = value.into();
        match self.entries.entry(key.into()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                match existing {
                    MetadataValue::List(items) => items.push(value),
                    single => {
                        let first = std::mem::replace(single, MetadataValue::List(Vec::new()));
                        *single = MetadataValue::List(vec![first, value]);
                    }
                }
            }
        }
    }

    /// Builder form of [`Metadata::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// True if the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no keys are present
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First key whose value holds a NaN or infinite float
    pub fn non_finite_key(&self) -> Option<&str> {
        self.iter()
            .find(|(_, value)| !value.is_finite())
            .map(|(key, _)| key)
    }

    /// Apply `f` to every type identity held in values
    pub fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> Metadata {
        Metadata {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.map_types(f)))
                .collect(),
        }
    }

    pub(crate) fn collect_params(&self, out: &mut Vec<String>) {
        fn walk(value: &MetadataValue, out: &mut Vec<String>) {
            match value {
                MetadataValue::Type(ty) => ty.collect_params(out),
                MetadataValue::List(items) => items.iter().for_each(|v| walk(v, out)),
                _ => {}
            }
        }
        self.entries.values().for_each(|v| walk(v, out));
    }
}

impl<K: Into<String>, V: Into<MetadataValue>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

// ============================================================================
// Constraints
// ============================================================================

/// What an import expects of one metadata key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataExpectation {
    /// The key must be present with any value
    Present,
    /// The key must hold exactly this value
    Equals(MetadataValue),
    /// The key must hold a value assignable to this kind
    OfKind(MetadataKind),
}

/// A required-metadata constraint declared by an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataConstraint {
    /// Metadata key
    pub key: String,
    /// Expectation on the value under `key`
    pub expectation: MetadataExpectation,
}

impl MetadataConstraint {
    /// Require the key to be present
    pub fn present(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expectation: MetadataExpectation::Present,
        }
    }

    /// Require the key to equal a literal value
    pub fn equals(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self {
            key: key.into(),
            expectation: MetadataExpectation::Equals(value.into()),
        }
    }

    /// Require the key to hold a value assignable to `kind`
    pub fn of_kind(key: impl Into<String>, kind: MetadataKind) -> Self {
        Self {
            key: key.into(),
            expectation: MetadataExpectation::OfKind(kind),
        }
    }

    /// Check this constraint against exporter metadata
    pub fn is_satisfied_by(&self, metadata: &Metadata) -> bool {
        let Some(value) = metadata.get(&self.key) else {
            return false;
        };
        match &self.expectation {
            MetadataExpectation::Present => true,
            MetadataExpectation::Equals(expected) => value == expected,
            MetadataExpectation::OfKind(kind) => value.is_assignable_to(kind),
        }
    }

    /// Apply `f` to every type identity in the expectation
    pub fn map_types(&self, f: &dyn Fn(&TypeRef) -> TypeRef) -> MetadataConstraint {
        let expectation = match &self.expectation {
            MetadataExpectation::Equals(value) => MetadataExpectation::Equals(value.map_types(f)),
            other => other.clone(),
        };
        Self {
            key: self.key.clone(),
            expectation,
        }
    }
}

impl fmt::Display for MetadataConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expectation {
            MetadataExpectation::Present => write!(f, "{} present", self.key),
            MetadataExpectation::Equals(v) => write!(f, "{} = {}", self.key, v),
            MetadataExpectation::OfKind(k) => write!(f, "{}: {}", self.key, k),
        }
    }
}
