//! Part catalog
//!
//! The catalog is the immutable input to resolution: an ordered set of part
//! definitions keyed by identity, plus the discovery errors collected while
//! producing it. Every operation returns a new catalog; existing catalogs are
//! never mutated, so a catalog can be shared freely between resolution
//! sessions.
//!
//! Conflicts (duplicate identities, parts using unbound type parameters,
//! clashing constructor positions) are recorded as [`DiscoveryError`]s rather
//! than raised. The offending definition is skipped and the rest of the
//! catalog stays usable.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::part::{ImportSite, PartDefinition};
use crate::types::TypeRef;

/// A problem found while discovering or merging parts
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DiscoveryError {
    /// Two definitions share an identity; the first one is kept
    #[error("Duplicate part '{identity}': the first definition is kept")]
    DuplicatePart {
        /// Conflicting identity
        identity: TypeRef,
    },

    /// An export or import uses a type parameter the identity does not declare
    #[error("Part '{identity}' uses unbound type parameter '{parameter}'")]
    UnboundTypeParameter {
        /// Offending part
        identity: TypeRef,
        /// Parameter name
        parameter: String,
    },

    /// Two constructor imports claim the same argument position
    #[error("Part '{identity}' declares constructor position {position} more than once")]
    DuplicateConstructorPosition {
        /// Offending part
        identity: TypeRef,
        /// Clashing position
        position: usize,
    },

    /// Constructor positions do not form the contiguous range `0..n`
    #[error("Part '{identity}' declares no constructor import at position {position}")]
    ConstructorPositionGap {
        /// Offending part
        identity: TypeRef,
        /// First missing position
        position: usize,
    },

    /// Reported by an external discovery mechanism
    #[error(
        "Malformed part{}: {}",
        .identity.as_ref().map(|i| format!(" '{}'", i)).unwrap_or_default(),
        .reason
    )]
    Malformed {
        /// Part identity, if discovery got that far
        identity: Option<TypeRef>,
        /// Description from the discovery mechanism
        reason: String,
    },
}

impl DiscoveryError {
    /// Identity of the implicated part, if known
    pub fn part(&self) -> Option<&TypeRef> {
        match self {
            DiscoveryError::DuplicatePart { identity }
            | DiscoveryError::UnboundTypeParameter { identity, .. }
            | DiscoveryError::DuplicateConstructorPosition { identity, .. }
            | DiscoveryError::ConstructorPositionGap { identity, .. } => Some(identity),
            DiscoveryError::Malformed { identity, .. } => identity.as_ref(),
        }
    }
}

/// Immutable set of part definitions
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    parts: Vec<Arc<PartDefinition>>,
    by_identity: FxHashMap<TypeRef, usize>,
    discovery_errors: Vec<DiscoveryError>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from parts in order
    pub fn from_parts(parts: impl IntoIterator<Item = PartDefinition>) -> Self {
        let mut catalog = Self::new();
        for part in parts {
            catalog.push(Arc::new(part));
        }
        catalog
    }

    /// Return a new catalog with `part` appended
    pub fn with_part(&self, part: PartDefinition) -> Self {
        let mut catalog = self.clone();
        catalog.push(Arc::new(part));
        catalog
    }

    /// Return a new catalog with every part appended in order
    pub fn with_parts(&self, parts: impl IntoIterator<Item = PartDefinition>) -> Self {
        let mut catalog = self.clone();
        for part in parts {
            catalog.push(Arc::new(part));
        }
        catalog
    }

    /// Return a new catalog holding this catalog's parts followed by `other`'s
    ///
    /// Discovery errors of both catalogs are carried over; identities present
    /// in both produce a [`DiscoveryError::DuplicatePart`].
    pub fn merge(&self, other: &Catalog) -> Self {
        let mut catalog = self.clone();
        catalog
            .discovery_errors
            .extend(other.discovery_errors.iter().cloned());
        for part in &other.parts {
            catalog.push(Arc::clone(part));
        }
        catalog
    }

    /// Return a new catalog carrying an externally reported discovery error
    pub fn with_discovery_error(&self, error: DiscoveryError) -> Self {
        let mut catalog = self.clone();
        catalog.discovery_errors.push(error);
        catalog
    }

    /// Parts in insertion order
    pub fn parts(&self) -> &[Arc<PartDefinition>] {
        &self.parts
    }

    /// Look up a part by identity
    pub fn get(&self, identity: &TypeRef) -> Option<&Arc<PartDefinition>> {
        self.by_identity.get(identity).map(|&i| &self.parts[i])
    }

    /// True if a part with this identity is present
    pub fn contains(&self, identity: &TypeRef) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True if the catalog holds no parts
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Discovery errors in the order they were found
    pub fn discovery_errors(&self) -> &[DiscoveryError] {
        &self.discovery_errors
    }

    fn push(&mut self, part: Arc<PartDefinition>) {
        if let Some(error) = Self::validate(&part) {
            tracing::debug!(
                target: "partwire::catalog",
                part = %part.identity(),
                error = %error,
                "Skipping malformed part"
            );
            self.discovery_errors.push(error);
            return;
        }
        if self.by_identity.contains_key(part.identity()) {
            self.discovery_errors.push(DiscoveryError::DuplicatePart {
                identity: part.identity().clone(),
            });
            return;
        }
        self.by_identity
            .insert(part.identity().clone(), self.parts.len());
        self.parts.push(part);
    }

    fn validate(part: &PartDefinition) -> Option<DiscoveryError> {
        if let Some(parameter) = part.unbound_parameters().into_iter().next() {
            return Some(DiscoveryError::UnboundTypeParameter {
                identity: part.identity().clone(),
                parameter,
            });
        }
        let mut positions = Vec::new();
        for import in part.imports() {
            if let ImportSite::Constructor { position } = import.site {
                if positions.contains(&position) {
                    return Some(DiscoveryError::DuplicateConstructorPosition {
                        identity: part.identity().clone(),
                        position,
                    });
                }
                positions.push(position);
            }
        }
        positions.sort_unstable();
        positions
            .iter()
            .enumerate()
            .find(|&(expected, &position)| expected != position)
            .map(|(missing, _)| DiscoveryError::ConstructorPositionGap {
                identity: part.identity().clone(),
                position: missing,
            })
    }
}
