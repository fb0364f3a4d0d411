//! Export provider
//!
//! Executes a [`RuntimeComposition`] through a host [`Activator`].
//!
//! ## Sharing
//!
//! Shared parts are constructed per construction group (see
//! [`RuntimeComposition::groups`]). Each group has one slot per provider:
//!
//! ```text
//! Empty ──claim──▶ Building(thread) ──publish──▶ Ready(instances)
//!   ▲                    │                            │
//!   └──── failure ───────┘                     dispose ▼
//!                                                 Released
//! ```
//!
//! The first caller claims the slot and builds the whole group; concurrent
//! callers wait on the slot's condvar and receive the published instances.
//! A group is therefore constructed at most once per provider, and groups
//! that do not depend on each other never contend.
//!
//! Non-shared parts are created on every request and are owned by the
//! caller; the provider does not track them.
//!
//! ## Boundaries
//!
//! A provider owns the slots of the groups declared in its boundary (the root
//! provider owns the global ones). [`ExportProvider::open_boundary`] creates
//! a child owning the groups of the named boundary; requests for anything
//! else are delegated up the parent chain, so globally shared instances stay
//! shared between children.
//!
//! ## Disposal
//!
//! Construction holds the provider's lifecycle lock for reading, disposal
//! takes it for writing. Disposal therefore waits for in-flight
//! construction, then releases every published shared instance in reverse
//! publication order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, RwLock};
use partwire_core::{ContractId, ExportSite, ImportCardinality, ImportSite, Metadata, TypeRef};
use tracing::{debug, info, warn};

use crate::activator::{Activator, ImportValue, Instance};
use crate::composition::{ExportLocation, RuntimeComposition, RuntimeImport, RuntimePart};
use crate::error::ProviderError;

// ============================================================================
// Group slots
// ============================================================================

enum SlotState {
    Empty,
    Building(ThreadId),
    Ready(Arc<Vec<Instance>>),
    Released,
}

struct GroupSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl GroupSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        }
    }
}

/// Resets a claimed slot if the builder fails or panics before publishing
struct ClaimGuard<'a> {
    slot: &'a GroupSlot,
    published: bool,
}

impl ClaimGuard<'_> {
    fn publish(mut self, instances: Arc<Vec<Instance>>) {
        let mut state = self.slot.state.lock();
        *state = SlotState::Ready(instances);
        self.published = true;
        self.slot.ready.notify_all();
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            let mut state = self.slot.state.lock();
            if matches!(*state, SlotState::Building(_)) {
                *state = SlotState::Empty;
            }
            self.slot.ready.notify_all();
        }
    }
}

// ============================================================================
// Provider state
// ============================================================================

struct ProviderInner {
    composition: Arc<RuntimeComposition>,
    activator: Arc<dyn Activator>,
    /// Export metadata per part, shared with every lazy export handed out
    metadata: Arc<Vec<Vec<Arc<Metadata>>>>,
    /// Index of each part within its group
    positions: Arc<Vec<usize>>,
    boundary: Option<String>,
    parent: Option<Arc<ProviderInner>>,
    /// Slots of the groups this provider owns
    slots: Vec<Option<GroupSlot>>,
    lifecycle: RwLock<()>,
    disposed: AtomicBool,
    /// Published shared instances in publication order
    ledger: Mutex<Vec<(usize, Instance)>>,
    weak_self: Weak<ProviderInner>,
}

/// Executes a runtime composition
///
/// Cloning is cheap and yields a handle to the same provider.
#[derive(Clone)]
pub struct ExportProvider {
    inner: Arc<ProviderInner>,
}

impl ExportProvider {
    /// Create a root provider for the global scope
    pub fn new(composition: Arc<RuntimeComposition>, activator: Arc<dyn Activator>) -> Self {
        let metadata: Vec<Vec<Arc<Metadata>>> = composition
            .parts()
            .iter()
            .map(|part| {
                part.exports
                    .iter()
                    .map(|export| Arc::new(export.metadata.clone()))
                    .collect()
            })
            .collect();

        let mut positions = vec![0; composition.parts().len()];
        for members in composition.groups() {
            for (position, &part) in members.iter().enumerate() {
                positions[part] = position;
            }
        }

        let inner = ProviderInner::new(
            composition,
            activator,
            Arc::new(metadata),
            Arc::new(positions),
            None,
            None,
        );
        debug!(
            target: "partwire::provider",
            groups = inner.slots.iter().flatten().count(),
            "Created export provider"
        );
        Self { inner }
    }

    /// Open a sharing boundary as a child provider
    ///
    /// The child constructs fresh instances of parts declared in `boundary`
    /// and delegates everything else to this provider.
    pub fn open_boundary(&self, boundary: impl Into<String>) -> Result<ExportProvider, ProviderError> {
        self.inner.ensure_live()?;
        let boundary = boundary.into();
        let inner = ProviderInner::new(
            Arc::clone(&self.inner.composition),
            Arc::clone(&self.inner.activator),
            Arc::clone(&self.inner.metadata),
            Arc::clone(&self.inner.positions),
            Some(boundary.clone()),
            Some(Arc::clone(&self.inner)),
        );
        debug!(
            target: "partwire::provider",
            boundary = %boundary,
            groups = inner.slots.iter().flatten().count(),
            "Opened sharing boundary"
        );
        Ok(Self { inner })
    }

    /// The single export of `contract`
    ///
    /// # Errors
    ///
    /// [`ProviderError::Cardinality`] unless exactly one export is visible;
    /// [`ProviderError::BoundaryNotOpen`] if the only exports live in a
    /// boundary this provider has not opened.
    pub fn get_export(&self, contract: &ContractId) -> Result<Instance, ProviderError> {
        let visible = self.inner.visible_exports(contract)?;
        match visible.as_slice() {
            [location] => self.inner.export_value(*location, None),
            _ => Err(ProviderError::Cardinality {
                contract: contract.clone(),
                expected: ImportCardinality::ExactlyOne,
                actual: visible.len(),
            }),
        }
    }

    /// The export of `contract`, if any
    pub fn try_get_export(&self, contract: &ContractId) -> Result<Option<Instance>, ProviderError> {
        let visible = self.inner.visible_exports(contract)?;
        match visible.as_slice() {
            [] => Ok(None),
            [location] => self.inner.export_value(*location, None).map(Some),
            _ => Err(ProviderError::Cardinality {
                contract: contract.clone(),
                expected: ImportCardinality::ZeroOrOne,
                actual: visible.len(),
            }),
        }
    }

    /// Every visible export of `contract`, in part order
    ///
    /// Exports living in boundaries that are not open are skipped.
    pub fn get_exports(&self, contract: &ContractId) -> Result<Vec<Instance>, ProviderError> {
        self.inner.ensure_live()?;
        self.inner
            .reachable_exports(contract)
            .into_iter()
            .map(|location| self.inner.export_value(location, None))
            .collect()
    }

    /// Deferred accessors for every visible export of `contract`
    ///
    /// Nothing is constructed until [`LazyExport::get`] is called; metadata
    /// is available immediately.
    pub fn get_lazy_exports(&self, contract: &ContractId) -> Result<Vec<LazyExport>, ProviderError> {
        self.inner.ensure_live()?;
        Ok(self
            .inner
            .reachable_exports(contract)
            .into_iter()
            .map(|location| self.inner.lazy_export(location))
            .collect())
    }

    /// Release every shared instance this provider constructed
    ///
    /// Waits for in-flight construction. Idempotent. Instances of parent
    /// providers are not affected.
    pub fn dispose(&self) -> Result<(), ProviderError> {
        self.inner.dispose()
    }

    /// True once [`ExportProvider::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Boundary of this provider, `None` for the root
    pub fn boundary(&self) -> Option<&str> {
        self.inner.boundary.as_deref()
    }

    /// The executed composition
    pub fn composition(&self) -> &Arc<RuntimeComposition> {
        &self.inner.composition
    }
}

impl fmt::Debug for ExportProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportProvider")
            .field("boundary", &self.inner.boundary)
            .field("parts", &self.inner.composition.parts().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ProviderInner {
    fn new(
        composition: Arc<RuntimeComposition>,
        activator: Arc<dyn Activator>,
        metadata: Arc<Vec<Vec<Arc<Metadata>>>>,
        positions: Arc<Vec<usize>>,
        boundary: Option<String>,
        parent: Option<Arc<ProviderInner>>,
    ) -> Arc<Self> {
        let slots = composition
            .groups()
            .iter()
            .map(|members| {
                let owned = members
                    .first()
                    .and_then(|&part| composition.part(part))
                    .map_or(false, |part| part.scope.boundary == boundary);
                owned.then(GroupSlot::new)
            })
            .collect();

        Arc::new_cyclic(|weak_self| ProviderInner {
            composition,
            activator,
            metadata,
            positions,
            boundary,
            parent,
            slots,
            lifecycle: RwLock::new(()),
            disposed: AtomicBool::new(false),
            ledger: Mutex::new(Vec::new()),
            weak_self: weak_self.clone(),
        })
    }

    fn ensure_live(&self) -> Result<(), ProviderError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(ProviderError::Disposed)
        } else {
            Ok(())
        }
    }

    fn part(&self, index: usize) -> Result<&RuntimePart, ProviderError> {
        self.composition
            .part(index)
            .ok_or_else(|| ProviderError::Invariant(format!("part index {} out of range", index)))
    }

    /// Provider in the parent chain that owns `part`'s boundary
    fn owner(&self, part: &RuntimePart) -> Option<&ProviderInner> {
        let mut current = self;
        loop {
            if current.boundary == part.scope.boundary {
                return Some(current);
            }
            current = current.parent.as_deref()?;
        }
    }

    fn owner_of(&self, index: usize) -> Result<&ProviderInner, ProviderError> {
        let part = self.part(index)?;
        self.owner(part).ok_or_else(|| ProviderError::BoundaryNotOpen {
            part: part.identity.clone(),
            boundary: part.scope.boundary.clone().unwrap_or_default(),
        })
    }

    /// Exports of `contract` whose owning boundary is reachable
    fn reachable_exports(&self, contract: &ContractId) -> Vec<ExportLocation> {
        self.composition
            .exports_for(contract)
            .iter()
            .copied()
            .filter(|location| {
                self.composition
                    .part(location.part)
                    .map_or(false, |part| self.owner(part).is_some())
            })
            .collect()
    }

    /// Reachable exports, or `BoundaryNotOpen` if every export is out of reach
    fn visible_exports(&self, contract: &ContractId) -> Result<Vec<ExportLocation>, ProviderError> {
        self.ensure_live()?;
        let visible = self.reachable_exports(contract);
        if visible.is_empty() {
            if let Some(hidden) = self.composition.exports_for(contract).first() {
                self.owner_of(hidden.part)?;
            }
        }
        Ok(visible)
    }

    fn lazy_export(&self, location: ExportLocation) -> LazyExport {
        let metadata = self
            .metadata
            .get(location.part)
            .and_then(|exports| exports.get(location.export))
            .cloned()
            .unwrap_or_default();
        LazyExport {
            provider: self.weak_self.clone(),
            location,
            metadata,
            value: Arc::new(OnceCell::new()),
        }
    }

    /// Value of one export
    ///
    /// `local` carries the group under construction and the instances built
    /// so far, so members of the same group are wired without a second claim.
    fn export_value(
        &self,
        location: ExportLocation,
        local: Option<(usize, &[Instance])>,
    ) -> Result<Instance, ProviderError> {
        let part = self.part(location.part)?;
        let export = part.exports.get(location.export).ok_or_else(|| {
            ProviderError::Invariant(format!(
                "export {} of '{}' out of range",
                location.export, part.identity
            ))
        })?;

        let instance = match (local, part.group) {
            (Some((group, built)), Some(g)) if g == group => built
                .get(self.positions[location.part])
                .cloned()
                .ok_or_else(|| {
                    ProviderError::Invariant(format!(
                        "'{}' used before construction within its group",
                        part.identity
                    ))
                })?,
            _ => self.instance(location.part)?,
        };

        match &export.site {
            ExportSite::Part => Ok(instance),
            ExportSite::Member { name } => self
                .activator
                .read_member(&part.identity, &instance, name)
                .map_err(|source| ProviderError::Activation {
                    part: part.identity.clone(),
                    source,
                }),
        }
    }

    fn instance(&self, index: usize) -> Result<Instance, ProviderError> {
        let owner = self.owner_of(index)?;
        let part = owner.part(index)?;
        match part.group {
            Some(group) => {
                let instances = owner.group_instances(group)?;
                instances.get(owner.positions[index]).cloned().ok_or_else(|| {
                    ProviderError::Invariant(format!("'{}' missing from its group", part.identity))
                })
            }
            None => owner.create_non_shared(index),
        }
    }

    fn group_instances(&self, group: usize) -> Result<Arc<Vec<Instance>>, ProviderError> {
        let slot = self
            .slots
            .get(group)
            .and_then(Option::as_ref)
            .ok_or_else(|| ProviderError::Invariant(format!("group {} has no slot", group)))?;

        let _lifecycle = self.lifecycle.read_recursive();
        self.ensure_live()?;

        let me = thread::current().id();
        let claim = {
            let mut state = slot.state.lock();
            loop {
                match &*state {
                    SlotState::Ready(instances) => return Ok(Arc::clone(instances)),
                    SlotState::Released => return Err(ProviderError::Disposed),
                    SlotState::Building(builder) if *builder == me => {
                        return Err(ProviderError::ReentrantConstruction {
                            part: self.group_head(group),
                        })
                    }
                    SlotState::Building(_) => slot.ready.wait(&mut state),
                    SlotState::Empty => {
                        *state = SlotState::Building(me);
                        break ClaimGuard {
                            slot,
                            published: false,
                        };
                    }
                }
            }
        };

        let instances = Arc::new(self.build_group(group)?);
        {
            let members = &self.composition.groups()[group];
            let mut ledger = self.ledger.lock();
            ledger.extend(members.iter().copied().zip(instances.iter().cloned()));
        }
        claim.publish(Arc::clone(&instances));
        Ok(instances)
    }

    fn group_head(&self, group: usize) -> TypeRef {
        self.composition.groups()[group]
            .first()
            .and_then(|&part| self.composition.part(part))
            .map(|part| part.identity.clone())
            .unwrap_or_else(|| TypeRef::named("<empty group>"))
    }

    /// Construct every member, then assign member imports
    fn build_group(&self, group: usize) -> Result<Vec<Instance>, ProviderError> {
        let members = &self.composition.groups()[group];
        debug!(
            target: "partwire::provider",
            group,
            head = %self.group_head(group),
            size = members.len(),
            boundary = ?self.boundary,
            "Constructing shared group"
        );

        let mut built: Vec<Instance> = Vec::with_capacity(members.len());
        for &index in members {
            let part = self.part(index)?;
            let args = part
                .constructor
                .iter()
                .map(|import| self.import_value(import, Some((group, built.as_slice()))))
                .collect::<Result<Vec<_>, _>>()?;
            built.push(self.create(part, args)?);
        }
        for (&index, instance) in members.iter().zip(&built) {
            let part = self.part(index)?;
            for import in &part.members {
                let value = self.import_value(import, Some((group, built.as_slice())))?;
                self.assign(part, instance, import, value)?;
            }
        }
        Ok(built)
    }

    fn create_non_shared(&self, index: usize) -> Result<Instance, ProviderError> {
        let _lifecycle = self.lifecycle.read_recursive();
        self.ensure_live()?;

        let part = self.part(index)?;
        let args = part
            .constructor
            .iter()
            .map(|import| self.import_value(import, None))
            .collect::<Result<Vec<_>, _>>()?;
        let instance = self.create(part, args)?;
        for import in &part.members {
            let value = self.import_value(import, None)?;
            self.assign(part, &instance, import, value)?;
        }
        Ok(instance)
    }

    fn create(&self, part: &RuntimePart, args: Vec<ImportValue>) -> Result<Instance, ProviderError> {
        self.activator
            .create(&part.identity, args)
            .map_err(|source| ProviderError::Activation {
                part: part.identity.clone(),
                source,
            })
    }

    fn assign(
        &self,
        part: &RuntimePart,
        instance: &Instance,
        import: &RuntimeImport,
        value: ImportValue,
    ) -> Result<(), ProviderError> {
        let member = match &import.site {
            ImportSite::Member { name } => name,
            ImportSite::Constructor { position } => {
                return Err(ProviderError::Invariant(format!(
                    "constructor argument #{} of '{}' listed as member import",
                    position, part.identity
                )))
            }
        };
        self.activator
            .assign(&part.identity, instance, member, value)
            .map_err(|source| ProviderError::Activation {
                part: part.identity.clone(),
                source,
            })
    }

    fn import_value(
        &self,
        import: &RuntimeImport,
        local: Option<(usize, &[Instance])>,
    ) -> Result<ImportValue, ProviderError> {
        let count = import.sources.len();
        let fits = match import.cardinality {
            ImportCardinality::ExactlyOne => count == 1,
            ImportCardinality::ZeroOrOne => count <= 1,
            ImportCardinality::ZeroOrMore => true,
        };
        if !fits {
            return Err(ProviderError::Cardinality {
                contract: import.contract.clone(),
                expected: import.cardinality,
                actual: count,
            });
        }

        if import.lazy {
            let mut exports: Vec<LazyExport> =
                import.sources.iter().map(|&l| self.lazy_export(l)).collect();
            return Ok(match import.cardinality {
                ImportCardinality::ZeroOrMore => ImportValue::LazyMany(exports),
                _ => exports.pop().map_or(ImportValue::Empty, ImportValue::Lazy),
            });
        }

        let mut values = import
            .sources
            .iter()
            .map(|&location| self.export_value(location, local))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match import.cardinality {
            ImportCardinality::ZeroOrMore => ImportValue::Many(values),
            _ => values.pop().map_or(ImportValue::Empty, ImportValue::Single),
        })
    }

    fn dispose(&self) -> Result<(), ProviderError> {
        let _lifecycle = self.lifecycle.write();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for slot in self.slots.iter().flatten() {
            let mut state = slot.state.lock();
            *state = SlotState::Released;
            slot.ready.notify_all();
        }

        let ledger = std::mem::take(&mut *self.ledger.lock());
        let mut failures = Vec::new();
        for (index, instance) in ledger.iter().rev() {
            let Some(part) = self.composition.part(*index) else {
                continue;
            };
            if let Err(e) = self.activator.dispose(&part.identity, instance) {
                warn!(
                    target: "partwire::provider",
                    part = %part.identity,
                    error = %e,
                    "Failed to dispose instance"
                );
                failures.push(format!("{}: {}", part.identity, e));
            }
        }

        info!(
            target: "partwire::provider",
            boundary = ?self.boundary,
            released = ledger.len(),
            failed = failures.len(),
            "Disposed export provider"
        );

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(ProviderError::DisposeFailed {
                count: failures.len(),
                first: first.clone(),
            }),
        }
    }
}

// ============================================================================
// Lazy exports
// ============================================================================

/// Deferred accessor for one export
///
/// Construction happens on the first successful [`LazyExport::get`]; clones
/// share the memoized value. The accessor does not keep its provider alive.
#[derive(Clone)]
pub struct LazyExport {
    provider: Weak<ProviderInner>,
    location: ExportLocation,
    metadata: Arc<Metadata>,
    value: Arc<OnceCell<Instance>>,
}

impl LazyExport {
    /// The export's value, constructing it on first access
    ///
    /// # Errors
    ///
    /// [`ProviderError::Disposed`] once the provider is gone;
    /// [`ProviderError::ReentrantConstruction`] when called from a
    /// constructor of the same group on the same thread.
    ///
    /// # Deadlocks
    ///
    /// Calling `get` inside an [`Activator`] constructor waits for the
    /// target's group if another thread is building it. When two threads
    /// build the two halves of a lazy cycle and each resolves the other half
    /// from its constructor, both wait forever. Resolve lazy exports after
    /// construction (from a method or a member assignment) to stay clear of
    /// this.
    pub fn get(&self) -> Result<Instance, ProviderError> {
        self.value
            .get_or_try_init(|| {
                let provider = self.provider.upgrade().ok_or(ProviderError::Disposed)?;
                provider.export_value(self.location, None)
            })
            .cloned()
    }

    /// Export metadata, available without construction
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Address of the export in the composition
    pub fn location(&self) -> ExportLocation {
        self.location
    }

    /// True once the value has been obtained through this accessor
    pub fn is_created(&self) -> bool {
        self.value.get().is_some()
    }
}

impl fmt::Debug for LazyExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyExport")
            .field("location", &self.location)
            .field("created", &self.is_created())
            .finish()
    }
}
