//! Recording activator for tests
//!
//! [`RecordingActivator`] builds a [`TestObject`] for every part, keeps the
//! values it was wired with, and counts creations and disposals. Member
//! exports read as `Arc<String>` values of the form `"Part.member"`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use partwire_core::TypeRef;

use crate::activator::{Activator, ImportValue, Instance};
use crate::error::ActivationError;

/// Instance created by [`RecordingActivator`]
#[derive(Debug)]
pub struct TestObject {
    part: TypeRef,
    args: Vec<ImportValue>,
    members: Mutex<BTreeMap<String, ImportValue>>,
}

impl TestObject {
    /// Identity of the part this object was created for
    pub fn part(&self) -> &TypeRef {
        &self.part
    }

    /// Constructor argument at `position`
    ///
    /// Returns [`ImportValue::Empty`] for positions past the end.
    pub fn arg(&self, position: usize) -> ImportValue {
        self.args.get(position).cloned().unwrap_or(ImportValue::Empty)
    }

    /// Number of constructor arguments received
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Value assigned to member `name`, if any
    pub fn member(&self, name: &str) -> Option<ImportValue> {
        self.members.lock().get(name).cloned()
    }
}

/// View an instance as a [`TestObject`]
pub fn object(instance: &Instance) -> Option<&TestObject> {
    instance.downcast_ref::<TestObject>()
}

/// Activator that records what the provider asks of it
#[derive(Debug, Default)]
pub struct RecordingActivator {
    created: Mutex<Vec<TypeRef>>,
    disposed: Mutex<Vec<TypeRef>>,
    delay: Option<Duration>,
    failing: Mutex<BTreeSet<TypeRef>>,
    failing_dispose: BTreeSet<TypeRef>,
    resolving_lazy: BTreeSet<TypeRef>,
}

impl RecordingActivator {
    /// Activator with no delay and no failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `create`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every `create` of `part` until [`RecordingActivator::clear_failures`]
    pub fn failing_on(self, part: TypeRef) -> Self {
        self.failing.lock().insert(part);
        self
    }

    /// Fail `dispose` of `part`
    pub fn failing_dispose_on(mut self, part: TypeRef) -> Self {
        self.failing_dispose.insert(part);
        self
    }

    /// Resolve lazy constructor arguments of `part` while creating it
    pub fn resolving_lazy_on(mut self, part: TypeRef) -> Self {
        self.resolving_lazy.insert(part);
        self
    }

    /// Stop failing creations
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Number of successful creations of `part`
    pub fn create_count(&self, part: &TypeRef) -> usize {
        self.created.lock().iter().filter(|p| *p == part).count()
    }

    /// Successful creations in call order
    pub fn created(&self) -> Vec<TypeRef> {
        self.created.lock().clone()
    }

    /// Disposed parts in call order
    pub fn disposed(&self) -> Vec<TypeRef> {
        self.disposed.lock().clone()
    }
}

impl Activator for RecordingActivator {
    fn create(&self, part: &TypeRef, args: Vec<ImportValue>) -> Result<Instance, ActivationError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.lock().contains(part) {
            return Err(ActivationError::new(format!("'{}' refused to start", part)));
        }
        if self.resolving_lazy.contains(part) {
            for arg in &args {
                if let Some(lazy) = arg.lazy() {
                    lazy.get()
                        .map_err(|e| ActivationError::new(e.to_string()))?;
                }
            }
        }

        self.created.lock().push(part.clone());
        Ok(Arc::new(TestObject {
            part: part.clone(),
            args,
            members: Mutex::new(BTreeMap::new()),
        }))
    }

    fn assign(
        &self,
        part: &TypeRef,
        instance: &Instance,
        member: &str,
        value: ImportValue,
    ) -> Result<(), ActivationError> {
        let target = object(instance).ok_or_else(|| {
            ActivationError::new(format!("instance of '{}' is not a test object", part))
        })?;
        target.members.lock().insert(member.to_string(), value);
        Ok(())
    }

    fn read_member(
        &self,
        part: &TypeRef,
        _instance: &Instance,
        member: &str,
    ) -> Result<Instance, ActivationError> {
        Ok(Arc::new(format!("{}.{}", part, member)))
    }

    fn dispose(&self, part: &TypeRef, _instance: &Instance) -> Result<(), ActivationError> {
        self.disposed.lock().push(part.clone());
        if self.failing_dispose.contains(part) {
            return Err(ActivationError::new(format!("'{}' failed to close", part)));
        }
        Ok(())
    }
}
