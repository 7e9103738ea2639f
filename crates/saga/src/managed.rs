//! Managed saga instances.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sagaflow_core::{AssociationValue, Entity, SagaId, TrackingToken};

use crate::association::AssociationValues;

/// Metamodel seam for saga root types.
///
/// The repository treats the root as opaque; the only thing it needs from the
/// type itself is a stable name that scopes store operations, so distinct
/// saga types can share one store without colliding.
pub trait SagaRoot {
    /// Stable saga type identifier (e.g. "saga.order_fulfillment").
    fn saga_type() -> &'static str;
}

/// A live saga instance managed by the repository.
///
/// Wraps the domain-specific root with its identifier, association set,
/// activity flag and stream position. Instances are shared as
/// `Arc<ManagedSaga<T>>`; the repository cache guarantees at most one per
/// identifier, so `Arc::ptr_eq` is instance identity.
///
/// Mutation goes through `&self`: the per-identifier lock serializes writers
/// across transactions, while the internal `RwLock` keeps concurrent readers
/// (correlation lookups scan cached instances) safe.
#[derive(Debug)]
pub struct ManagedSaga<T> {
    identifier: SagaId,
    state: RwLock<SagaState<T>>,
}

#[derive(Debug)]
struct SagaState<T> {
    root: T,
    associations: AssociationValues,
    active: bool,
    tracking_token: Option<TrackingToken>,
}

impl<T> ManagedSaga<T> {
    /// Fresh instance for `create`: empty associations, no token, active.
    pub(crate) fn new(identifier: SagaId, root: T) -> Self {
        Self {
            identifier,
            state: RwLock::new(SagaState {
                root,
                associations: AssociationValues::new(),
                active: true,
                tracking_token: None,
            }),
        }
    }

    /// Rebuild an instance from a stored entry.
    pub(crate) fn reconstruct(
        identifier: SagaId,
        root: T,
        associations: BTreeSet<AssociationValue>,
        tracking_token: Option<TrackingToken>,
    ) -> Self {
        Self {
            identifier,
            state: RwLock::new(SagaState {
                root,
                associations: AssociationValues::from_committed(associations),
                active: true,
                tracking_token,
            }),
        }
    }

    // Writers are serialized by the per-identifier lock; a poisoned state
    // lock reflects a panic in caller code, not a torn update.
    fn read(&self) -> RwLockReadGuard<'_, SagaState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SagaState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &SagaId {
        &self.identifier
    }

    /// Whether the saga is still live. Once ended it is deleted, not
    /// updated, at commit time.
    pub fn is_active(&self) -> bool {
        self.read().active
    }

    /// Mark the saga as ended.
    ///
    /// The instance stays cached until the owning transaction tree
    /// completes; only the commit decision changes.
    pub fn end(&self) {
        self.write().active = false;
    }

    /// Associate the saga with a correlation value. Idempotent.
    pub fn associate(&self, value: AssociationValue) -> bool {
        self.write().associations.add(value)
    }

    /// Drop a correlation value from the saga. Idempotent.
    pub fn dissociate(&self, value: &AssociationValue) -> bool {
        self.write().associations.remove(value)
    }

    pub fn has_association(&self, value: &AssociationValue) -> bool {
        self.read().associations.contains(value)
    }

    /// The live association set.
    pub fn association_values(&self) -> BTreeSet<AssociationValue> {
        self.read().associations.as_set()
    }

    pub(crate) fn removed_association_values(&self) -> BTreeSet<AssociationValue> {
        self.read().associations.removed_associations().clone()
    }

    pub(crate) fn commit_associations(&self) {
        self.write().associations.commit();
    }

    pub fn tracking_token(&self) -> Option<TrackingToken> {
        self.read().tracking_token
    }

    /// Record the stream position of the last event this saga processed.
    pub fn set_tracking_token(&self, token: Option<TrackingToken>) {
        self.write().tracking_token = token;
    }

    /// Read access to the domain root.
    pub fn with_root<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read().root)
    }

    /// Mutable access to the domain root (handler invocations).
    pub fn with_root_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.write().root)
    }
}

impl<T> Entity for ManagedSaga<T> {
    type Id = SagaId;

    fn id(&self) -> &SagaId {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    fn sid(s: &str) -> SagaId {
        SagaId::new(s).unwrap()
    }

    fn av(key: &str, value: &str) -> AssociationValue {
        AssociationValue::new(key, value)
    }

    #[test]
    fn new_instances_start_active_with_no_token() {
        let saga = ManagedSaga::new(sid("s1"), Noop);
        assert!(saga.is_active());
        assert!(saga.tracking_token().is_none());
        assert!(saga.association_values().is_empty());
    }

    #[test]
    fn end_flips_the_activity_flag_only() {
        let saga = ManagedSaga::new(sid("s1"), Noop);
        saga.associate(av("k", "v"));
        saga.end();
        assert!(!saga.is_active());
        // Ending does not touch associations.
        assert!(saga.has_association(&av("k", "v")));
    }

    #[test]
    fn reconstructed_instances_carry_stored_state() {
        let associations: BTreeSet<_> = [av("orderId", "42")].into_iter().collect();
        let saga = ManagedSaga::reconstruct(
            sid("s2"),
            Noop,
            associations.clone(),
            Some(TrackingToken::new(7)),
        );
        assert!(saga.is_active());
        assert_eq!(saga.association_values(), associations);
        assert_eq!(saga.tracking_token(), Some(TrackingToken::new(7)));
    }

    #[test]
    fn root_access_reads_and_mutates() {
        let saga = ManagedSaga::new(sid("s3"), 0u32);
        saga.with_root_mut(|n| *n += 5);
        assert_eq!(saga.with_root(|n| *n), 5);
    }
}
