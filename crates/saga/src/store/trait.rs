use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use sagaflow_core::{AssociationValue, SagaId, TrackingToken};

/// A stored saga entry as returned by [`SagaStore::load_saga`].
///
/// The root travels as JSON: the repository encodes and decodes the typed
/// root at this boundary, so store implementations stay independent of the
/// domain types they persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaSnapshot {
    pub root: JsonValue,
    pub associations: BTreeSet<AssociationValue>,
    pub tracking_token: Option<TrackingToken>,
}

/// Saga store operation error.
///
/// These are **infrastructure errors**; the repository propagates them
/// unchanged into the owning transaction's commit pipeline.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The storage backend failed (IO, lock poisoning, connectivity).
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// A saga root could not be encoded to or decoded from its stored form.
    #[error("saga payload serialization failed: {0}")]
    Serialization(String),
}

/// Correlation-indexed saga storage.
///
/// Stores one entry per (saga type, identifier), plus an association index
/// mapping correlation values to saga identifiers.
///
/// ## Implementation requirements
///
/// - `insert_saga` / `update_saga` must leave the association index matching
///   the provided association set exactly
/// - `delete_saga` removes the entry and drops index entries for precisely
///   the provided values (callers include values removed in the deleting
///   transaction); deleting an unknown identifier is a no-op
/// - operations for one saga type must never observe another type's entries
pub trait SagaStore: Send + Sync {
    /// Load a stored saga entry, or `None` when the identifier is unknown.
    fn load_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
    ) -> Result<Option<SagaSnapshot>, SagaStoreError>;

    /// Store a newly created saga.
    fn insert_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError>;

    /// Overwrite a stored saga's root, tracking token and association set.
    fn update_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError>;

    /// Remove a saga and drop the given association index entries.
    fn delete_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError>;

    /// Identifiers of stored sagas associated with `association`.
    fn find_sagas(
        &self,
        saga_type: &str,
        association: &AssociationValue,
    ) -> Result<BTreeSet<SagaId>, SagaStoreError>;
}

impl<S> SagaStore for Arc<S>
where
    S: SagaStore + ?Sized,
{
    fn load_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
    ) -> Result<Option<SagaSnapshot>, SagaStoreError> {
        (**self).load_saga(saga_type, identifier)
    }

    fn insert_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        (**self).insert_saga(saga_type, identifier, root, tracking_token, associations)
    }

    fn update_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        (**self).update_saga(saga_type, identifier, root, tracking_token, associations)
    }

    fn delete_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        (**self).delete_saga(saga_type, identifier, associations)
    }

    fn find_sagas(
        &self,
        saga_type: &str,
        association: &AssociationValue,
    ) -> Result<BTreeSet<SagaId>, SagaStoreError> {
        (**self).find_sagas(saga_type, association)
    }
}
