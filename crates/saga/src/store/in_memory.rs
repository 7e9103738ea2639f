use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use sagaflow_core::{AssociationValue, SagaId, TrackingToken};

use super::r#trait::{SagaSnapshot, SagaStore, SagaStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    saga_type: String,
    identifier: SagaId,
}

impl EntryKey {
    fn new(saga_type: &str, identifier: &SagaId) -> Self {
        Self {
            saga_type: saga_type.to_string(),
            identifier: identifier.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSaga {
    root: JsonValue,
    tracking_token: Option<TrackingToken>,
    associations: BTreeSet<AssociationValue>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    sagas: HashMap<EntryKey, StoredSaga>,
    index: HashMap<(String, AssociationValue), BTreeSet<SagaId>>,
}

impl Inner {
    fn drop_index_entries(
        &mut self,
        saga_type: &str,
        identifier: &SagaId,
        values: &BTreeSet<AssociationValue>,
    ) {
        for value in values {
            let key = (saga_type.to_string(), value.clone());
            if let Some(bucket) = self.index.get_mut(&key) {
                bucket.remove(identifier);
                if bucket.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    fn upsert(
        &mut self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) {
        let key = EntryKey::new(saga_type, identifier);

        // Rewrite the index: old entries out, new entries in.
        let stale = self
            .sagas
            .get(&key)
            .map(|previous| previous.associations.clone());
        if let Some(stale) = stale {
            self.drop_index_entries(saga_type, identifier, &stale);
        }
        for value in associations {
            self.index
                .entry((saga_type.to_string(), value.clone()))
                .or_default()
                .insert(identifier.clone());
        }

        self.sagas.insert(
            key,
            StoredSaga {
                root,
                tracking_token,
                associations: associations.clone(),
                updated_at: Utc::now(),
            },
        );
    }
}

/// In-memory correlation-indexed saga store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemorySagaStore {
    inner: RwLock<Inner>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sagas (all saga types).
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.sagas.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the entry for `identifier` was last written, if it exists.
    pub fn updated_at(&self, saga_type: &str, identifier: &SagaId) -> Option<DateTime<Utc>> {
        self.inner.read().ok().and_then(|inner| {
            inner
                .sagas
                .get(&EntryKey::new(saga_type, identifier))
                .map(|stored| stored.updated_at)
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, SagaStoreError> {
        self.inner
            .read()
            .map_err(|_| SagaStoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, SagaStoreError> {
        self.inner
            .write()
            .map_err(|_| SagaStoreError::Backend("lock poisoned".to_string()))
    }
}

impl SagaStore for InMemorySagaStore {
    fn load_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
    ) -> Result<Option<SagaSnapshot>, SagaStoreError> {
        let inner = self.read()?;
        Ok(inner
            .sagas
            .get(&EntryKey::new(saga_type, identifier))
            .map(|stored| SagaSnapshot {
                root: stored.root.clone(),
                associations: stored.associations.clone(),
                tracking_token: stored.tracking_token,
            }))
    }

    fn insert_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        let mut inner = self.write()?;
        inner.upsert(saga_type, identifier, root, tracking_token, associations);
        Ok(())
    }

    fn update_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        root: JsonValue,
        tracking_token: Option<TrackingToken>,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        let mut inner = self.write()?;
        inner.upsert(saga_type, identifier, root, tracking_token, associations);
        Ok(())
    }

    fn delete_saga(
        &self,
        saga_type: &str,
        identifier: &SagaId,
        associations: &BTreeSet<AssociationValue>,
    ) -> Result<(), SagaStoreError> {
        let mut inner = self.write()?;
        inner.sagas.remove(&EntryKey::new(saga_type, identifier));
        inner.drop_index_entries(saga_type, identifier, associations);
        Ok(())
    }

    fn find_sagas(
        &self,
        saga_type: &str,
        association: &AssociationValue,
    ) -> Result<BTreeSet<SagaId>, SagaStoreError> {
        let inner = self.read()?;
        Ok(inner
            .index
            .get(&(saga_type.to_string(), association.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
