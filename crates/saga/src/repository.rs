//! Saga repository: uniqueness cache, commit orchestration, correlation lookup.
//!
//! The repository guarantees at most one live in-memory instance per saga
//! identifier across all concurrently running processing trees. The cache is
//! a repository-wide field shared by unrelated trees; eviction is tied to the
//! tree root that introduced an entry. Keep that coupling: it is what the
//! per-identifier lock serializes against, and scoping the cache per tree
//! would weaken the uniqueness guarantee.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use sagaflow_core::{AssociationValue, SagaId};
use sagaflow_messaging::UnitOfWork;

use crate::error::{BoxError, SagaError};
use crate::managed::{ManagedSaga, SagaRoot};
use crate::resource::{NoResourceInjector, ResourceInjector};
use crate::store::{SagaStore, SagaStoreError};

/// Factory producing the domain-specific root for [`SagaRepository::create`].
pub type SagaFactory<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

/// Exposed surface of the saga lifecycle manager.
///
/// Consumed by the message-dispatch layer that routes events to saga
/// handlers. Every operation takes the current unit of work explicitly;
/// there is no ambient transaction context.
pub trait SagaRepository<T>: Send + Sync {
    /// Load the saga with the given identifier, or `None` if it is neither
    /// cached nor stored. A miss has no side effects.
    fn load(
        &self,
        uow: &UnitOfWork,
        identifier: &SagaId,
    ) -> Result<Option<Arc<ManagedSaga<T>>>, SagaError>;

    /// Create a new saga instance with the given identifier.
    ///
    /// The instance is cached immediately and scheduled for persistence when
    /// the current unit of work commits.
    fn create(
        &self,
        uow: &UnitOfWork,
        identifier: SagaId,
        factory: SagaFactory<T>,
    ) -> Result<Arc<ManagedSaga<T>>, SagaError>;

    /// Identifiers of all sagas associated with `association`, merging
    /// in-flight (cached, possibly uncommitted) and persisted instances.
    fn find(&self, association: &AssociationValue) -> Result<BTreeSet<SagaId>, SagaError>;
}

impl<T, R> SagaRepository<T> for Arc<R>
where
    R: SagaRepository<T> + ?Sized,
{
    fn load(
        &self,
        uow: &UnitOfWork,
        identifier: &SagaId,
    ) -> Result<Option<Arc<ManagedSaga<T>>>, SagaError> {
        (**self).load(uow, identifier)
    }

    fn create(
        &self,
        uow: &UnitOfWork,
        identifier: SagaId,
        factory: SagaFactory<T>,
    ) -> Result<Arc<ManagedSaga<T>>, SagaError> {
        (**self).create(uow, identifier, factory)
    }

    fn find(&self, association: &AssociationValue) -> Result<BTreeSet<SagaId>, SagaError> {
        (**self).find(association)
    }
}

type Cache<T> = Arc<Mutex<HashMap<SagaId, Arc<ManagedSaga<T>>>>>;
type UnsavedSet = Arc<Mutex<HashSet<SagaId>>>;

// The cache mutex only guards map operations; after a panic elsewhere the
// map itself is still consistent, so recover instead of propagating poison.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Repository core: managed-instance cache plus commit scheduling.
///
/// Wrap in a [`LockingSagaRepository`](crate::locking::LockingSagaRepository)
/// for production use; on its own this type guarantees instance uniqueness
/// but does not serialize access per identifier.
pub struct CachingSagaRepository<T, S> {
    store: Arc<S>,
    injector: Arc<dyn ResourceInjector<T>>,
    managed: Cache<T>,
    unsaved_resource_key: String,
}

impl<T, S> CachingSagaRepository<T, S>
where
    T: SagaRoot + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SagaStore + 'static,
{
    pub fn new(store: S) -> Self {
        Self::with_injector(store, Arc::new(NoResourceInjector))
    }

    pub fn with_injector(store: S, injector: Arc<dyn ResourceInjector<T>>) -> Self {
        Self {
            store: Arc::new(store),
            injector,
            managed: Arc::new(Mutex::new(HashMap::new())),
            unsaved_resource_key: format!("Repository[{}]/UnsavedSagas", T::saga_type()),
        }
    }

    /// Identifiers loaded or created in this processing tree whose commit
    /// action has not yet run. Presence gates commit-hook registration.
    fn unsaved_saga_resource(&self, process_root: &UnitOfWork) -> UnsavedSet {
        process_root.get_or_compute_resource(&self.unsaved_resource_key, || {
            Mutex::new(HashSet::new())
        })
    }

    /// Register eviction of `identifier` when the processing tree completes.
    fn evict_on_cleanup(&self, process_root: &UnitOfWork, identifier: SagaId) {
        let cache = Arc::clone(&self.managed);
        process_root.on_cleanup(move |_| {
            debug!(saga_id = %identifier, "evicting saga instance from cache");
            lock_unpoisoned(&cache).remove(&identifier);
        });
    }

    fn load_from_store(&self, identifier: &SagaId) -> Result<Option<ManagedSaga<T>>, SagaError> {
        let Some(snapshot) = self.store.load_saga(T::saga_type(), identifier)? else {
            return Ok(None);
        };
        let mut root: T = serde_json::from_value(snapshot.root).map_err(|e| {
            SagaStoreError::Serialization(format!("stored saga root decoding failed: {e}"))
        })?;
        self.injector
            .inject_resources(&mut root)
            .map_err(|e| SagaError::resource_injection(identifier.clone(), e))?;
        Ok(Some(ManagedSaga::reconstruct(
            identifier.clone(),
            root,
            snapshot.associations,
            snapshot.tracking_token,
        )))
    }
}

impl<T, S> SagaRepository<T> for CachingSagaRepository<T, S>
where
    T: SagaRoot + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: SagaStore + 'static,
{
    fn load(
        &self,
        uow: &UnitOfWork,
        identifier: &SagaId,
    ) -> Result<Option<Arc<ManagedSaga<T>>>, SagaError> {
        let process_root = uow.root();

        // Atomic compute-if-absent: the map lock is held across the store
        // lookup so two concurrent misses cannot both construct an instance.
        let saga = {
            let mut managed = lock_unpoisoned(&self.managed);
            match managed.get(identifier) {
                Some(existing) => Some(Arc::clone(existing)),
                None => match self.load_from_store(identifier)? {
                    Some(loaded) => {
                        debug!(saga_id = %identifier, "saga loaded from store");
                        let loaded = Arc::new(loaded);
                        managed.insert(identifier.clone(), Arc::clone(&loaded));
                        self.evict_on_cleanup(&process_root, identifier.clone());
                        Some(loaded)
                    }
                    None => None,
                },
            }
        };

        let Some(saga) = saga else {
            return Ok(None);
        };

        // One commit action per identifier per processing tree; repeated
        // loads reuse the hook registered by the first.
        let unsaved = self.unsaved_saga_resource(&process_root);
        if lock_unpoisoned(&unsaved).insert(identifier.clone()) {
            let store = Arc::clone(&self.store);
            let hook_saga = Arc::clone(&saga);
            let hook_unsaved = Arc::clone(&unsaved);
            let hook_id = identifier.clone();
            uow.on_prepare_commit(move |_| {
                lock_unpoisoned(&hook_unsaved).remove(&hook_id);
                commit_saga(store.as_ref(), &hook_saga)?;
                Ok(())
            });
        }

        Ok(Some(saga))
    }

    fn create(
        &self,
        uow: &UnitOfWork,
        identifier: SagaId,
        factory: SagaFactory<T>,
    ) -> Result<Arc<ManagedSaga<T>>, SagaError> {
        let process_root = uow.root();

        // Factory and injection run before any shared state is touched, so a
        // creation failure leaves no partial cache or unsaved-set entry.
        let mut root =
            factory().map_err(|e| SagaError::creation_failed(identifier.clone(), e))?;
        self.injector
            .inject_resources(&mut root)
            .map_err(|e| SagaError::creation_failed(identifier.clone(), e))?;

        let saga = Arc::new(ManagedSaga::new(identifier.clone(), root));
        debug!(saga_id = %identifier, saga_type = T::saga_type(), "created new saga instance");

        let unsaved = self.unsaved_saga_resource(&process_root);
        lock_unpoisoned(&unsaved).insert(identifier.clone());

        {
            let store = Arc::clone(&self.store);
            let hook_saga = Arc::clone(&saga);
            let hook_unsaved = Arc::clone(&unsaved);
            let hook_id = identifier.clone();
            uow.on_prepare_commit(move |_| {
                if hook_saga.is_active() {
                    insert_saga(store.as_ref(), &hook_saga)?;
                    lock_unpoisoned(&hook_unsaved).remove(&hook_id);
                } else {
                    // Ended in its creating transaction: nothing was ever
                    // inserted, but index entries for associations added and
                    // removed in flight still need dropping.
                    delete_saga(store.as_ref(), &hook_saga)?;
                }
                Ok(())
            });
        }

        lock_unpoisoned(&self.managed).insert(identifier.clone(), Arc::clone(&saga));
        self.evict_on_cleanup(&process_root, identifier);

        Ok(saga)
    }

    fn find(&self, association: &AssociationValue) -> Result<BTreeSet<SagaId>, SagaError> {
        let mut found = BTreeSet::new();
        {
            let managed = lock_unpoisoned(&self.managed);
            for (identifier, saga) in managed.iter() {
                if saga.has_association(association) {
                    found.insert(identifier.clone());
                }
            }
        }
        found.extend(self.store.find_sagas(T::saga_type(), association)?);
        Ok(found)
    }
}

/// Commit decision for a previously stored saga: delete when ended,
/// otherwise overwrite and fold the association deltas.
fn commit_saga<T, S>(store: &S, saga: &ManagedSaga<T>) -> Result<(), SagaError>
where
    T: SagaRoot + Serialize,
    S: SagaStore + ?Sized,
{
    if !saga.is_active() {
        delete_saga(store, saga)
    } else {
        store.update_saga(
            T::saga_type(),
            saga.id(),
            encode_root(saga)?,
            saga.tracking_token(),
            &saga.association_values(),
        )?;
        saga.commit_associations();
        Ok(())
    }
}

/// First persistence of a newly created saga.
fn insert_saga<T, S>(store: &S, saga: &ManagedSaga<T>) -> Result<(), SagaError>
where
    T: SagaRoot + Serialize,
    S: SagaStore + ?Sized,
{
    store.insert_saga(
        T::saga_type(),
        saga.id(),
        encode_root(saga)?,
        saga.tracking_token(),
        &saga.association_values(),
    )?;
    saga.commit_associations();
    Ok(())
}

/// Remove a saga together with every association index entry pointing at it,
/// including values removed in the transaction that ended it.
fn delete_saga<T, S>(store: &S, saga: &ManagedSaga<T>) -> Result<(), SagaError>
where
    T: SagaRoot,
    S: SagaStore + ?Sized,
{
    debug!(saga_id = %saga.id(), "saga ended; deleting from store");
    let mut associations = saga.association_values();
    associations.extend(saga.removed_association_values());
    store.delete_saga(T::saga_type(), saga.id(), &associations)?;
    Ok(())
}

fn encode_root<T: Serialize>(saga: &ManagedSaga<T>) -> Result<JsonValue, SagaStoreError> {
    saga.with_root(|root| serde_json::to_value(root))
        .map_err(|e| SagaStoreError::Serialization(format!("saga root encoding failed: {e}")))
}
