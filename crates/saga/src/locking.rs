//! Per-identifier exclusive locking.
//!
//! Serializes all access to a saga identifier across concurrently executing
//! processing trees: the lock obtained at load/create time is released only
//! when the owning tree completes, so a second tree referencing the same
//! identifier blocks until the first has fully committed or rolled back.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use sagaflow_core::{AssociationValue, SagaId};
use sagaflow_messaging::UnitOfWork;

use crate::error::SagaError;
use crate::managed::ManagedSaga;
use crate::repository::{SagaFactory, SagaRepository};

/// Lock acquisition failure.
///
/// The caller's transaction fails; no timeout is applied unless the factory
/// was configured with one.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for exclusive access to saga '{identifier}'")]
    Timeout {
        identifier: SagaId,
        timeout: Duration,
    },
}

#[derive(Debug, Default)]
struct HoldState {
    owner: Option<ThreadId>,
    hold_count: u32,
    waiters: u32,
}

#[derive(Debug, Default)]
struct IdentifierLock {
    state: Mutex<HoldState>,
    released: Condvar,
}

type Registry = Arc<Mutex<HashMap<SagaId, Arc<IdentifierLock>>>>;

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory of per-identifier exclusive locks.
///
/// Locks are reentrant within the owning thread, so nested units of work on
/// one processing tree can re-obtain a lock their tree already holds. Each
/// obtain returns its own guard; the lock is free once every guard is
/// released. Registry entries are dropped as soon as a lock is unowned and
/// unawaited, so the map does not grow with identifier churn.
#[derive(Debug, Default)]
pub struct LockFactory {
    timeout: Option<Duration>,
    registry: Registry,
}

impl LockFactory {
    /// Factory whose locks block indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose locks give up after `timeout`, failing the transaction.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            registry: Registry::default(),
        }
    }

    /// Obtain the exclusive lock for `identifier`, blocking while another
    /// thread holds it.
    pub fn obtain(&self, identifier: &SagaId) -> Result<LockGuard, LockError> {
        let me = thread::current().id();

        // Waiter registration happens under the registry lock, so release
        // cannot drop an entry another thread is about to wait on.
        let entry = {
            let mut registry = lock_unpoisoned(&self.registry);
            let entry = Arc::clone(registry.entry(identifier.clone()).or_default());
            let mut state = lock_unpoisoned(&entry.state);
            match state.owner {
                Some(owner) if owner == me => {
                    state.hold_count += 1;
                    drop(state);
                    return Ok(self.guard(identifier, entry));
                }
                None => {
                    state.owner = Some(me);
                    state.hold_count = 1;
                    drop(state);
                    return Ok(self.guard(identifier, entry));
                }
                Some(_) => {
                    state.waiters += 1;
                }
            }
            drop(state);
            entry
        };

        let mut state = lock_unpoisoned(&entry.state);
        match self.timeout {
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while state.owner.is_some() {
                    let now = Instant::now();
                    if now >= deadline {
                        // Owner still present, so the entry stays registered.
                        state.waiters -= 1;
                        drop(state);
                        warn!(saga_id = %identifier, ?timeout, "lock acquisition timed out");
                        return Err(LockError::Timeout {
                            identifier: identifier.clone(),
                            timeout,
                        });
                    }
                    let (guard, _) = entry
                        .released
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
            None => {
                while state.owner.is_some() {
                    state = entry
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        state.owner = Some(me);
        state.hold_count = 1;
        state.waiters -= 1;
        drop(state);

        Ok(self.guard(identifier, entry))
    }

    fn guard(&self, identifier: &SagaId, lock: Arc<IdentifierLock>) -> LockGuard {
        LockGuard {
            identifier: identifier.clone(),
            lock,
            registry: Arc::clone(&self.registry),
        }
    }

    #[cfg(test)]
    fn registered_locks(&self) -> usize {
        lock_unpoisoned(&self.registry).len()
    }
}

/// One hold on a per-identifier lock. Dropping the guard releases the hold.
#[derive(Debug)]
pub struct LockGuard {
    identifier: SagaId,
    lock: Arc<IdentifierLock>,
    registry: Registry,
}

impl LockGuard {
    /// Release this hold. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Registry before state: same order as obtain, so entry removal and
        // waiter registration cannot interleave.
        let mut registry = lock_unpoisoned(&self.registry);
        let mut state = lock_unpoisoned(&self.lock.state);
        state.hold_count = state.hold_count.saturating_sub(1);
        if state.hold_count == 0 {
            state.owner = None;
            self.lock.released.notify_one();
        }
        let unused = state.owner.is_none() && state.waiters == 0;
        drop(state);
        if unused {
            registry.remove(&self.identifier);
        }
    }
}

/// Decorator that serializes repository access per saga identifier.
///
/// Composition, not inheritance: the decorator obtains the identifier lock,
/// registers its release on the tree-root cleanup hook, then delegates.
/// Correlation lookups are not serialized.
pub struct LockingSagaRepository<R> {
    delegate: R,
    lock_factory: LockFactory,
}

impl<R> LockingSagaRepository<R> {
    pub fn new(delegate: R) -> Self {
        Self::with_lock_factory(delegate, LockFactory::new())
    }

    pub fn with_lock_factory(delegate: R, lock_factory: LockFactory) -> Self {
        Self {
            delegate,
            lock_factory,
        }
    }

    /// Lock `identifier` for the duration of the current processing tree.
    fn lock_saga_access(&self, uow: &UnitOfWork, identifier: &SagaId) -> Result<(), SagaError> {
        let guard = self.lock_factory.obtain(identifier)?;
        uow.root().on_cleanup(move |_| guard.release());
        Ok(())
    }
}

impl<T, R> SagaRepository<T> for LockingSagaRepository<R>
where
    R: SagaRepository<T>,
{
    fn load(
        &self,
        uow: &UnitOfWork,
        identifier: &SagaId,
    ) -> Result<Option<Arc<ManagedSaga<T>>>, SagaError> {
        self.lock_saga_access(uow, identifier)?;
        self.delegate.load(uow, identifier)
    }

    fn create(
        &self,
        uow: &UnitOfWork,
        identifier: SagaId,
        factory: SagaFactory<T>,
    ) -> Result<Arc<ManagedSaga<T>>, SagaError> {
        self.lock_saga_access(uow, &identifier)?;
        self.delegate.create(uow, identifier, factory)
    }

    fn find(&self, association: &AssociationValue) -> Result<BTreeSet<SagaId>, SagaError> {
        self.delegate.find(association)
    }
}
