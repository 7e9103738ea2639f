//! `sagaflow-saga` — saga lifecycle management.
//!
//! A saga is a long-running process instance that reacts to a stream of
//! inbound events and survives across many message-processing transactions.
//! The repository in this crate guarantees **exactly one live in-memory
//! instance per saga identifier**, no matter how many transactions touch the
//! same saga concurrently:
//!
//! - a repository-wide managed-instance cache deduplicates instances
//! - per-identifier exclusive locks serialize load/create/mutate/commit
//! - prepare-commit hooks on the unit of work run the insert/update/delete
//!   decision exactly once per transaction tree
//! - correlation lookups merge in-flight and persisted sagas, so a saga
//!   created in the current transaction is already discoverable

pub mod association;
pub mod error;
pub mod locking;
pub mod managed;
pub mod repository;
pub mod resource;
pub mod store;


pub use association::AssociationValues;
pub use error::{BoxError, SagaError};
pub use locking::{LockError, LockFactory, LockGuard, LockingSagaRepository};
pub use managed::{ManagedSaga, SagaRoot};
pub use repository::{CachingSagaRepository, SagaFactory, SagaRepository};
pub use resource::{NoResourceInjector, ResourceInjector};
pub use store::{InMemorySagaStore, SagaSnapshot, SagaStore, SagaStoreError};
