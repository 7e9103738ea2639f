//! Saga subsystem error taxonomy.

use thiserror::Error;

use sagaflow_core::SagaId;

use crate::locking::LockError;
use crate::store::SagaStoreError;

/// Opaque cause raised by caller-supplied collaborators (saga factories,
/// resource injectors).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Saga repository operation failure.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga factory or resource injector failed during `create`.
    ///
    /// The repository guarantees no partial cache or unsaved-set state
    /// remains when this is returned.
    #[error("failed to create managed saga instance '{identifier}'")]
    CreationFailed {
        identifier: SagaId,
        #[source]
        source: BoxError,
    },

    /// Resource injection failed while reconstructing a stored saga.
    #[error("failed to inject resources into saga '{identifier}'")]
    ResourceInjection {
        identifier: SagaId,
        #[source]
        source: BoxError,
    },

    /// The persistence collaborator failed.
    ///
    /// Propagated unchanged to the owning transaction's commit pipeline; the
    /// repository performs no retries of its own.
    #[error("saga store operation failed")]
    Store(#[from] SagaStoreError),

    /// The per-identifier lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SagaError {
    pub fn creation_failed(identifier: SagaId, source: impl Into<BoxError>) -> Self {
        Self::CreationFailed {
            identifier,
            source: source.into(),
        }
    }

    pub fn resource_injection(identifier: SagaId, source: impl Into<BoxError>) -> Self {
        Self::ResourceInjection {
            identifier,
            source: source.into(),
        }
    }
}
