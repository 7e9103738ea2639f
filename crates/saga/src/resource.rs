//! Resource injection into saga roots.

use crate::error::BoxError;

/// Injects external collaborators into a saga root before handler code runs.
///
/// Saga state is persisted without its resources, so injection runs on every
/// instance coming out of the store as well as on every newly created root.
pub trait ResourceInjector<T>: Send + Sync {
    fn inject_resources(&self, root: &mut T) -> Result<(), BoxError>;
}

/// Injector that provides no resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResourceInjector;

impl<T> ResourceInjector<T> for NoResourceInjector {
    fn inject_resources(&self, _root: &mut T) -> Result<(), BoxError> {
        Ok(())
    }
}
