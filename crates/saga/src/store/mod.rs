//! Correlation-indexed saga storage boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading saga instances without making any storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemorySagaStore;
pub use r#trait::{SagaSnapshot, SagaStore, SagaStoreError};
