//! `sagaflow-messaging` — message-processing transaction mechanics.
//!
//! Each inbound message is processed inside a unit of work. Components that
//! need transactional behavior (repositories, stores) register hooks on the
//! unit of work rather than talking to each other directly.

pub mod unit_of_work;

pub use unit_of_work::{HookError, Phase, UnitOfWork, UnitOfWorkError};
