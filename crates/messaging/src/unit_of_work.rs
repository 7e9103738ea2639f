//! Unit of work: transactional scope of one message-processing run.
//!
//! - Explicit context handle, passed to every collaborator (no thread-local
//!   ambient state)
//! - Nesting via parent links; `root()` resolves the processing tree root
//! - Prepare-commit hooks run on the commit-success path only
//! - Cleanup hooks are held by the tree root and run exactly once when the
//!   whole tree completes, commit or rollback
//! - Keyed, lazily-initialized resources scoped to the tree root
//!
//! The unit of work makes no assumptions about what its hooks do; saga
//! repositories use them to schedule persistence and cache eviction.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::warn;

/// Opaque error raised by a prepare-commit hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

type PrepareCommitHook = Box<dyn FnOnce(&UnitOfWork) -> Result<(), HookError> + Send>;
type CleanupHook = Box<dyn FnOnce(&UnitOfWork) + Send>;

/// Lifecycle phase of a unit of work.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Started,
    Committed,
    RolledBack,
}

/// Unit of work failure.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The unit was already completed when a lifecycle transition was requested.
    #[error("unit of work has already completed (phase: {actual:?})")]
    Phase { actual: Phase },

    /// A prepare-commit hook failed; the unit rolled back.
    #[error("prepare-commit hook failed")]
    Handler(#[source] HookError),
}

struct Inner {
    parent: Option<UnitOfWork>,
    phase: Mutex<Phase>,
    prepare_commit: Mutex<Vec<PrepareCommitHook>>,
    // Held by the tree root only; nested units delegate to their root.
    cleanup: Mutex<Vec<CleanupHook>>,
    resources: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

/// Handle to a unit of work.
///
/// Cloning the handle does not fork the transaction; all clones share the
/// same underlying unit. Use [`UnitOfWork::begin_nested`] to start a child
/// scope for synchronously triggered follow-up processing.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Inner>,
}

impl UnitOfWork {
    /// Begin a new root unit of work.
    pub fn begin() -> Self {
        Self::new(None)
    }

    /// Begin a unit of work nested under this one.
    ///
    /// The child keeps its own prepare-commit hooks and phase; cleanup and
    /// keyed resources resolve to the tree root.
    pub fn begin_nested(&self) -> Self {
        Self::new(Some(self.clone()))
    }

    fn new(parent: Option<UnitOfWork>) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent,
                phase: Mutex::new(Phase::Started),
                prepare_commit: Mutex::new(Vec::new()),
                cleanup: Mutex::new(Vec::new()),
                resources: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve the root of the processing tree this unit belongs to.
    pub fn root(&self) -> UnitOfWork {
        let mut current = self.clone();
        while let Some(parent) = current.inner.parent.clone() {
            current = parent;
        }
        current
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Whether two handles refer to the same underlying unit.
    pub fn same_unit(&self, other: &UnitOfWork) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn phase(&self) -> Phase {
        match self.inner.phase.lock() {
            Ok(phase) => *phase,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Register a hook to run when this unit commits.
    ///
    /// Hooks run in registration order, only on the commit-success path. A
    /// hook registered after the unit has completed never runs.
    pub fn on_prepare_commit(
        &self,
        hook: impl FnOnce(&UnitOfWork) -> Result<(), HookError> + Send + 'static,
    ) {
        if self.phase() != Phase::Started {
            warn!(phase = ?self.phase(), "prepare-commit hook registered on a completed unit of work; dropped");
            return;
        }
        if let Ok(mut hooks) = self.inner.prepare_commit.lock() {
            hooks.push(Box::new(hook));
        }
    }

    /// Register a hook to run when the processing tree completes.
    ///
    /// The hook is held by the tree root and runs exactly once, whether the
    /// tree commits or rolls back.
    pub fn on_cleanup(&self, hook: impl FnOnce(&UnitOfWork) + Send + 'static) {
        let root = self.root();
        if root.phase() != Phase::Started {
            warn!(phase = ?root.phase(), "cleanup hook registered on a completed processing tree; dropped");
            return;
        }
        if let Ok(mut hooks) = root.inner.cleanup.lock() {
            hooks.push(Box::new(hook));
        }
    }

    /// Fetch a keyed resource from the tree root, initializing it on first use.
    ///
    /// Resources are shared by every unit in the tree; repeated calls with the
    /// same key return the same `Arc`.
    pub fn get_or_compute_resource<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let root = self.root();
        let mut resources = match root.inner.resources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = resources.get(key) {
            if let Ok(typed) = Arc::clone(existing).downcast::<T>() {
                return typed;
            }
            warn!(key, "resource key re-used with a different type; replacing");
        }
        let fresh = Arc::new(init());
        resources.insert(key.to_string(), Arc::clone(&fresh) as Arc<dyn Any + Send + Sync>);
        fresh
    }

    /// Commit this unit of work.
    ///
    /// Runs the prepare-commit hooks in registration order. If a hook fails,
    /// the unit transitions to `RolledBack` and the error is returned; a root
    /// unit still runs cleanup. On success the unit transitions to
    /// `Committed` and a root unit runs its cleanup hooks.
    pub fn commit(&self) -> Result<(), UnitOfWorkError> {
        self.ensure_started()?;

        // Hooks may register further hooks while running; drain until quiet.
        loop {
            let hooks = match self.inner.prepare_commit.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            if hooks.is_empty() {
                break;
            }
            for hook in hooks {
                if let Err(cause) = hook(self) {
                    self.set_phase(Phase::RolledBack);
                    if self.is_root() {
                        self.run_cleanup();
                    }
                    return Err(UnitOfWorkError::Handler(cause));
                }
            }
        }

        self.set_phase(Phase::Committed);
        if self.is_root() {
            self.run_cleanup();
        }
        Ok(())
    }

    /// Roll back this unit of work.
    ///
    /// Prepare-commit hooks are discarded without running; a root unit still
    /// runs its cleanup hooks.
    pub fn rollback(&self) -> Result<(), UnitOfWorkError> {
        self.ensure_started()?;
        if let Ok(mut hooks) = self.inner.prepare_commit.lock() {
            hooks.clear();
        }
        self.set_phase(Phase::RolledBack);
        if self.is_root() {
            self.run_cleanup();
        }
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), UnitOfWorkError> {
        match self.phase() {
            Phase::Started => Ok(()),
            actual => Err(UnitOfWorkError::Phase { actual }),
        }
    }

    fn set_phase(&self, phase: Phase) {
        match self.inner.phase.lock() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }

    fn run_cleanup(&self) {
        let hooks = match self.inner.cleanup.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for hook in hooks {
            hook(self);
        }
    }
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("phase", &self.phase())
            .field("is_root", &self.is_root())
            .finish()
    }
}
