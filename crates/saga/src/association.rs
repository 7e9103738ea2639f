//! Tracked, diffable association sets.

use std::collections::BTreeSet;

use sagaflow_core::AssociationValue;

/// The association set of a single saga, with pending-change tracking.
///
/// Three views are kept: the committed set (as last persisted), the values
/// added since, and the values removed since. Queries always see the live
/// view; the deltas let a commit persist exactly what changed, and let a
/// delete clean up index entries for values that were removed in the same
/// transaction that also ended the saga.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationValues {
    committed: BTreeSet<AssociationValue>,
    added: BTreeSet<AssociationValue>,
    removed: BTreeSet<AssociationValue>,
}

impl AssociationValues {
    /// Empty association set (fresh saga).
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted association set.
    pub fn from_committed(values: BTreeSet<AssociationValue>) -> Self {
        Self {
            committed: values,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Whether `value` is present in the live view.
    pub fn contains(&self, value: &AssociationValue) -> bool {
        !self.removed.contains(value)
            && (self.committed.contains(value) || self.added.contains(value))
    }

    /// Add an association value.
    ///
    /// Idempotent: adding a value that is already present is a no-op.
    /// Returns whether the live view changed.
    pub fn add(&mut self, value: AssociationValue) -> bool {
        // Re-adding a value removed earlier in this transaction cancels the
        // pending removal instead of recording a new addition.
        if self.removed.remove(&value) {
            return true;
        }
        if self.committed.contains(&value) {
            return false;
        }
        self.added.insert(value)
    }

    /// Remove an association value.
    ///
    /// Idempotent: removing an absent value is a no-op. Returns whether the
    /// live view changed.
    pub fn remove(&mut self, value: &AssociationValue) -> bool {
        if self.added.remove(value) {
            return true;
        }
        if self.committed.contains(value) && !self.removed.contains(value) {
            self.removed.insert(value.clone());
            return true;
        }
        false
    }

    /// Fold pending changes into the committed set and clear both deltas.
    ///
    /// Must be called exactly once per successful persistence of the owning
    /// saga.
    pub fn commit(&mut self) {
        self.committed.extend(std::mem::take(&mut self.added));
        for value in std::mem::take(&mut self.removed) {
            self.committed.remove(&value);
        }
    }

    /// Values removed since the last commit.
    ///
    /// Still populated until [`commit`](Self::commit) runs, so a delete can
    /// drop index entries for values removed in the deleting transaction.
    pub fn removed_associations(&self) -> &BTreeSet<AssociationValue> {
        &self.removed
    }

    /// Values added since the last commit.
    pub fn added_associations(&self) -> &BTreeSet<AssociationValue> {
        &self.added
    }

    /// The live association set: committed plus pending adds, minus pending
    /// removals.
    pub fn as_set(&self) -> BTreeSet<AssociationValue> {
        let mut set = self.committed.clone();
        set.extend(self.added.iter().cloned());
        for value in &self.removed {
            set.remove(value);
        }
        set
    }

    /// Number of values in the live view.
    pub fn len(&self) -> usize {
        // added is disjoint from committed, removed is a subset of committed.
        self.committed.len() + self.added.len() - self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
