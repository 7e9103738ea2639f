//! Correlation key-value pairs.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Immutable correlation pair linking inbound events to saga instances.
///
/// Equality and ordering are by `(key, value)`. An association value is a
/// correlation token only; it never identifies a saga by itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssociationValue {
    key: String,
    value: String,
}

impl AssociationValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl core::fmt::Display for AssociationValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl ValueObject for AssociationValue {}
