//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances
/// with the same attribute values are interchangeable. To "modify" one,
/// construct a new instance. This gives them primitive-like semantics: safe
/// to copy, compare, and share across threads.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
