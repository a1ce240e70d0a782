//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two value
/// objects with the same attribute values are equal. To "modify" one, create
/// a new one. Delivery details on an order are a value object; the order
/// itself is an aggregate with identity.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
