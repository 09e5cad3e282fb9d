//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. `Money` and
/// `Rate` are value objects: two amounts of 500 minor units are the same amount
/// no matter which repayment or deposit produced them.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
