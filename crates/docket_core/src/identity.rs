//! Record identity.
//!
//! Both engines address records by an `i32` id stored inside the record
//! itself. An id of `0` means "not assigned yet"; the engine fills in the
//! next free id on insert.
//!
//! Record types expose their id field in one of two ways:
//!
//! - implement [`Identity`] when the field is the conventional `id`
//! - build an [`IdAccessor`] for any other field, usually with
//!   [`id_field!`](crate::id_field)
//!
//! Types without an id can still be stored, but operations that address a
//! record by id fail with [`CoreError::MissingIdentity`](crate::CoreError).

use std::fmt;

/// Record types whose identity lives in a field named `id`.
///
/// ```
/// use docket_core::Identity;
///
/// struct Task {
///     id: i32,
///     title: String,
/// }
///
/// impl Identity for Task {
///     fn id(&self) -> i32 {
///         self.id
///     }
///
///     fn set_id(&mut self, id: i32) {
///         self.id = id;
///     }
/// }
/// ```
pub trait Identity {
    /// Returns the record's id (`0` if unassigned).
    fn id(&self) -> i32;

    /// Overwrites the record's id.
    fn set_id(&mut self, id: i32);
}

/// Getter/setter pair for a record type's id field.
///
/// Accessors are plain function pointers, so they are `Copy`, free to
/// call, and can be built once per type and shared by every engine
/// instance.
pub struct IdAccessor<T> {
    field: &'static str,
    get: fn(&T) -> i32,
    set: fn(&mut T, i32),
}

impl<T> IdAccessor<T> {
    /// Creates an accessor from a field name and its getter and setter.
    #[must_use]
    pub const fn new(field: &'static str, get: fn(&T) -> i32, set: fn(&mut T, i32)) -> Self {
        Self { field, get, set }
    }

    /// Returns the name of the id field.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// Reads the id of `item`.
    #[inline]
    pub fn get(&self, item: &T) -> i32 {
        (self.get)(item)
    }

    /// Writes `id` into `item`.
    #[inline]
    pub fn set(&self, item: &mut T, id: i32) {
        (self.set)(item, id);
    }
}

impl<T: Identity> IdAccessor<T> {
    /// Returns the accessor for an [`Identity`] type.
    #[must_use]
    pub fn identity() -> Self {
        Self::new("id", T::id, T::set_id)
    }
}

impl<T> Clone for IdAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IdAccessor<T> {}

impl<T> fmt::Debug for IdAccessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdAccessor")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// Builds an [`IdAccessor`] for a named `i32` field.
///
/// ```
/// use docket_core::id_field;
///
/// struct Order {
///     order_no: i32,
/// }
///
/// let accessor = id_field!(Order, order_no);
/// let mut order = Order { order_no: 0 };
/// accessor.set(&mut order, 12);
/// assert_eq!(accessor.get(&order), 12);
/// assert_eq!(accessor.field(), "order_no");
/// ```
#[macro_export]
macro_rules! id_field {
    ($ty:ty, $field:ident) => {
        $crate::IdAccessor::<$ty>::new(
            stringify!($field),
            |item: &$ty| item.$field,
            |item: &mut $ty, id: i32| item.$field = id,
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Person {
        id: i32,
        badge: i32,
    }

    impl Identity for Person {
        fn id(&self) -> i32 {
            self.id
        }

        fn set_id(&mut self, id: i32) {
            self.id = id;
        }
    }

    #[test]
    fn identity_accessor_uses_id_field() {
        let accessor = IdAccessor::<Person>::identity();
        let mut person = Person::default();

        accessor.set(&mut person, 9);

        assert_eq!(person.id, 9);
        assert_eq!(accessor.get(&person), 9);
        assert_eq!(accessor.field(), "id");
    }

    #[test]
    fn macro_targets_other_fields() {
        let accessor = crate::id_field!(Person, badge);
        let mut person = Person::default();

        accessor.set(&mut person, 4);

        assert_eq!(person.badge, 4);
        assert_eq!(person.id, 0);
        assert_eq!(accessor.field(), "badge");
    }

    #[test]
    fn accessor_is_copy() {
        let a = IdAccessor::<Person>::identity();
        let b = a;
        assert_eq!(a.field(), b.field());
    }
}
