//! Declarative mapping macros.
//!
//! These expand to plain trait impls at compile time; there is no runtime
//! field enumeration.

/// Implement [`Record`](crate::models::Record) and
/// [`Entity`](crate::models::Entity) for a struct from a `field => "column"`
/// table.
///
/// Each listed field must be `Clone` and convertible into
/// [`SqlValue`](crate::models::SqlValue).
///
/// # Example
///
/// ```
/// use pgmap::entity;
/// use pgmap::mapping::ColumnMap;
///
/// #[derive(Clone, serde::Deserialize)]
/// struct User {
///     id: i64,
///     name: String,
///     email: Option<String>,
/// }
///
/// entity!(User {
///     id => "id",
///     name => "user_name",
///     email => "email",
/// });
///
/// let map = ColumnMap::of::<User>().unwrap();
/// assert_eq!(map.columns(), "id, user_name, email");
/// ```
#[macro_export]
macro_rules! entity {
    ($ty:ty { $($field:ident => $column:expr),* $(,)? }) => {
        impl $crate::models::Record for $ty {
            fn field(&self, name: &str) -> Option<$crate::models::SqlValue> {
                match name {
                    $(
                        stringify!($field) => {
                            Some($crate::models::SqlValue::from(self.$field.clone()))
                        }
                    )*
                    _ => None,
                }
            }
        }

        impl $crate::models::Entity for $ty {
            const COLUMNS: &'static [(&'static str, &'static str)] =
                &[$((stringify!($field), $column)),*];
        }
    };
}

pub use entity;
