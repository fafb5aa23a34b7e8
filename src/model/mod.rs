//! Observable object model.

mod collections;
mod observable;
mod schema;
mod value;

pub use collections::{ListMut, MapMut};
pub use observable::{
    Event, EventHandler, Listener, ObjectKey, Observable, Subscription, WeakObservable,
};
pub use schema::{FieldDef, FieldKind, Schema, SchemaRegistry};
pub use value::Value;

/// Errors raised synchronously at a mutation site.
#[derive(Debug, thiserror::Error)]
pub enum ObservableError {
    #[error("{type_name} has no field named '{field}'")]
    UnknownField {
        type_name: &'static str,
        field: String,
    },

    #[error("{type_name}.{field} expects {expected}, got {found}")]
    TypeMismatch {
        type_name: &'static str,
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{type_name}.{field} has no variant '{variant}'")]
    InvalidVariant {
        type_name: &'static str,
        field: &'static str,
        variant: String,
    },

    #[error("index {index} out of bounds for {field} (len {len})")]
    IndexOutOfBounds {
        field: &'static str,
        index: usize,
        len: usize,
    },
}
