//! Compile-time field tables for observable types.
//!
//! Every observable type declares its fields once, as a `static` [`Schema`].
//! The diff engine and the patch applier walk these tables instead of
//! inspecting instances at runtime.

use std::collections::HashMap;

use super::value::Value;

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    /// One of a fixed set of variant names. The first variant is the default.
    Enum(&'static [&'static str]),
    /// A nested observable (or null).
    Object,
    /// An ordered sequence of values, usually observables.
    List,
    /// A string-keyed mapping of values.
    Map,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
            FieldKind::Enum(_) => "enum",
            FieldKind::Object => "object",
            FieldKind::List => "list",
            FieldKind::Map => "map",
        }
    }

    /// Value a freshly constructed instance holds for this kind.
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Enum(variants) => variants
                .first()
                .map(|v| Value::Enum((*v).to_string()))
                .unwrap_or(Value::Null),
            FieldKind::List => Value::List(Vec::new()),
            FieldKind::Map => Value::Map(Default::default()),
            _ => Value::Null,
        }
    }

    /// Whether `value` may be stored in a field of this kind.
    ///
    /// Scalar and object fields are nullable; containers are not.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::List, Value::List(_)) | (FieldKind::Map, Value::Map(_)) => true,
            (FieldKind::List | FieldKind::Map, _) => false,
            (_, Value::Null) => true,
            (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Int, Value::Int(_))
            | (FieldKind::Float, Value::Float(_))
            | (FieldKind::Text, Value::Text(_))
            | (FieldKind::Object, Value::Object(_)) => true,
            (FieldKind::Enum(variants), Value::Enum(v)) => variants.contains(&v.as_str()),
            _ => false,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Field table for one observable type.
///
/// ```
/// use uisync::model::{FieldDef, FieldKind, Schema};
///
/// static POINT: Schema = Schema::new(
///     "Point",
///     &[FieldDef::new("x", FieldKind::Int), FieldDef::new("y", FieldKind::Int)],
/// );
/// assert_eq!(POINT.field_index("y"), Some(1));
/// ```
#[derive(Debug)]
pub struct Schema {
    pub type_name: &'static str,
    pub fields: &'static [FieldDef],
}

impl Schema {
    pub const fn new(type_name: &'static str, fields: &'static [FieldDef]) -> Self {
        Self { type_name, fields }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Lookup of schemas by type name, used when a patch names a type the
/// receiver has to instantiate.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    by_name: HashMap<&'static str, &'static Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: &'static Schema) -> Self {
        self.register(schema);
        self
    }

    /// Registers `schema`. A later registration under the same type name wins.
    pub fn register(&mut self, schema: &'static Schema) {
        if self.by_name.insert(schema.type_name, schema).is_some() {
            tracing::debug!(type_name = schema.type_name, "Schema re-registered");
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&'static Schema> {
        self.by_name.get(type_name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
