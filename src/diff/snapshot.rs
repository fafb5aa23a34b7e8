use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use crate::identity::Identity;
use crate::model::{ObjectKey, Value};

/// Field value as last sent. Nested objects are recorded by key only, so a
/// snapshot never keeps an instance alive.
#[derive(Debug, Clone)]
pub(crate) enum SnapValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Enum(String),
    Object(ObjectKey),
    List(Vec<SnapValue>),
    Map(BTreeMap<String, SnapValue>),
}

impl SnapValue {
    pub(crate) fn capture(value: &Value) -> Self {
        match value {
            Value::Null => SnapValue::Null,
            Value::Bool(v) => SnapValue::Bool(*v),
            Value::Int(v) => SnapValue::Int(*v),
            Value::Float(v) => SnapValue::Float(*v),
            Value::Text(v) => SnapValue::Text(v.clone()),
            Value::Enum(v) => SnapValue::Enum(v.clone()),
            Value::Object(obj) => SnapValue::Object(obj.key()),
            Value::List(items) => SnapValue::List(items.iter().map(Self::capture).collect()),
            Value::Map(entries) => SnapValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::capture(v)))
                    .collect(),
            ),
        }
    }

    pub(crate) fn object_key(&self) -> Option<ObjectKey> {
        match self {
            SnapValue::Object(key) => Some(*key),
            _ => None,
        }
    }
}

impl PartialEq for SnapValue {
    /// Objects match by key, floats bit for bit.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SnapValue::Null, SnapValue::Null) => true,
            (SnapValue::Bool(a), SnapValue::Bool(b)) => a == b,
            (SnapValue::Int(a), SnapValue::Int(b)) => a == b,
            (SnapValue::Float(a), SnapValue::Float(b)) => a.to_bits() == b.to_bits(),
            (SnapValue::Text(a), SnapValue::Text(b)) | (SnapValue::Enum(a), SnapValue::Enum(b)) => {
                a == b
            }
            (SnapValue::Object(a), SnapValue::Object(b)) => a == b,
            (SnapValue::List(a), SnapValue::List(b)) => a == b,
            (SnapValue::Map(a), SnapValue::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SnapValue {}

impl Hash for SnapValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            SnapValue::Null => {}
            SnapValue::Bool(v) => v.hash(state),
            SnapValue::Int(v) => v.hash(state),
            SnapValue::Float(v) => v.to_bits().hash(state),
            SnapValue::Text(v) | SnapValue::Enum(v) => v.hash(state),
            SnapValue::Object(key) => key.hash(state),
            SnapValue::List(items) => items.hash(state),
            SnapValue::Map(entries) => entries.hash(state),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ObjectSnap {
    pub(crate) version: u64,
    pub(crate) identity: Identity,
    pub(crate) fields: Vec<SnapValue>,
}

/// State of every object reachable from one root as of the last diff.
///
/// Owned by the session that produced it; never shared.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) root: ObjectKey,
    pub(crate) objects: HashMap<ObjectKey, ObjectSnap>,
}

impl Snapshot {
    pub fn root(&self) -> ObjectKey {
        self.root
    }

    /// Number of objects recorded.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.objects.contains_key(&key)
    }

    pub fn version_of(&self, key: ObjectKey) -> Option<u64> {
        self.objects.get(&key).map(|o| o.version)
    }

    pub fn identity_of(&self, key: ObjectKey) -> Option<Identity> {
        self.objects.get(&key).map(|o| o.identity)
    }

    /// Records a field value the peer already holds so the next diff does
    /// not send it back. `before` and `after` are the object's versions
    /// around the write; the recorded version only moves when nothing else
    /// changed in between.
    pub(crate) fn absorb(
        &mut self,
        key: ObjectKey,
        field: usize,
        value: &Value,
        before: u64,
        after: u64,
    ) -> bool {
        let Some(object) = self.objects.get_mut(&key) else {
            return false;
        };
        let Some(slot) = object.fields.get_mut(field) else {
            return false;
        };
        *slot = SnapValue::capture(value);
        if object.version == before && after == before + 1 {
            object.version = after;
        }
        true
    }
}
