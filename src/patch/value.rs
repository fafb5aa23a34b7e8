use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// A value as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatchValue {
    #[serde(rename = "n")]
    Null,
    #[serde(rename = "b")]
    Bool(bool),
    #[serde(rename = "i")]
    Int(i64),
    #[serde(rename = "f")]
    Float(f64),
    #[serde(rename = "s")]
    Text(String),
    #[serde(rename = "e")]
    Enum(String),
    /// An object the receiver does not hold yet, serialized whole.
    #[serde(rename = "o")]
    Object(ObjectPayload),
    /// An object the receiver already holds, or one serialized elsewhere in
    /// the same document.
    #[serde(rename = "r")]
    Ref(Identity),
    #[serde(rename = "l")]
    List(Vec<PatchValue>),
    #[serde(rename = "m")]
    Map(BTreeMap<String, PatchValue>),
}

impl PatchValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PatchValue::Null => "null",
            PatchValue::Bool(_) => "bool",
            PatchValue::Int(_) => "int",
            PatchValue::Float(_) => "float",
            PatchValue::Text(_) => "text",
            PatchValue::Enum(_) => "enum",
            PatchValue::Object(_) => "object",
            PatchValue::Ref(_) => "ref",
            PatchValue::List(_) => "list",
            PatchValue::Map(_) => "map",
        }
    }

    /// Visits every object payload nested in this value, depth first.
    pub fn for_each_payload<'a>(&'a self, f: &mut impl FnMut(&'a ObjectPayload)) {
        match self {
            PatchValue::Object(payload) => {
                f(payload);
                for (_, value) in &payload.fields {
                    value.for_each_payload(f);
                }
            }
            PatchValue::List(items) => items.iter().for_each(|v| v.for_each_payload(f)),
            PatchValue::Map(entries) => entries.values().for_each(|v| v.for_each_payload(f)),
            _ => {}
        }
    }

    /// Visits every identity this value refers to through [`PatchValue::Ref`].
    pub fn for_each_ref(&self, f: &mut impl FnMut(Identity)) {
        match self {
            PatchValue::Ref(id) => f(*id),
            PatchValue::Object(payload) => {
                for (_, value) in &payload.fields {
                    value.for_each_ref(f);
                }
            }
            PatchValue::List(items) => items.iter().for_each(|v| v.for_each_ref(f)),
            PatchValue::Map(entries) => entries.values().for_each(|v| v.for_each_ref(f)),
            _ => {}
        }
    }
}

/// Full state of a newly introduced object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPayload {
    #[serde(rename = "i")]
    pub id: Identity,
    #[serde(rename = "t")]
    pub type_name: String,
    #[serde(rename = "f")]
    pub fields: Vec<(String, PatchValue)>,
}
