//! Mutator views over list and map fields.
//!
//! Containers are plain values inside their owner, so every mutation goes
//! through the owner: it bumps the owner's version and notifies the owner's
//! listeners with the container's field name.

use std::collections::BTreeMap;

use super::observable::Observable;
use super::value::Value;
use super::ObservableError;

/// Mutable view over a list field of an [`Observable`].
pub struct ListMut<'a> {
    owner: &'a Observable,
    field: usize,
}

impl<'a> ListMut<'a> {
    pub(crate) fn new(owner: &'a Observable, field: usize) -> Self {
        Self { owner, field }
    }

    fn field_name(&self) -> &'static str {
        self.owner.schema().fields[self.field].name
    }

    fn items(&self) -> Vec<Value> {
        let (_, mut values) = self.owner.read_state();
        match values.swap_remove(self.field) {
            Value::List(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items()
    }

    fn edit<R>(
        &self,
        f: impl FnOnce(&mut Vec<Value>) -> Result<(R, bool), ObservableError>,
    ) -> Result<R, ObservableError> {
        let field = self.field_name();
        let type_name = self.owner.type_name();
        self.owner
            .mutate(self.field, |slot| match slot {
                Value::List(items) => f(items),
                other => Err(ObservableError::TypeMismatch {
                    type_name,
                    field,
                    expected: "list",
                    found: other.kind_name(),
                }),
            })
            .map(|(result, _)| result)
    }

    fn out_of_bounds(&self, index: usize, len: usize) -> ObservableError {
        ObservableError::IndexOutOfBounds {
            field: self.field_name(),
            index,
            len,
        }
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), ObservableError> {
        let value = value.into();
        self.edit(|items| {
            items.push(value);
            Ok(((), true))
        })
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), ObservableError> {
        let value = value.into();
        self.edit(|items| {
            if index > items.len() {
                return Err(self.out_of_bounds(index, items.len()));
            }
            items.insert(index, value);
            Ok(((), true))
        })
    }

    pub fn remove(&self, index: usize) -> Result<Value, ObservableError> {
        self.edit(|items| {
            if index >= items.len() {
                return Err(self.out_of_bounds(index, items.len()));
            }
            Ok((items.remove(index), true))
        })
    }

    /// Replaces the element at `index`, returning the previous one.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<Value, ObservableError> {
        let value = value.into();
        self.edit(|items| {
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or_else(|| self.out_of_bounds(index, len))?;
            Ok((std::mem::replace(slot, value), true))
        })
    }

    /// Moves the element at `from` so that it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> Result<(), ObservableError> {
        self.edit(|items| {
            let len = items.len();
            if from >= len {
                return Err(self.out_of_bounds(from, len));
            }
            if to >= len {
                return Err(self.out_of_bounds(to, len));
            }
            if from == to {
                return Ok(((), false));
            }
            let item = items.remove(from);
            items.insert(to, item);
            Ok(((), true))
        })
    }

    pub fn clear(&self) -> Result<(), ObservableError> {
        self.edit(|items| {
            let changed = !items.is_empty();
            items.clear();
            Ok(((), changed))
        })
    }
}

/// Mutable view over a map field of an [`Observable`].
pub struct MapMut<'a> {
    owner: &'a Observable,
    field: usize,
}

impl<'a> MapMut<'a> {
    pub(crate) fn new(owner: &'a Observable, field: usize) -> Self {
        Self { owner, field }
    }

    fn entries(&self) -> BTreeMap<String, Value> {
        let (_, mut values) = self.owner.read_state();
        match values.swap_remove(self.field) {
            Value::Map(entries) => entries,
            _ => BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn edit<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> (R, bool),
    ) -> Result<R, ObservableError> {
        let field = self.owner.schema().fields[self.field].name;
        let type_name = self.owner.type_name();
        self.owner
            .mutate(self.field, |slot| match slot {
                Value::Map(entries) => Ok(f(entries)),
                other => Err(ObservableError::TypeMismatch {
                    type_name,
                    field,
                    expected: "map",
                    found: other.kind_name(),
                }),
            })
            .map(|(result, _)| result)
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, ObservableError> {
        let key = key.into();
        let value = value.into();
        self.edit(|entries| (entries.insert(key, value), true))
    }

    /// Removes `key`. Removing an absent key is not a mutation.
    pub fn remove(&self, key: &str) -> Result<Option<Value>, ObservableError> {
        self.edit(|entries| {
            let removed = entries.remove(key);
            let changed = removed.is_some();
            (removed, changed)
        })
    }

    pub fn clear(&self) -> Result<(), ObservableError> {
        self.edit(|entries| {
            let changed = !entries.is_empty();
            entries.clear();
            ((), changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::model::{FieldDef, FieldKind, Schema};

    static BOX: Schema = Schema::new(
        "Box",
        &[
            FieldDef::new("items", FieldKind::List),
            FieldDef::new("attrs", FieldKind::Map),
            FieldDef::new("title", FieldKind::Text),
        ],
    );

    fn counted() -> (Observable, Arc<AtomicUsize>) {
        let obj = Observable::new(&BOX);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        obj.subscribe(move |_, field| {
            assert!(field == "items" || field == "attrs");
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (obj, count)
    }

    #[test]
    fn test_list_mutations_notify_owner() {
        let (obj, count) = counted();
        let list = obj.list("items").unwrap();
        list.push(1).unwrap();
        list.push(2).unwrap();
        list.insert(0, 0).unwrap();
        list.move_item(0, 2).unwrap();
        assert_eq!(list.to_vec(), vec![Value::Int(1), Value::Int(2), Value::Int(0)]);
        assert_eq!(list.set(1, 5).unwrap(), Value::Int(2));
        assert_eq!(list.remove(0).unwrap(), Value::Int(1));
        assert_eq!(count.load(Ordering::SeqCst), 6);
        assert_eq!(obj.version(), 6);
    }

    #[test]
    fn test_list_out_of_bounds_is_not_a_mutation() {
        let (obj, count) = counted();
        let list = obj.list("items").unwrap();
        assert!(matches!(
            list.remove(0),
            Err(ObservableError::IndexOutOfBounds { index: 0, len: 0, .. })
        ));
        list.clear().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(obj.version(), 0);
    }

    #[test]
    fn test_map_mutations() {
        let (obj, count) = counted();
        let map = obj.map("attrs").unwrap();
        assert_eq!(map.insert("a", 1).unwrap(), None);
        assert_eq!(map.insert("a", 2).unwrap(), Some(Value::Int(1)));
        assert_eq!(map.remove("missing").unwrap(), None);
        assert_eq!(map.remove("a").unwrap(), Some(Value::Int(2)));
        assert!(map.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_container_kind_is_checked() {
        let obj = Observable::new(&BOX);
        assert!(obj.list("attrs").is_err());
        assert!(obj.map("title").is_err());
        assert!(obj.list("items").is_ok());
    }
}
