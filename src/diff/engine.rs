use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::path::Path;
use super::sequence::edit_script;
use super::snapshot::{ObjectSnap, SnapValue, Snapshot};
use super::{ChangeSet, DiffOp, DiffResult, Position};
use crate::identity::{Identity, IdentityIndex};
use crate::model::{ObjectKey, Observable, Value};
use crate::patch::{ObjectPayload, PatchValue};

/// Diffs `current` against `previous`, the snapshot of the last diff of the
/// same root.
///
/// With no usable previous snapshot every root field is emitted and the
/// change set names the root type. Objects reached for the first time are
/// registered in `index` and serialized whole; objects the receiver already
/// holds are referenced by identity.
pub fn diff(previous: Option<&Snapshot>, current: &Observable, index: &IdentityIndex) -> DiffResult {
    let baseline = previous.filter(|p| p.root == current.key());
    let root = index.register(current);
    let mut walker = Walker {
        known: baseline,
        index,
        next: HashMap::new(),
        visited: HashSet::new(),
        pending: VecDeque::new(),
        ops: Vec::new(),
    };

    let root_type = match baseline {
        Some(_) => {
            walker.walk(current, Path::root());
            None
        }
        None => {
            walker.introduce_root(current, root);
            Some(current.type_name().to_string())
        }
    };
    while let Some((obj, path)) = walker.pending.pop_front() {
        walker.walk(&obj, path);
    }

    let Walker { next, ops, .. } = walker;
    let mut disposed: Vec<Identity> = previous
        .map(|p| {
            p.objects
                .iter()
                .filter(|(key, _)| !next.contains_key(key))
                .map(|(_, snap)| snap.identity)
                .collect()
        })
        .unwrap_or_default();
    disposed.sort_unstable();

    tracing::trace!(
        root = %root,
        ops = ops.len(),
        disposed = disposed.len(),
        objects = next.len(),
        "Computed diff"
    );

    DiffResult {
        changes: ChangeSet {
            root,
            root_type,
            ops,
            disposed,
        },
        snapshot: Snapshot {
            root: current.key(),
            objects: next,
        },
    }
}

struct Walker<'a> {
    known: Option<&'a Snapshot>,
    index: &'a IdentityIndex,
    next: HashMap<ObjectKey, ObjectSnap>,
    /// Objects already recorded in `next` during this pass.
    visited: HashSet<ObjectKey>,
    /// Known objects reached only through a reference, walked after the root.
    pending: VecDeque<(Observable, Path)>,
    ops: Vec<DiffOp>,
}

impl<'a> Walker<'a> {
    fn previous(&self, key: ObjectKey) -> Option<&'a ObjectSnap> {
        self.known.and_then(|s| s.objects.get(&key))
    }

    fn introduce_root(&mut self, root: &Observable, identity: Identity) {
        self.visited.insert(root.key());
        let (version, values) = root.read_state();
        self.record(root.key(), identity, version, &values);
        for (def, value) in root.schema().fields.iter().zip(&values) {
            let value = self.serialize(value);
            self.ops.push(DiffOp::Set {
                path: Path::root().field(def.name),
                value,
            });
        }
    }

    fn record(&mut self, key: ObjectKey, identity: Identity, version: u64, values: &[Value]) {
        let fields = values.iter().map(SnapValue::capture).collect();
        self.next.insert(
            key,
            ObjectSnap {
                version,
                identity,
                fields,
            },
        );
    }

    /// Diffs a known object field by field and recurses into the known
    /// objects it holds.
    fn walk(&mut self, obj: &Observable, path: Path) {
        if !self.visited.insert(obj.key()) {
            return;
        }
        let identity = self.index.register(obj);
        let (version, values) = obj.read_state();
        let current: Vec<SnapValue> = values.iter().map(SnapValue::capture).collect();
        let fields = obj.schema().fields;

        match self.previous(obj.key()) {
            Some(prev) if prev.version == version => {
                for (def, value) in fields.iter().zip(&values) {
                    self.walk_nested(value, &path.field(def.name));
                }
            }
            Some(prev) => {
                for (i, (def, value)) in fields.iter().zip(&values).enumerate() {
                    let field_path = path.field(def.name);
                    match prev.fields.get(i) {
                        Some(old) => self.compare(&field_path, old, &current[i], value),
                        None => {
                            let value = self.serialize(value);
                            self.ops.push(DiffOp::Set {
                                path: field_path.clone(),
                                value,
                            });
                        }
                    }
                    self.walk_nested(value, &field_path);
                }
            }
            None => {
                for (def, value) in fields.iter().zip(&values) {
                    let value = self.serialize(value);
                    self.ops.push(DiffOp::Set {
                        path: path.field(def.name),
                        value,
                    });
                }
            }
        }

        self.next.insert(
            obj.key(),
            ObjectSnap {
                version,
                identity,
                fields: current,
            },
        );
    }

    fn compare(&mut self, path: &Path, old: &SnapValue, current: &SnapValue, value: &Value) {
        match (old, current, value) {
            (SnapValue::List(old_items), SnapValue::List(new_items), Value::List(items)) => {
                self.diff_list(path, old_items, new_items, items)
            }
            (SnapValue::Map(old_entries), SnapValue::Map(new_entries), Value::Map(entries)) => {
                self.diff_map(path, old_entries, new_entries, entries)
            }
            _ if old == current => {}
            _ => {
                let op = self.change(path.clone(), old, value);
                self.ops.push(op);
            }
        }
    }

    /// `Replace` when an object instance is swapped in or out, `Set` otherwise.
    fn change(&mut self, path: Path, old: &SnapValue, value: &Value) -> DiffOp {
        let swaps_object = old.object_key().is_some() || matches!(value, Value::Object(_));
        let value = self.serialize(value);
        if swaps_object {
            DiffOp::Replace { path, value }
        } else {
            DiffOp::Set { path, value }
        }
    }

    fn diff_list(&mut self, path: &Path, old: &[SnapValue], current: &[SnapValue], items: &[Value]) {
        if old.is_empty() && items.is_empty() {
            return;
        }
        if old.is_empty() || items.is_empty() {
            let value = self.serialize_list(items);
            self.ops.push(DiffOp::Replace {
                path: path.clone(),
                value,
            });
            return;
        }

        let script = edit_script(old, current);
        for &index in &script.removed {
            self.ops.push(DiffOp::Remove {
                path: path.clone(),
                at: Position::Index(index),
            });
        }
        if let Some(permutation) = script.permutation {
            self.ops.push(DiffOp::Reorder {
                path: path.clone(),
                permutation,
            });
        }
        for &index in &script.inserted {
            let value = self.serialize(&items[index]);
            self.ops.push(DiffOp::Insert {
                path: path.clone(),
                at: Position::Index(index),
                value,
            });
        }
    }

    fn diff_map(
        &mut self,
        path: &Path,
        old: &BTreeMap<String, SnapValue>,
        current: &BTreeMap<String, SnapValue>,
        entries: &BTreeMap<String, Value>,
    ) {
        for key in old.keys().filter(|k| !entries.contains_key(*k)) {
            self.ops.push(DiffOp::Remove {
                path: path.clone(),
                at: Position::Key(key.clone()),
            });
        }
        for (key, value) in entries {
            match (old.get(key), current.get(key)) {
                (None, _) => {
                    let value = self.serialize(value);
                    self.ops.push(DiffOp::Insert {
                        path: path.clone(),
                        at: Position::Key(key.clone()),
                        value,
                    });
                }
                (Some(before), Some(now)) if before == now => {}
                (Some(before), _) => {
                    let op = self.change(path.key(key.as_str()), before, value);
                    self.ops.push(op);
                }
            }
        }
    }

    /// Walks every known, not yet visited object held in `value`.
    fn walk_nested(&mut self, value: &Value, path: &Path) {
        match value {
            Value::Object(obj) => {
                if self.visited.contains(&obj.key()) || self.previous(obj.key()).is_none() {
                    return;
                }
                let identity = self.index.register(obj);
                self.walk(obj, path.node(identity));
            }
            Value::List(items) => {
                for item in items {
                    self.walk_nested(item, path);
                }
            }
            Value::Map(entries) => {
                for (key, item) in entries {
                    self.walk_nested(item, &path.key(key.as_str()));
                }
            }
            _ => {}
        }
    }

    fn serialize_list(&mut self, items: &[Value]) -> PatchValue {
        PatchValue::List(items.iter().map(|v| self.serialize(v)).collect())
    }

    fn serialize(&mut self, value: &Value) -> PatchValue {
        match value {
            Value::Null => PatchValue::Null,
            Value::Bool(v) => PatchValue::Bool(*v),
            Value::Int(v) => PatchValue::Int(*v),
            Value::Float(v) => PatchValue::Float(*v),
            Value::Text(v) => PatchValue::Text(v.clone()),
            Value::Enum(v) => PatchValue::Enum(v.clone()),
            Value::Object(obj) => self.serialize_object(obj),
            Value::List(items) => self.serialize_list(items),
            Value::Map(entries) => PatchValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.serialize(v)))
                    .collect(),
            ),
        }
    }

    fn serialize_object(&mut self, obj: &Observable) -> PatchValue {
        let key = obj.key();
        let identity = self.index.register(obj);
        if self.visited.contains(&key) {
            return PatchValue::Ref(identity);
        }
        if self.previous(key).is_some() {
            // The receiver holds it already; its own changes are diffed later.
            self.pending
                .push_back((obj.clone(), Path::root().node(identity)));
            return PatchValue::Ref(identity);
        }

        self.visited.insert(key);
        let (version, values) = obj.read_state();
        self.record(key, identity, version, &values);
        let fields = obj
            .schema()
            .fields
            .iter()
            .zip(&values)
            .map(|(def, v)| (def.name.to_string(), self.serialize(v)))
            .collect();
        PatchValue::Object(ObjectPayload {
            id: identity,
            type_name: obj.type_name().to_string(),
            fields,
        })
    }
}
