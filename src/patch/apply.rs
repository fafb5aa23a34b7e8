use std::collections::{HashMap, HashSet};

use super::codec::deserialize;
use super::document::{NodeOp, PatchDocument, PatchNode};
use super::value::{ObjectPayload, PatchValue};
use super::PatchError;
use crate::diff::Position;
use crate::identity::{Identity, IdentityIndex};
use crate::model::{Observable, SchemaRegistry, Value};

/// Result of applying one document.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Operations applied.
    pub applied: usize,
    /// Operations skipped, because their target was unknown or they failed.
    pub skipped: usize,
    /// The root, when the document created (or re-created) it.
    pub root: Option<Observable>,
}

/// Applies `doc` to the objects reachable through `index`.
///
/// Nodes whose identity cannot be resolved are logged and skipped together
/// with their subtree; the rest of the document still applies. Objects the
/// document introduces are installed in `index` only after they are fully
/// populated.
pub fn apply(doc: &PatchDocument, index: &IdentityIndex, registry: &SchemaRegistry) -> ApplyOutcome {
    let mut applier = Applier {
        index,
        registry,
        objects: HashMap::new(),
        created: Vec::new(),
        outcome: ApplyOutcome::default(),
    };

    let payloads = collect_payloads(&doc.root);
    applier.materialize(&payloads);
    applier.outcome.root = applier.prepare_root(&doc.root);
    applier.pin_references(&doc.root);
    applier.populate(&payloads);
    applier.apply_node(&doc.root);

    let Applier {
        created, outcome, ..
    } = applier;
    for (identity, object) in &created {
        index.adopt(*identity, object);
    }
    for identity in &doc.disposed {
        index.forget(*identity);
    }
    tracing::debug!(
        applied = outcome.applied,
        skipped = outcome.skipped,
        created = created.len(),
        disposed = doc.disposed.len(),
        "Applied patch"
    );
    outcome
}

fn collect_payloads(root: &PatchNode) -> Vec<&ObjectPayload> {
    let mut payloads = Vec::new();
    root.walk(&mut |node| {
        for value in node.ops.iter().filter_map(NodeOp::value) {
            value.for_each_payload(&mut |payload| payloads.push(payload));
        }
    });
    payloads
}

struct Applier<'a> {
    index: &'a IdentityIndex,
    registry: &'a SchemaRegistry,
    /// Every object the document touches, held strongly until it is applied.
    objects: HashMap<Identity, Observable>,
    created: Vec<(Identity, Observable)>,
    outcome: ApplyOutcome,
}

impl Applier<'_> {
    /// Existing object at `id` if it has the expected type.
    fn existing(&self, id: Identity, type_name: &str) -> Option<Observable> {
        self.objects
            .get(&id)
            .cloned()
            .or_else(|| self.index.resolve(id))
            .filter(|obj| obj.type_name() == type_name)
    }

    fn create(&mut self, id: Identity, type_name: &str) -> Result<Observable, PatchError> {
        let schema = self
            .registry
            .get(type_name)
            .ok_or_else(|| PatchError::UnknownType(type_name.to_string()))?;
        let obj = Observable::new(schema);
        self.created.push((id, obj.clone()));
        Ok(obj)
    }

    /// Creates (or finds, for a refresh) an instance for every payload so
    /// references to payloads later in the document resolve.
    fn materialize(&mut self, payloads: &[&ObjectPayload]) {
        for payload in payloads {
            if self.objects.contains_key(&payload.id) {
                continue;
            }
            let obj = match self.existing(payload.id, &payload.type_name) {
                Some(obj) => obj,
                None => match self.create(payload.id, &payload.type_name) {
                    Ok(obj) => obj,
                    Err(e) => {
                        tracing::warn!(identity = %payload.id, error = %e, "Cannot create object");
                        continue;
                    }
                },
            };
            self.objects.insert(payload.id, obj);
        }
    }

    fn prepare_root(&mut self, root: &PatchNode) -> Option<Observable> {
        let type_name = root.type_name.as_deref()?;
        let obj = match self.existing(root.id, type_name) {
            Some(obj) => obj,
            None => match self.create(root.id, type_name) {
                Ok(obj) => obj,
                Err(e) => {
                    tracing::warn!(identity = %root.id, error = %e, "Cannot create root");
                    return None;
                }
            },
        };
        self.objects.insert(root.id, obj.clone());
        Some(obj)
    }

    /// Holds every referenced object for the duration of the apply, so an
    /// object detached by an early operation is still there for a later one.
    fn pin_references(&mut self, root: &PatchNode) {
        let mut wanted = Vec::new();
        root.walk(&mut |node| {
            wanted.push(node.id);
            for value in node.ops.iter().filter_map(NodeOp::value) {
                value.for_each_ref(&mut |id| wanted.push(id));
            }
        });
        for id in wanted {
            if self.objects.contains_key(&id) {
                continue;
            }
            if let Some(obj) = self.index.resolve(id) {
                self.objects.insert(id, obj);
            }
        }
    }

    fn populate(&mut self, payloads: &[&ObjectPayload]) {
        let mut filled = HashSet::new();
        for payload in payloads {
            if !filled.insert(payload.id) {
                continue;
            }
            let Some(obj) = self.objects.get(&payload.id).cloned() else {
                continue;
            };
            for (field, value) in &payload.fields {
                let result = self
                    .to_value(value)
                    .and_then(|v| obj.set_field(field, v).map_err(PatchError::from));
                if let Err(e) = result {
                    tracing::warn!(
                        identity = %payload.id,
                        field = %field,
                        error = %e,
                        "Cannot populate field"
                    );
                }
            }
        }
    }

    fn apply_node(&mut self, node: &PatchNode) {
        let target = self
            .objects
            .get(&node.id)
            .cloned()
            .or_else(|| self.index.resolve(node.id));
        let Some(target) = target else {
            let skipped = node.op_count();
            tracing::warn!(
                identity = %node.id,
                skipped,
                "{}",
                PatchError::DanglingPatchTarget(node.id)
            );
            self.outcome.skipped += skipped;
            return;
        };

        for op in &node.ops {
            match self.apply_op(&target, op) {
                Ok(()) => self.outcome.applied += 1,
                Err(e) => {
                    tracing::warn!(
                        identity = %node.id,
                        field = op.field(),
                        error = %e,
                        "Skipping patch operation"
                    );
                    self.outcome.skipped += 1;
                }
            }
        }
        for child in &node.children {
            self.apply_node(child);
        }
    }

    fn apply_op(&self, target: &Observable, op: &NodeOp) -> Result<(), PatchError> {
        match op {
            NodeOp::Set {
                field,
                key: None,
                value,
            }
            | NodeOp::Replace {
                field,
                key: None,
                value,
            } => {
                target.set_field(field, self.to_value(value)?)?;
            }
            NodeOp::Set {
                field,
                key: Some(key),
                value,
            }
            | NodeOp::Replace {
                field,
                key: Some(key),
                value,
            }
            | NodeOp::Insert {
                field,
                at: Position::Key(key),
                value,
            } => {
                target.map(field)?.insert(key.clone(), self.to_value(value)?)?;
            }
            NodeOp::Insert {
                field,
                at: Position::Index(index),
                value,
            } => {
                target.list(field)?.insert(*index, self.to_value(value)?)?;
            }
            NodeOp::Remove {
                field,
                at: Position::Index(index),
            } => {
                target.list(field)?.remove(*index)?;
            }
            NodeOp::Remove {
                field,
                at: Position::Key(key),
            } => {
                target.map(field)?.remove(key)?;
            }
            NodeOp::Reorder { field, permutation } => reorder(target, field, permutation)?,
        }
        Ok(())
    }

    fn to_value(&self, value: &PatchValue) -> Result<Value, PatchError> {
        Ok(match value {
            PatchValue::Null => Value::Null,
            PatchValue::Bool(v) => Value::Bool(*v),
            PatchValue::Int(v) => Value::Int(*v),
            PatchValue::Float(v) => Value::Float(*v),
            PatchValue::Text(v) => Value::Text(v.clone()),
            PatchValue::Enum(v) => Value::Enum(v.clone()),
            PatchValue::Object(payload) => self
                .objects
                .get(&payload.id)
                .cloned()
                .map(Value::Object)
                .ok_or_else(|| PatchError::UnknownType(payload.type_name.clone()))?,
            PatchValue::Ref(id) => self
                .objects
                .get(id)
                .cloned()
                .map(Value::Object)
                .ok_or(PatchError::DanglingPatchTarget(*id))?,
            PatchValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.to_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            PatchValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.to_value(v)?)))
                    .collect::<Result<_, PatchError>>()?,
            ),
        })
    }
}

fn reorder(target: &Observable, field: &str, permutation: &[usize]) -> Result<(), PatchError> {
    let items = target.list(field)?.to_vec();
    let mut seen = vec![false; items.len()];
    let valid = permutation.len() == items.len()
        && permutation
            .iter()
            .all(|&i| i < seen.len() && !std::mem::replace(&mut seen[i], true));
    if !valid {
        return Err(PatchError::InvalidPermutation {
            field: field.to_string(),
            len: items.len(),
        });
    }
    let reordered = permutation.iter().map(|&i| items[i].clone()).collect();
    target.set_field(field, Value::List(reordered))?;
    Ok(())
}

/// Receiving end of a patch stream: the objects a renderer (or a test)
/// rebuilds from documents, and the strong root that keeps them alive.
pub struct Mirror {
    index: IdentityIndex,
    registry: SchemaRegistry,
    root: Option<Observable>,
}

impl Mirror {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            index: IdentityIndex::new(),
            registry,
            root: None,
        }
    }

    pub fn apply(&mut self, doc: &PatchDocument) -> ApplyOutcome {
        let outcome = apply(doc, &self.index, &self.registry);
        if let Some(root) = &outcome.root {
            self.root = Some(root.clone());
        }
        outcome
    }

    pub fn apply_bytes(&mut self, bytes: &[u8]) -> Result<ApplyOutcome, PatchError> {
        let doc = deserialize(bytes)?;
        Ok(self.apply(&doc))
    }

    pub fn root(&self) -> Option<&Observable> {
        self.root.as_ref()
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub fn resolve(&self, identity: Identity) -> Option<Observable> {
        self.index.resolve(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDef, FieldKind, Schema};

    static ITEM: Schema = Schema::new(
        "Item",
        &[
            FieldDef::new("label", FieldKind::Text),
            FieldDef::new("tags", FieldKind::List),
        ],
    );

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(&ITEM)
    }

    fn set(field: &str, value: PatchValue) -> NodeOp {
        NodeOp::Set {
            field: field.into(),
            key: None,
            value,
        }
    }

    #[test]
    fn test_dangling_target_is_skipped() {
        let index = IdentityIndex::new();
        let known = Observable::new(&ITEM);
        let known_id = Identity::new(3, 0);
        index.adopt(known_id, &known);

        let mut root = PatchNode::new(known_id);
        root.ops.push(set("label", PatchValue::Text("kept".into())));
        let mut ghost = PatchNode::new(Identity::new(42, 7));
        ghost.ops.push(set("label", PatchValue::Text("lost".into())));
        ghost.ops.push(set("label", PatchValue::Text("lost again".into())));
        root.children.push(ghost);

        let outcome = apply(
            &PatchDocument {
                root,
                disposed: vec![],
            },
            &index,
            &registry(),
        );
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(known.get("label").unwrap(), Value::Text("kept".into()));
    }

    #[test]
    fn test_root_creation_and_forward_reference() {
        let mut mirror = Mirror::new(registry());
        let root_id = Identity::new(0, 0);
        let child_id = Identity::new(1, 0);
        let mut root = PatchNode::new(root_id);
        root.type_name = Some("Item".into());
        root.ops.push(set(
            "tags",
            PatchValue::List(vec![
                PatchValue::Ref(child_id),
                PatchValue::Object(ObjectPayload {
                    id: child_id,
                    type_name: "Item".into(),
                    fields: vec![("label".into(), PatchValue::Text("child".into()))],
                }),
            ]),
        ));

        let outcome = mirror.apply(&PatchDocument {
            root,
            disposed: vec![],
        });
        assert_eq!(outcome.applied, 1);
        let root = mirror.root().unwrap();
        let tags = root.list("tags").unwrap().to_vec();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], tags[1]);
        let child = mirror.resolve(child_id).unwrap();
        assert_eq!(child.get("label").unwrap(), Value::Text("child".into()));
        assert!(mirror.resolve(root_id).unwrap().ptr_eq(root));
    }

    #[test]
    fn test_invalid_permutation_is_rejected() {
        let index = IdentityIndex::new();
        let item = Observable::new(&ITEM);
        item.list("tags").unwrap().push(1).unwrap();
        item.list("tags").unwrap().push(2).unwrap();
        let id = Identity::new(0, 0);
        index.adopt(id, &item);

        let mut root = PatchNode::new(id);
        root.ops.push(NodeOp::Reorder {
            field: "tags".into(),
            permutation: vec![1, 1],
        });
        root.ops.push(NodeOp::Reorder {
            field: "tags".into(),
            permutation: vec![1, 0],
        });
        let outcome = apply(
            &PatchDocument {
                root,
                disposed: vec![],
            },
            &index,
            &registry(),
        );
        assert_eq!((outcome.applied, outcome.skipped), (1, 1));
        assert_eq!(
            item.list("tags").unwrap().to_vec(),
            vec![Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn test_unknown_type_leaves_field_untouched() {
        let index = IdentityIndex::new();
        let item = Observable::new(&ITEM);
        let id = Identity::new(0, 0);
        index.adopt(id, &item);
        let mut root = PatchNode::new(id);
        root.ops.push(NodeOp::Insert {
            field: "tags".into(),
            at: Position::Index(0),
            value: PatchValue::Object(ObjectPayload {
                id: Identity::new(1, 0),
                type_name: "Nope".into(),
                fields: vec![],
            }),
        });
        let outcome = apply(
            &PatchDocument {
                root,
                disposed: vec![],
            },
            &index,
            &registry(),
        );
        assert_eq!(outcome.skipped, 1);
        assert!(item.list("tags").unwrap().is_empty());
    }

    #[test]
    fn test_disposed_identities_are_forgotten() {
        let index = IdentityIndex::new();
        let item = Observable::new(&ITEM);
        let id = Identity::new(5, 1);
        index.adopt(id, &item);
        let doc = PatchDocument {
            root: PatchNode::new(Identity::new(0, 0)),
            disposed: vec![id],
        };
        apply(&doc, &index, &registry());
        assert!(index.resolve(id).is_none());
    }
}
