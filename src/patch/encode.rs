use super::document::{NodeOp, PatchDocument, PatchNode};
use super::PatchError;
use crate::diff::{ChangeSet, DiffOp, Path, Segment};

/// Folds the flat operations of `changes` into a node tree.
///
/// Each operation lands on the node of the innermost object its path
/// crosses; nodes keep their operations in change-set order.
pub fn encode(changes: &ChangeSet) -> Result<PatchDocument, PatchError> {
    let mut root = PatchNode::new(changes.root);
    root.type_name = changes.root_type.clone();

    for op in &changes.ops {
        let path = op.path();
        let node = path.nodes().fold(&mut root, |node, id| node.child_mut(id));
        node.ops.push(node_op(path, op)?);
    }

    Ok(PatchDocument {
        root,
        disposed: changes.disposed.clone(),
    })
}

fn node_op(path: &Path, op: &DiffOp) -> Result<NodeOp, PatchError> {
    let invalid = || PatchError::InvalidPath(path.to_string());
    let (field, key) = match path.local() {
        [Segment::Field(field)] => (field.clone(), None),
        [Segment::Field(field), Segment::Key(key)] => (field.clone(), Some(key.clone())),
        _ => return Err(invalid()),
    };

    let op = match (op, key) {
        (DiffOp::Set { value, .. }, key) => NodeOp::Set {
            field,
            key,
            value: value.clone(),
        },
        (DiffOp::Replace { value, .. }, key) => NodeOp::Replace {
            field,
            key,
            value: value.clone(),
        },
        (DiffOp::Insert { at, value, .. }, None) => NodeOp::Insert {
            field,
            at: at.clone(),
            value: value.clone(),
        },
        (DiffOp::Remove { at, .. }, None) => NodeOp::Remove {
            field,
            at: at.clone(),
        },
        (DiffOp::Reorder { permutation, .. }, None) => NodeOp::Reorder {
            field,
            permutation: permutation.clone(),
        },
        _ => return Err(invalid()),
    };
    Ok(op)
}
