use serde::{Deserialize, Serialize};

use super::value::PatchValue;
use crate::diff::Position;
use crate::identity::Identity;

/// Operation on one field of the node's object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeOp {
    #[serde(rename = "s")]
    Set {
        #[serde(rename = "f")]
        field: String,
        #[serde(rename = "k")]
        key: Option<String>,
        #[serde(rename = "v")]
        value: PatchValue,
    },
    #[serde(rename = "x")]
    Replace {
        #[serde(rename = "f")]
        field: String,
        #[serde(rename = "k")]
        key: Option<String>,
        #[serde(rename = "v")]
        value: PatchValue,
    },
    #[serde(rename = "a")]
    Insert {
        #[serde(rename = "f")]
        field: String,
        #[serde(rename = "at")]
        at: Position,
        #[serde(rename = "v")]
        value: PatchValue,
    },
    #[serde(rename = "d")]
    Remove {
        #[serde(rename = "f")]
        field: String,
        #[serde(rename = "at")]
        at: Position,
    },
    #[serde(rename = "o")]
    Reorder {
        #[serde(rename = "f")]
        field: String,
        #[serde(rename = "p")]
        permutation: Vec<usize>,
    },
}

impl NodeOp {
    pub fn field(&self) -> &str {
        match self {
            NodeOp::Set { field, .. }
            | NodeOp::Replace { field, .. }
            | NodeOp::Insert { field, .. }
            | NodeOp::Remove { field, .. }
            | NodeOp::Reorder { field, .. } => field,
        }
    }

    /// Value carried by the operation, if any.
    pub fn value(&self) -> Option<&PatchValue> {
        match self {
            NodeOp::Set { value, .. } | NodeOp::Replace { value, .. } | NodeOp::Insert { value, .. } => {
                Some(value)
            }
            NodeOp::Remove { .. } | NodeOp::Reorder { .. } => None,
        }
    }
}

/// Changes to one object, followed by the changes to nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchNode {
    #[serde(rename = "i")]
    pub id: Identity,
    /// Present when the receiver has to create this object.
    #[serde(rename = "t")]
    pub type_name: Option<String>,
    #[serde(rename = "o")]
    pub ops: Vec<NodeOp>,
    #[serde(rename = "c")]
    pub children: Vec<PatchNode>,
}

impl PatchNode {
    pub fn new(id: Identity) -> Self {
        Self {
            id,
            type_name: None,
            ops: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the child for `id`, appending it if absent.
    pub(crate) fn child_mut(&mut self, id: Identity) -> &mut PatchNode {
        let pos = match self.children.iter().position(|c| c.id == id) {
            Some(pos) => pos,
            None => {
                self.children.push(PatchNode::new(id));
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }

    /// Operations in this node and all descendants.
    pub fn op_count(&self) -> usize {
        self.ops.len() + self.children.iter().map(PatchNode::op_count).sum::<usize>()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(PatchNode::node_count).sum::<usize>()
    }

    /// Depth-first, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a PatchNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// A hierarchical, identity-addressed patch for one root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDocument {
    #[serde(rename = "r")]
    pub root: PatchNode,
    /// Identities the sender no longer reaches from the root.
    #[serde(rename = "d")]
    pub disposed: Vec<Identity>,
}

impl PatchDocument {
    pub fn is_empty(&self) -> bool {
        self.root.type_name.is_none() && self.root.op_count() == 0 && self.disposed.is_empty()
    }

    pub fn op_count(&self) -> usize {
        self.root.op_count()
    }
}
