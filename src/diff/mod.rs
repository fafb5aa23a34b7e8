//! Structural diff of an observable graph against its last snapshot.

mod engine;
mod path;
mod sequence;
mod snapshot;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::patch::PatchValue;

pub use engine::diff;
pub use path::{Path, Segment};
pub use sequence::{edit_script, EditScript};
pub use snapshot::Snapshot;

/// Where an element goes in, or comes out of, a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "i")]
    Index(usize),
    #[serde(rename = "k")]
    Key(String),
}

/// One field- or element-level change.
///
/// Operations on one container appear as removals (descending index), at
/// most one reorder, then insertions (ascending index), so every index is
/// valid at the moment its operation is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    /// A scalar field or map entry changed.
    Set { path: Path, value: PatchValue },
    /// An element was added to the list or map at `path`.
    Insert {
        path: Path,
        at: Position,
        value: PatchValue,
    },
    /// An element was removed from the list or map at `path`.
    Remove { path: Path, at: Position },
    /// The value at `path` was swapped wholesale, for a different object
    /// instance or a list that became (or stopped being) empty.
    Replace { path: Path, value: PatchValue },
    /// Survivors of the list at `path` were reordered: element `i` becomes
    /// what was at `permutation[i]`.
    Reorder {
        path: Path,
        permutation: Vec<usize>,
    },
}

impl DiffOp {
    pub fn path(&self) -> &Path {
        match self {
            DiffOp::Set { path, .. }
            | DiffOp::Insert { path, .. }
            | DiffOp::Remove { path, .. }
            | DiffOp::Replace { path, .. }
            | DiffOp::Reorder { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiffOp::Set { .. } => "set",
            DiffOp::Insert { .. } => "insert",
            DiffOp::Remove { .. } => "remove",
            DiffOp::Replace { .. } => "replace",
            DiffOp::Reorder { .. } => "reorder",
        }
    }
}

/// Everything that changed under one root since the previous snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub root: Identity,
    /// Set on a first diff: the receiver must create the root as this type.
    pub root_type: Option<String>,
    pub ops: Vec<DiffOp>,
    /// Identities reachable before but not any more.
    pub disposed: Vec<Identity>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.root_type.is_none() && self.ops.is_empty() && self.disposed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub changes: ChangeSet,
    /// Baseline for the next diff of the same root.
    pub snapshot: Snapshot,
}
