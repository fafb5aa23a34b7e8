//! Hierarchical patch documents: encoding from change sets, the wire codec
//! and the receiving-side applier.

mod apply;
mod codec;
mod document;
mod encode;
mod value;

pub use apply::{apply, ApplyOutcome, Mirror};
pub use codec::{deserialize, serialize};
pub use document::{NodeOp, PatchDocument, PatchNode};
pub use encode::encode;
pub use value::{ObjectPayload, PatchValue};

use crate::identity::Identity;
use crate::model::ObservableError;

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch targets unknown identity {0}")]
    DanglingPatchTarget(Identity),

    #[error("path {0} does not address a field")]
    InvalidPath(String),

    #[error("unknown object type '{0}'")]
    UnknownType(String),

    #[error("invalid permutation for {field} (len {len})")]
    InvalidPermutation { field: String, len: usize },

    #[error(transparent)]
    Observable(#[from] ObservableError),

    #[error("failed to encode patch: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode patch: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
