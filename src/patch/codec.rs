//! MessagePack encoding of patch documents.
//!
//! Structs are written as maps keyed by their short field names and enum
//! variants by their one-letter codes, so a document decodes without any
//! out-of-band schema.

use super::document::PatchDocument;
use super::PatchError;

pub fn serialize(doc: &PatchDocument) -> Result<Vec<u8>, PatchError> {
    Ok(rmp_serde::to_vec_named(doc)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<PatchDocument, PatchError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
