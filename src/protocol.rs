//! Messages exchanged with the renderer, encoded as MessagePack.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::patch::PatchDocument;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First message on every (re)connection.
    #[serde(rename = "register")]
    Register { session_id: SessionId },

    #[serde(rename = "patch")]
    Patch(PatchDocument),

    /// Renderer to process: an event raised on a control.
    #[serde(rename = "event")]
    Event {
        target: Identity,
        name: String,
        payload: serde_json::Value,
    },

    /// Renderer to process: property values edited on the renderer side,
    /// such as the text of an input field.
    #[serde(rename = "props")]
    UpdateProps {
        target: Identity,
        props: BTreeMap<String, serde_json::Value>,
    },

    #[serde(rename = "call")]
    MethodCall {
        seq: u64,
        target: Identity,
        name: String,
        args: serde_json::Value,
    },

    #[serde(rename = "result")]
    MethodResult {
        seq: u64,
        result: serde_json::Value,
        error: Option<String>,
    },

    /// Process to renderer: an event handler failed.
    #[serde(rename = "crashed")]
    SessionCrashed { message: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::Patch(_) => "patch",
            Message::Event { .. } => "event",
            Message::UpdateProps { .. } => "props",
            Message::MethodCall { .. } => "call",
            Message::MethodResult { .. } => "result",
            Message::SessionCrashed { .. } => "crashed",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
