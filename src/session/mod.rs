//! One renderer connection: pushes diffs of the root out, routes events,
//! property edits and method results back in.

mod calls;
mod handle;
mod props;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::patch::PatchError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

pub use handle::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Default bound for [`Session::invoke_method`].
    pub method_timeout: Duration,
    pub resync_on_reconnect: bool,
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            method_timeout: Duration::from_millis(config.method_timeout_ms),
            resync_on_reconnect: config.resync_on_reconnect,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("method '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("renderer error: {0}")]
    Remote(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}
