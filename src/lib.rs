//! State synchronisation between an in-process object graph and a remote
//! UI renderer.
//!
//! Application code mutates [`model::Observable`] objects and calls
//! [`session::Session::update`]; the session diffs the graph against what
//! the renderer last saw, encodes the change set as a patch document and
//! sends it over a [`transport::ReconnectingTransport`]. Events coming back
//! are routed to handlers on the target objects through the identity index.

pub mod config;
pub mod diff;
pub mod identity;
pub mod logging;
pub mod model;
pub mod patch;
pub mod protocol;
pub mod pubsub;
pub mod session;
pub mod transport;

pub use config::Config;
pub use identity::{Identity, IdentityIndex};
pub use model::{FieldDef, FieldKind, Observable, ObservableError, Schema, SchemaRegistry, Value};
pub use session::{Session, SessionError, SessionId, SessionOptions};
