use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::calls::PendingCalls;
use super::props::value_from_json;
use super::{SessionError, SessionId, SessionOptions};
use crate::config::Config;
use crate::diff::{diff, DiffResult, Snapshot};
use crate::identity::{Identity, IdentityIndex};
use crate::model::Observable;
use crate::patch;
use crate::protocol::Message;
use crate::pubsub::{Hub, PubSubClient};
use crate::transport::{BackoffPolicy, Connector, Handshake, ReconnectingTransport, TransportError};

type Detach = Box<dyn Fn(SessionId) + Send + Sync>;

/// What the renderer is known to hold.
#[derive(Default)]
struct SyncState {
    snapshot: Option<Snapshot>,
    /// Bumped by every full resynchronisation. Patches queued under an older
    /// generation are superseded by it.
    generation: u64,
}

struct Shared<C: Connector> {
    id: SessionId,
    root: Observable,
    index: Arc<IdentityIndex>,
    sync: Mutex<SyncState>,
    transport: ReconnectingTransport<C>,
    calls: PendingCalls,
    options: SessionOptions,
    hubs: Mutex<Vec<Detach>>,
    closed: AtomicBool,
}

/// One logical connection to a renderer.
///
/// `update()` diffs the root against what was last sent and queues the
/// patch. Messages from the renderer are handled on the transport's read
/// task: events go to the handlers installed on the target object, property
/// edits are written into the model and method results wake their caller.
pub struct Session<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> Session<C> {
    pub fn new(root: Observable, transport: ReconnectingTransport<C>, options: SessionOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: SessionId::new(),
                root,
                index: Arc::new(IdentityIndex::new()),
                sync: Mutex::new(SyncState::default()),
                transport,
                calls: PendingCalls::default(),
                options,
                hubs: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Builds the transport and options from a loaded [`Config`].
    pub fn from_config(root: Observable, connector: C, config: &Config) -> Self {
        let transport = ReconnectingTransport::new(
            connector,
            BackoffPolicy::from(&config.transport),
            config.transport.max_frame_bytes,
        );
        Self::new(root, transport, SessionOptions::from(&config.session))
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn root(&self) -> &Observable {
        &self.shared.root
    }

    pub fn index(&self) -> &Arc<IdentityIndex> {
        &self.shared.index
    }

    pub fn transport(&self) -> &ReconnectingTransport<C> {
        &self.shared.transport
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Wires the transport callbacks and starts the connect loop.
    ///
    /// Every new connection opens with `Register`, followed by a full patch
    /// of the root when `resync_on_reconnect` is set. The root's `connect`
    /// and `disconnect` handlers run as the link comes and goes.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let transport = &self.shared.transport;

        let weak = Arc::downgrade(&self.shared);
        transport.on_handshake(move || match weak.upgrade() {
            Some(shared) => shared.handshake(),
            None => Handshake::default(),
        });

        let weak = Arc::downgrade(&self.shared);
        transport.on_message(move |bytes| {
            if let Some(shared) = weak.upgrade() {
                shared.receive(&bytes);
            }
        });

        let weak = Arc::downgrade(&self.shared);
        transport.on_connect(move || {
            if let Some(shared) = weak.upgrade() {
                tracing::info!(session = %shared.id, "Renderer connected");
                shared.dispatch_lifecycle(LifecycleEvent::Connect);
            }
        });

        let weak = Arc::downgrade(&self.shared);
        transport.on_disconnect(move || {
            if let Some(shared) = weak.upgrade() {
                tracing::warn!(session = %shared.id, "Renderer connection lost");
                shared.dispatch_lifecycle(LifecycleEvent::Disconnect);
            }
        });

        // Closing the transport directly ends the session as well.
        let weak = Arc::downgrade(&self.shared);
        transport.on_close(move || {
            if let Some(shared) = weak.upgrade() {
                shared.shutdown();
            }
        });

        transport.connect()
    }

    /// Diffs the root against the last snapshot and sends the result.
    ///
    /// Returns the number of operations sent; `0` means nothing changed and
    /// nothing was queued. Waits until the patch is written, which spans
    /// reconnects.
    pub async fn update(&self) -> Result<usize, SessionError> {
        let (count, delivery) = {
            let shared = &self.shared;
            let mut sync = shared.sync.lock();
            let DiffResult { changes, snapshot } =
                diff(sync.snapshot.as_ref(), &shared.root, &shared.index);
            if changes.is_empty() {
                sync.snapshot = Some(snapshot);
                return Ok(0);
            }

            let doc = patch::encode(&changes)?;
            let bytes = Message::Patch(doc).encode()?;
            let delivery = shared.transport.submit(bytes, Some(sync.generation))?;
            sync.snapshot = Some(snapshot);
            for identity in &changes.disposed {
                shared.index.forget(*identity);
            }
            tracing::debug!(
                session = %shared.id,
                ops = changes.ops.len(),
                disposed = changes.disposed.len(),
                "Patch queued"
            );
            (changes.ops.len(), delivery)
        };
        delivery.wait().await?;
        Ok(count)
    }

    /// Runs the handler for `name` on the object behind `target`.
    ///
    /// Returns whether a handler ran to completion. Unknown targets are
    /// dropped with a warning; a panicking handler is reported to the
    /// renderer as a session crash.
    pub fn dispatch_event(&self, target: Identity, name: &str, payload: serde_json::Value) -> bool {
        self.shared.dispatch_event(target, name, payload)
    }

    /// Writes renderer-side property edits into the object behind `target`.
    ///
    /// Edits are folded into the snapshot as well, so the next update does
    /// not echo them back. Returns the number of properties applied.
    pub fn apply_props(&self, target: Identity, props: &BTreeMap<String, serde_json::Value>) -> usize {
        self.shared.apply_props(target, props)
    }

    /// Asks the renderer to run `name` on `target` and waits for its result.
    ///
    /// `timeout` defaults to the configured method timeout. A result that
    /// arrives after the timeout is discarded.
    pub async fn invoke_method(
        &self,
        target: Identity,
        name: &str,
        args: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, SessionError> {
        let shared = &self.shared;
        let timeout = timeout.unwrap_or(shared.options.method_timeout);
        let (seq, result) = shared.calls.register()?;

        let frame = Message::MethodCall {
            seq,
            target,
            name: name.to_string(),
            args,
        }
        .encode();
        let submitted = frame.map_err(SessionError::from).and_then(|bytes| {
            shared.transport.submit(bytes, None).map_err(|e| match e {
                TransportError::Closed => SessionError::ConnectionClosed,
                other => SessionError::from(other),
            })
        });
        if let Err(e) = submitted {
            shared.calls.cancel(seq);
            return Err(e);
        }
        tracing::debug!(session = %shared.id, seq, method = name, "Method call queued");

        match tokio::time::timeout(timeout, result).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Err(_) => {
                shared.calls.cancel(seq);
                tracing::warn!(session = %shared.id, seq, method = name, "Method call timed out");
                Err(SessionError::Timeout {
                    method: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Client bound to this session on `hub`. Closing the session removes
    /// all of its subscriptions there.
    pub fn pubsub<M>(&self, hub: &Hub<M>) -> PubSubClient<M>
    where
        M: Clone + Send + 'static,
    {
        let detach = hub.clone();
        self.shared
            .hubs
            .lock()
            .push(Box::new(move |id| detach.unsubscribe_all(id)));
        PubSubClient::new(hub.clone(), self.shared.id)
    }

    /// Closes the transport, fails pending method calls with
    /// `ConnectionClosed`, leaves every attached hub and runs the root's
    /// `close` handler. Idempotent.
    pub fn close(&self) {
        self.shared.shutdown();
    }
}

/// Events the session raises on its root object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Connect,
    Disconnect,
    Close,
}

impl LifecycleEvent {
    fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Close => "close",
        }
    }
}

impl<C: Connector> Shared<C> {
    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close();
        let failed = self.calls.close();
        let hubs = std::mem::take(&mut *self.hubs.lock());
        for detach in &hubs {
            detach(self.id);
        }
        tracing::info!(session = %self.id, failed_calls = failed, "Session closed");
        self.dispatch_lifecycle(LifecycleEvent::Close);
    }

    fn handshake(&self) -> Handshake {
        let mut handshake = Handshake::default();
        match (Message::Register { session_id: self.id }).encode() {
            Ok(frame) => handshake.frames.push(frame),
            Err(e) => tracing::error!(session = %self.id, error = %e, "Failed to encode register"),
        }
        if !self.options.resync_on_reconnect {
            return handshake;
        }

        let mut sync = self.sync.lock();
        let DiffResult { changes, snapshot } = diff(None, &self.root, &self.index);
        let frame = patch::encode(&changes)
            .map_err(SessionError::from)
            .and_then(|doc| Message::Patch(doc).encode().map_err(SessionError::from));
        match frame {
            Ok(frame) => {
                sync.generation += 1;
                sync.snapshot = Some(snapshot);
                handshake.frames.push(frame);
                handshake.supersede_before = Some(sync.generation);
                tracing::debug!(
                    session = %self.id,
                    generation = sync.generation,
                    objects = sync.snapshot.as_ref().map_or(0, Snapshot::len),
                    "Full resync prepared"
                );
            }
            Err(e) => tracing::error!(session = %self.id, error = %e, "Failed to encode resync"),
        }
        handshake
    }

    fn receive(&self, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Malformed message dropped");
                return;
            }
        };
        match message {
            Message::Event {
                target,
                name,
                payload,
            } => {
                self.dispatch_event(target, &name, payload);
            }
            Message::UpdateProps { target, props } => {
                self.apply_props(target, &props);
            }
            Message::MethodResult { seq, result, error } => {
                let outcome = match error {
                    Some(message) => Err(SessionError::Remote(message)),
                    None => Ok(result),
                };
                if !self.calls.complete(seq, outcome) {
                    tracing::warn!(session = %self.id, seq, "Late method result dropped");
                }
            }
            other => {
                tracing::debug!(session = %self.id, kind = other.kind(), "Ignoring message");
            }
        }
    }

    fn dispatch_event(&self, target: Identity, name: &str, payload: serde_json::Value) -> bool {
        let Some(object) = self.index.resolve(target) else {
            tracing::warn!(session = %self.id, identity = %target, event = name, "Event for unknown target dropped");
            return false;
        };
        self.run_handler(&object, &target, name, payload)
    }

    fn dispatch_lifecycle(&self, event: LifecycleEvent) {
        self.run_handler(&self.root, &"root", event.name(), serde_json::Value::Null);
    }

    fn run_handler(
        &self,
        object: &Observable,
        target: &dyn std::fmt::Display,
        name: &str,
        payload: serde_json::Value,
    ) -> bool {
        match catch_unwind(AssertUnwindSafe(|| object.trigger(name, payload))) {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(session = %self.id, target = %target, event = name, "No handler for event");
                false
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    session = %self.id,
                    target = %target,
                    event = name,
                    error = %message,
                    "Event handler panicked"
                );
                self.report_crash(format!("{} handler for {}: {}", name, target, message));
                false
            }
        }
    }

    fn report_crash(&self, message: String) {
        let frame = match (Message::SessionCrashed { message }).encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "Failed to encode crash report");
                return;
            }
        };
        // Fire and forget: the delivery is not awaited.
        if let Err(e) = self.transport.submit(frame, None) {
            tracing::warn!(session = %self.id, error = %e, "Crash report not sent");
        }
    }

    fn apply_props(&self, target: Identity, props: &BTreeMap<String, serde_json::Value>) -> usize {
        let Some(object) = self.index.resolve(target) else {
            tracing::warn!(session = %self.id, identity = %target, "Property update for unknown target dropped");
            return 0;
        };
        let schema = object.schema();
        let mut written = Vec::new();
        {
            // Writes and snapshot go together; listeners run after the lock
            // is released so they may call back into the session.
            let mut sync = self.sync.lock();
            for (name, json) in props {
                let Some(idx) = schema.field_index(name) else {
                    tracing::warn!(session = %self.id, identity = %target, field = %name, "Unknown property");
                    continue;
                };
                let Some(value) = value_from_json(schema.fields[idx].kind, json) else {
                    tracing::warn!(session = %self.id, identity = %target, field = %name, "Property value has the wrong kind");
                    continue;
                };
                match object.write_field_quiet(idx, value.clone()) {
                    Ok((before, after)) => {
                        if let Some(snapshot) = sync.snapshot.as_mut() {
                            snapshot.absorb(object.key(), idx, &value, before, after);
                        }
                        written.push(idx);
                    }
                    Err(e) => {
                        tracing::warn!(session = %self.id, identity = %target, error = %e, "Property rejected");
                    }
                }
            }
        }
        for idx in &written {
            object.notify_field(*idx);
        }
        written.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Unregisters the session when the last handle goes away without `close()`.
impl<C: Connector> Drop for Shared<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.shared.calls.len())
            .finish()
    }
}
