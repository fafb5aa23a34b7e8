use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::close::CloseSignal;
use super::connector::Connector;
use super::frame::{read_frame, write_frame};
use super::{ConnectionState, TransportError};

type Callback = Arc<dyn Fn() + Send + Sync>;
type FailureCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;
type MessageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type HandshakeCallback = Arc<dyn Fn() -> Handshake + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    on_connect: Option<Callback>,
    on_failed_connect: Option<FailureCallback>,
    on_message: Option<MessageCallback>,
    on_disconnect: Option<Callback>,
    on_close: Option<Callback>,
    on_handshake: Option<HandshakeCallback>,
}

/// What to write on a fresh connection before anything queued.
#[derive(Debug, Default)]
pub struct Handshake {
    pub frames: Vec<Vec<u8>>,
    /// Queued frames submitted with a generation below this one are dropped
    /// and reported as delivered: the handshake frames carry their content.
    pub supersede_before: Option<u64>,
}

struct Outgoing {
    payload: Vec<u8>,
    generation: Option<u64>,
    done: oneshot::Sender<Result<(), TransportError>>,
}

impl Outgoing {
    fn superseded_by(&self, generation: u64) -> bool {
        self.generation.is_some_and(|g| g < generation)
    }
}

/// Completion of one submitted frame.
#[must_use = "a delivery does nothing unless awaited"]
pub struct Delivery {
    written: oneshot::Receiver<Result<(), TransportError>>,
}

impl Delivery {
    /// Resolves once the frame is written, or fails when the transport closes first.
    pub fn wait(self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move { self.written.await.unwrap_or(Err(TransportError::Closed)) }
    }
}

struct Inner<C: Connector> {
    connector: C,
    policy: BackoffPolicy,
    max_frame_bytes: usize,
    state: watch::Sender<ConnectionState>,
    queue: mpsc::UnboundedSender<Outgoing>,
    /// Taken by the connect loop when it starts.
    pending: Mutex<Option<mpsc::UnboundedReceiver<Outgoing>>>,
    callbacks: RwLock<Callbacks>,
    close: CloseSignal,
    started: AtomicBool,
}

/// A message channel over one physical connection at a time, reconnecting
/// whenever that connection fails.
///
/// The state machine is driven only by the connect loop started with
/// [`connect`](Self::connect). Sends are queued and written in submission
/// order; a send issued while the link is down waits for the next
/// connection, and a frame whose write failed is retried first after
/// reconnecting. An optional handshake is written ahead of the queue on
/// every new connection.
pub struct ReconnectingTransport<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ReconnectingTransport<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ReconnectingTransport<C> {
    pub fn new(connector: C, policy: BackoffPolicy, max_frame_bytes: usize) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy,
                max_frame_bytes,
                state,
                queue,
                pending: Mutex::new(Some(pending)),
                callbacks: RwLock::new(Callbacks::default()),
                close: CloseSignal::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_connect = Some(Arc::new(f));
    }

    pub fn on_failed_connect<F>(&self, f: F)
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_failed_connect = Some(Arc::new(f));
    }

    pub fn on_message<F>(&self, f: F)
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_message = Some(Arc::new(f));
    }

    /// Fires when an established connection drops, before the retry delay.
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_disconnect = Some(Arc::new(f));
    }

    /// Fires once, from the first [`close`](Self::close) call.
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_close = Some(Arc::new(f));
    }

    /// Produces the frames written first on each new connection.
    pub fn on_handshake<F>(&self, f: F)
    where
        F: Fn() -> Handshake + Send + Sync + 'static,
    {
        self.inner.callbacks.write().on_handshake = Some(Arc::new(f));
    }

    /// Starts the connect loop. Further calls do nothing.
    pub fn connect(&self) -> Option<JoinHandle<()>> {
        if self.inner.close.is_closed() || self.inner.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let pending = self.inner.pending.lock().take()?;
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.run(pending).await }))
    }

    /// Queues `payload` and waits until it has been written to a connection.
    ///
    /// There is no timeout: while the link is down this waits for the
    /// reconnect loop. It fails only once the transport is closed.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.submit(payload, None)?.wait().await
    }

    /// Queues `payload` without waiting. Frames keep the order in which they
    /// were submitted.
    ///
    /// A `generation` makes the frame eligible for replacement by a
    /// handshake whose `supersede_before` is greater.
    pub fn submit(
        &self,
        payload: Vec<u8>,
        generation: Option<u64>,
    ) -> Result<Delivery, TransportError> {
        if payload.len() > self.inner.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                len: payload.len(),
                max: self.inner.max_frame_bytes,
            });
        }
        if self.inner.close.is_closed() {
            return Err(TransportError::Closed);
        }
        let (done, written) = oneshot::channel();
        self.inner
            .queue
            .send(Outgoing {
                payload,
                generation,
                done,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(Delivery { written })
    }

    /// Moves to `Closing` for good: the connection is released, no further
    /// attempts are made and queued sends fail with `Closed`.
    pub fn close(&self) {
        if !self.inner.close.close() {
            return;
        }
        tracing::info!(peer = %self.inner.connector.describe(), "Closing transport");
        self.inner.state.send_replace(ConnectionState::Closing);
        // Never started: nothing else will drain the queue.
        if let Some(mut pending) = self.inner.pending.lock().take() {
            fail_pending(&mut pending);
        }
        if let Some(f) = self.inner.callbacks().on_close {
            self.inner.fire("on_close", || f());
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_local(&self) -> bool {
        self.inner.connector.is_local()
    }

    /// Waits for `Connected`. Fails if the transport closes first.
    pub async fn wait_connected(&self) -> Result<(), TransportError> {
        let mut rx = self.state_watch();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closing))
            .await
            .map_err(|_| TransportError::Closed)?;
        match *state {
            ConnectionState::Connected => Ok(()),
            _ => Err(TransportError::Closed),
        }
    }
}

impl<C: Connector> Inner<C> {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closing || *state == next {
                return false;
            }
            tracing::debug!(old = ?*state, new = ?next, "Transport state changed");
            *state = next;
            true
        });
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks.read().clone()
    }

    fn fire(&self, name: &'static str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::error!(callback = name, "Transport callback panicked");
        }
    }

    async fn run(self: Arc<Self>, mut pending: mpsc::UnboundedReceiver<Outgoing>) {
        let local = self.connector.is_local();
        let peer = self.connector.describe();
        let mut retry: u32 = 0;
        // Frames taken off the queue but not yet written, including one
        // whose write failed; they go out first on the next link.
        let mut backlog: VecDeque<Outgoing> = VecDeque::new();

        while !self.close.is_closed() {
            self.set_state(ConnectionState::Connecting);
            let timeout = self.policy.connect_timeout(local);
            let attempt = tokio::select! {
                _ = self.close.wait() => break,
                result = tokio::time::timeout(timeout, self.connector.connect()) => result,
            };

            match attempt {
                Ok(Ok((reader, writer))) => {
                    retry = 0;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(peer = %peer, "Connected");
                    if let Some(f) = self.callbacks().on_connect {
                        self.fire("on_connect", || f());
                    }

                    let outcome = self.serve(reader, writer, &mut pending, &mut backlog).await;
                    if self.close.is_closed() {
                        break;
                    }
                    self.set_state(ConnectionState::Disconnected);
                    match outcome {
                        Ok(()) => tracing::warn!(peer = %peer, "Connection closed by peer"),
                        Err(e) => tracing::warn!(peer = %peer, error = %e, "Connection lost"),
                    }
                    if let Some(f) = self.callbacks().on_disconnect {
                        self.fire("on_disconnect", || f());
                    }
                }
                Ok(Err(e)) => {
                    self.connect_failed(&peer, retry, TransportError::Io(e));
                }
                Err(_) => {
                    self.connect_failed(&peer, retry, TransportError::ConnectTimeout { timeout });
                }
            }

            let delay = self.policy.delay(retry, local);
            retry = retry.saturating_add(1);
            tracing::debug!(
                peer = %peer,
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::select! {
                _ = self.close.wait() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closing);
        for out in backlog.drain(..) {
            let _ = out.done.send(Err(TransportError::Closed));
        }
        fail_pending(&mut pending);
        tracing::debug!(peer = %peer, "Connect loop stopped");
    }

    fn connect_failed(&self, peer: &str, retry: u32, error: TransportError) {
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(peer = %peer, attempt = retry + 1, error = %error, "Connect attempt failed");
        if let Some(f) = self.callbacks().on_failed_connect {
            self.fire("on_failed_connect", || f(&error));
        }
    }

    /// Pumps one connection until it fails or the transport closes.
    async fn serve(
        self: &Arc<Self>,
        reader: C::Reader,
        mut writer: C::Writer,
        pending: &mut mpsc::UnboundedReceiver<Outgoing>,
        backlog: &mut VecDeque<Outgoing>,
    ) -> io::Result<()> {
        let mut read_task = tokio::spawn(Arc::clone(self).read_loop(reader));

        let result: io::Result<()> = async {
            self.handshake(&mut writer, pending, backlog).await?;
            while let Some(out) = backlog.pop_front() {
                self.write(&mut writer, out, backlog).await?;
            }
            loop {
                tokio::select! {
                    biased;
                    _ = self.close.wait() => return Ok(()),
                    joined = &mut read_task => {
                        return joined.unwrap_or_else(|e| Err(io::Error::other(e)));
                    }
                    next = pending.recv() => match next {
                        Some(out) => self.write(&mut writer, out, backlog).await?,
                        None => return Ok(()),
                    },
                }
            }
        }
        .await;

        read_task.abort();
        result
    }

    async fn handshake(
        &self,
        writer: &mut C::Writer,
        pending: &mut mpsc::UnboundedReceiver<Outgoing>,
        backlog: &mut VecDeque<Outgoing>,
    ) -> io::Result<()> {
        let Some(f) = self.callbacks().on_handshake else {
            return Ok(());
        };
        let handshake = match catch_unwind(AssertUnwindSafe(|| f())) {
            Ok(handshake) => handshake,
            Err(_) => {
                tracing::error!(callback = "on_handshake", "Transport callback panicked");
                Handshake::default()
            }
        };

        for frame in &handshake.frames {
            write_frame(writer, frame).await?;
        }

        if let Some(generation) = handshake.supersede_before {
            while let Ok(out) = pending.try_recv() {
                backlog.push_back(out);
            }
            let before = backlog.len();
            let (stale, keep): (VecDeque<_>, VecDeque<_>) =
                backlog.drain(..).partition(|out| out.superseded_by(generation));
            *backlog = keep;
            for out in stale {
                let _ = out.done.send(Ok(()));
            }
            if backlog.len() != before {
                tracing::debug!(
                    superseded = before - backlog.len(),
                    generation,
                    "Dropped queued frames replaced by handshake"
                );
            }
        }
        Ok(())
    }

    async fn write(
        &self,
        writer: &mut C::Writer,
        out: Outgoing,
        backlog: &mut VecDeque<Outgoing>,
    ) -> io::Result<()> {
        match write_frame(writer, &out.payload).await {
            Ok(()) => {
                tracing::trace!(bytes = out.payload.len(), "Frame sent");
                let _ = out.done.send(Ok(()));
                Ok(())
            }
            Err(e) => {
                backlog.push_front(out);
                Err(e)
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: C::Reader) -> io::Result<()> {
        while let Some(frame) = read_frame(&mut reader, self.max_frame_bytes).await? {
            tracing::trace!(bytes = frame.len(), "Frame received");
            if let Some(f) = self.callbacks().on_message {
                self.fire("on_message", || f(frame));
            }
        }
        Ok(())
    }
}

fn fail_pending(pending: &mut mpsc::UnboundedReceiver<Outgoing>) {
    pending.close();
    while let Ok(out) = pending.try_recv() {
        let _ = out.done.send(Err(TransportError::Closed));
    }
}
