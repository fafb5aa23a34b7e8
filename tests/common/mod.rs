//! Shared test utilities: schema fixtures, an in-memory connector and a
//! fake renderer on the far end of it.

#![allow(dead_code, unused_imports)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use uisync::model::{FieldDef, FieldKind, Observable, Schema, SchemaRegistry, Value};
use uisync::patch::{Mirror, PatchDocument};
use uisync::protocol::Message;
use uisync::transport::{read_frame, write_frame, BackoffPolicy, Connector};

pub static PAGE: Schema = Schema::new(
    "Page",
    &[
        FieldDef::new("title", FieldKind::Text),
        FieldDef::new("controls", FieldKind::List),
        FieldDef::new("meta", FieldKind::Map),
    ],
);

pub static BUTTON: Schema = Schema::new(
    "Button",
    &[
        FieldDef::new("text", FieldKind::Text),
        FieldDef::new("count", FieldKind::Int),
        FieldDef::new("enabled", FieldKind::Bool),
        FieldDef::new("size", FieldKind::Float),
        FieldDef::new("style", FieldKind::Enum(&["plain", "bold"])),
        FieldDef::new("child", FieldKind::Object),
    ],
);

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::new().with(&PAGE).with(&BUTTON)
}

pub fn page(title: &str) -> Observable {
    Observable::with_fields(&PAGE, [("title", title)]).unwrap()
}

pub fn button(text: &str, count: i64) -> Observable {
    Observable::with_fields(
        &BUTTON,
        [("text", Value::from(text)), ("count", Value::Int(count))],
    )
    .unwrap()
}

/// Backoff with no jitter and short delays.
pub fn fast_policy() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_millis(10),
        max: Duration::from_millis(40),
        jitter: Duration::ZERO,
        local_connect_timeout: Duration::from_millis(200),
        remote_connect_timeout: Duration::from_millis(200),
    }
}

/// In-memory connector: every `connect()` creates a duplex pipe and hands
/// the far end to the test through [`Accepted`].
#[derive(Clone)]
pub struct DuplexConnector {
    servers: mpsc::UnboundedSender<DuplexStream>,
    refuse: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

pub struct Accepted {
    servers: mpsc::UnboundedReceiver<DuplexStream>,
}

impl DuplexConnector {
    pub fn pair() -> (Self, Accepted) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Self {
                servers,
                refuse: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            Accepted { servers: rx },
        )
    }

    /// While set, connection attempts fail with `ConnectionRefused`.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for DuplexConnector {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    async fn connect(&self) -> io::Result<(Self::Reader, Self::Writer)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.servers
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
        Ok(tokio::io::split(client))
    }

    fn is_local(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "duplex".to_string()
    }
}

impl Accepted {
    /// Waits for the next connection and wraps it as a renderer.
    pub async fn accept(&mut self) -> FakeRenderer {
        let stream = tokio::time::timeout(Duration::from_secs(5), self.servers.recv())
            .await
            .expect("no connection within 5s")
            .expect("connector dropped");
        FakeRenderer::new(stream)
    }
}

/// Far end of a duplex connection, speaking the wire protocol and
/// rebuilding the object graph from received patches.
pub struct FakeRenderer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    pub mirror: Mirror,
}

impl FakeRenderer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            mirror: Mirror::new(registry()),
        }
    }

    /// Next raw frame, or `None` when the peer closed.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.reader, 1 << 20))
            .await
            .expect("no frame within 5s")
            .expect("read failed")
    }

    pub async fn recv(&mut self) -> Message {
        let frame = self.recv_frame().await.expect("connection closed");
        Message::decode(&frame).expect("malformed message")
    }

    /// Receives the next message, which must be a patch, and applies it.
    pub async fn recv_patch(&mut self) -> PatchDocument {
        match self.recv().await {
            Message::Patch(doc) => {
                self.mirror.apply(&doc);
                doc
            }
            other => panic!("expected patch, got {}", other.kind()),
        }
    }

    pub async fn send(&mut self, message: &Message) {
        let bytes = message.encode().unwrap();
        write_frame(&mut self.writer, &bytes).await.unwrap();
    }

    /// Whether nothing arrives within `window`.
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, read_frame(&mut self.reader, 1 << 20))
            .await
            .is_err()
    }
}
