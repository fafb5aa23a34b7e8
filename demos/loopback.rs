//! A counter page synchronised to an in-process renderer over TCP.
//!
//! The "renderer" accepts the connection, rebuilds the page from patches and
//! clicks the button three times. Run with `RUST_LOG=debug` to see the
//! traffic.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::net::TcpListener;

use uisync::model::{FieldDef, FieldKind, Observable, Schema, SchemaRegistry, Value};
use uisync::patch::Mirror;
use uisync::protocol::Message;
use uisync::transport::{read_frame, write_frame, TcpConnector};
use uisync::{logging, Config, Session};

static PAGE: Schema = Schema::new(
    "Page",
    &[
        FieldDef::new("title", FieldKind::Text),
        FieldDef::new("controls", FieldKind::List),
    ],
);

static BUTTON: Schema = Schema::new(
    "Button",
    &[
        FieldDef::new("text", FieldKind::Text),
        FieldDef::new("clicks", FieldKind::Int),
    ],
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load().context("loading config")?;
    logging::init_tracing(&config.logging.filter);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    config.transport.address = listener.local_addr()?.to_string();
    let renderer = tokio::spawn(render(listener));

    let page = Observable::with_fields(&PAGE, [("title", "Counter")])?;
    let button = Observable::with_fields(&BUTTON, [("text", "Click me")])?;
    page.list("controls")?.push(&button)?;
    button.on_event("click", |event| {
        let clicks = event
            .target
            .get("clicks")
            .ok()
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        let _ = event.target.set_field("clicks", clicks + 1);
    });

    let connector = TcpConnector::new(config.transport.address.clone());
    let session = Session::from_config(page, connector, &config);
    session.start();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sent = session.update().await?;
        tracing::info!(ops = sent, clicks = ?button.get("clicks")?, "Update sent");
    }

    session.close();
    let remote_clicks = renderer.await??;
    println!("renderer saw {remote_clicks} clicks");
    Ok(())
}

/// Accepts one session, mirrors its page and clicks the first control
/// after every patch until three clicks are visible.
async fn render(listener: TcpListener) -> anyhow::Result<i64> {
    let (stream, peer) = listener.accept().await?;
    tracing::info!(%peer, "Renderer accepted session");
    let (mut reader, mut writer) = stream.into_split();
    let mut mirror = Mirror::new(SchemaRegistry::new().with(&PAGE).with(&BUTTON));

    while let Some(frame) = read_frame(&mut reader, 1 << 20).await? {
        let doc = match Message::decode(&frame)? {
            Message::Patch(doc) => doc,
            Message::Register { session_id } => {
                tracing::info!(session = %session_id, "Session registered");
                continue;
            }
            other => bail!("unexpected {} message", other.kind()),
        };
        mirror.apply(&doc);

        let Some(root) = mirror.root() else { continue };
        let Some(Value::Object(control)) = root.list("controls")?.get(0) else {
            continue;
        };
        let clicks = control.get("clicks")?.as_int().unwrap_or(0);
        if clicks >= 3 {
            return Ok(clicks);
        }
        let target = mirror
            .index()
            .identity_of(&control)
            .context("control without identity")?;
        let click = Message::Event {
            target,
            name: "click".into(),
            payload: serde_json::json!({ "seen": clicks }),
        };
        write_frame(&mut writer, &click.encode()?).await?;
    }
    bail!("session closed before three clicks")
}
