//! Session lifecycle controller.
//!
//! Owns the control connection for its whole life: connects with bearer
//! auth, hands the read half to the dispatcher and the write half to the
//! outbound writer, then drives keepalive pings, the hard session timeout,
//! and the close handshake from a single select loop.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::dispatcher;
use crate::forward::Forwarder;
use crate::writer::{self, OutboundWriter};

/// Tuning knobs for one tunnel session.
///
/// Tests shrink the timing fields; the defaults are the production values.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub relay_url: String,
    pub token: String,
    pub local_port: u16,
    /// Keepalive ping period while the session is active.
    pub ping_interval: Duration,
    /// Hard cap on the session lifetime.
    pub max_session: Duration,
    /// How long to wait for the relay to acknowledge the close frame.
    pub close_grace: Duration,
    /// How long the writer gets to drain its queue on shutdown.
    pub drain_deadline: Duration,
}

impl SessionConfig {
    pub fn new(relay_url: impl Into<String>, token: impl Into<String>, local_port: u16) -> Self {
        Self {
            relay_url: relay_url.into(),
            token: token.into(),
            local_port,
            ping_interval: Duration::from_secs(30),
            max_session: Duration::from_secs(4 * 60 * 60),
            close_grace: Duration::from_secs(1),
            drain_deadline: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Active,
    Closing,
    Closed,
}

fn transition(state: &mut State, next: State) {
    debug!("Session {:?} -> {:?}", *state, next);
    *state = next;
}

/// Run one tunnel session to completion.
///
/// Returns once the session reaches `Closed`. `interrupt` is the host's
/// shutdown request (Ctrl-C in the CLI). Connect failures are fatal; the
/// session never becomes active.
pub async fn run(config: SessionConfig, interrupt: oneshot::Receiver<()>) -> Result<()> {
    let mut state = State::Connecting;
    info!("Connecting to relay: {}", config.relay_url);

    let mut request = config
        .relay_url
        .as_str()
        .into_client_request()
        .context("Invalid relay URL")?;
    let auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .context("Token is not a valid header value")?;
    request.headers_mut().insert(AUTHORIZATION, auth);

    let (ws, _) = connect_async(request)
        .await
        .context("Failed to connect to relay")?;
    let (sink, stream) = ws.split();

    // One done channel for both halves: the dispatcher signals it on any
    // read-loop termination, the writer on a wire write failure.
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
    let (writer, mut writer_task) = writer::spawn(sink, done_tx.clone());
    let forwarder = Forwarder::new(writer.clone(), config.local_port)?;
    let reader_task = tokio::spawn(dispatcher::run(stream, forwarder, done_tx));

    transition(&mut state, State::Active);
    info!("Tunnel active, forwarding to http://127.0.0.1:{}", config.local_port);
    warn!(
        "The tunnel will close automatically after {} hours",
        config.max_session.as_secs() / 3600
    );

    drive(&config, &writer, &mut done_rx, interrupt).await;

    // Teardown is unconditional: drain the writer within its deadline, then
    // drop both halves of the connection.
    writer.shutdown().await;
    if timeout(config.drain_deadline, &mut writer_task).await.is_err() {
        writer_task.abort();
    }
    reader_task.abort();
    info!("Session closed");
    Ok(())
}

/// Drive an active session until it reaches `Closed`.
///
/// A failed ping enqueue means the writer is gone: the session goes straight
/// to `Closed` without the close handshake, as does any done signal while
/// active. Interrupt and hard timeout both go through `Closing`.
async fn drive(
    config: &SessionConfig,
    writer: &OutboundWriter,
    done_rx: &mut mpsc::Receiver<()>,
    interrupt: oneshot::Receiver<()>,
) {
    let mut state = State::Active;
    let mut ping = interval(config.ping_interval);
    ping.tick().await; // the first tick completes immediately
    let deadline = sleep(config.max_session);
    tokio::pin!(deadline);
    tokio::pin!(interrupt);

    while state == State::Active {
        tokio::select! {
            _ = done_rx.recv() => {
                info!("Control connection ended");
                transition(&mut state, State::Closed);
            }
            _ = ping.tick() => {
                if let Err(e) = writer.enqueue(Message::Ping(b"ping".to_vec())).await {
                    error!("Failed to send ping: {}", e);
                    transition(&mut state, State::Closed);
                }
            }
            _ = &mut interrupt => {
                warn!("Interrupt received, closing tunnel");
                transition(&mut state, State::Closing);
            }
            _ = &mut deadline => {
                warn!("Session timeout reached, closing tunnel");
                transition(&mut state, State::Closing);
            }
        }
    }

    if state == State::Closing {
        close_handshake(writer, done_rx, config.close_grace).await;
        transition(&mut state, State::Closed);
    }
}

/// Enqueue the close frame and wait, bounded by the grace period, for the
/// read loop to observe the connection closing. The relay may never answer;
/// both the interrupt and hard-timeout paths go through here.
async fn close_handshake(
    writer: &OutboundWriter,
    done_rx: &mut mpsc::Receiver<()>,
    grace: Duration,
) {
    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }));
    if let Err(e) = writer.enqueue(close).await {
        warn!("Could not enqueue close frame: {}", e);
        return;
    }
    let _ = timeout(grace, done_rx.recv()).await;
}
