//! Inbound dispatcher: the single sequential reader of the control
//! connection.
//!
//! Frames are read one at a time and routed by type. Decode failures are
//! non-fatal; only connection-level errors end the read loop, and that ends
//! the session.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};
use tunlink_shared::protocol::{Request, RequestType};

use crate::forward::Forwarder;

/// Read frames until the connection ends, routing each one.
///
/// Executors are spawned per FORWARD request and never block this loop.
/// `done` is signalled on any termination, whether the remote closed
/// cleanly or the read failed.
pub async fn run<St>(mut stream: St, forwarder: Forwarder, done: mpsc::Sender<()>)
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => route(&text, &forwarder),
            Ok(Message::Pong(_)) => debug!("Pong from relay"),
            Ok(Message::Close(_)) => {
                info!("Relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Control connection read error: {}", e);
                break;
            }
        }
    }
    let _ = done.try_send(());
}

fn route(text: &str, forwarder: &Forwarder) {
    let request: Request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to parse frame from relay: {}", e);
            return;
        }
    };

    match request.kind {
        RequestType::Forward => match request.forward_info {
            Some(info) => forwarder.spawn(request.id, info),
            None => warn!("FORWARD request {:?} has no forwardInfo", request.id),
        },
        RequestType::Created => {
            if let Some(info) = request.tunnel_info {
                info!(
                    "Tunnel created: {} -> http://127.0.0.1:{}",
                    info.message,
                    forwarder.local_port()
                );
            }
        }
        RequestType::Unknown => {
            if let Some(e) = request.error.as_deref().filter(|e| !e.is_empty()) {
                error!("Error from relay: {}", e);
            }
        }
    }
}
