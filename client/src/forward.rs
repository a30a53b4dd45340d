//! Forward executor: one local-service call per inbound FORWARD request.
//!
//! Executors are fire-and-forget tasks. Each one performs a single HTTP call
//! against the loopback service and emits its result as one or more response
//! frames through the outbound writer. There is no ordering across requests;
//! frames for one request are emitted in order and keep that order on the
//! wire thanks to the writer's FIFO queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Method;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use tunlink_shared::protocol::{ForwardInfo, Response, ResponseType, CHUNK_SIZE};

use crate::writer::OutboundWriter;

/// Cap on concurrently running local-service calls. Executors past the cap
/// wait for a permit inside their own task, never in the read loop.
const MAX_IN_FLIGHT: usize = 64;

/// Deadline for one local-service call.
const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawns one executor task per forwarding request.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    writer: OutboundWriter,
    local_port: u16,
    limiter: Arc<Semaphore>,
}

impl Forwarder {
    pub fn new(writer: OutboundWriter, local_port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LOCAL_CALL_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            writer,
            local_port,
            limiter: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Run the request to completion in its own task.
    ///
    /// The task is not cancelled when the session begins shutting down; it
    /// either completes or fails on its own local-call error path.
    pub fn spawn(&self, id: String, info: ForwardInfo) {
        let forwarder = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = forwarder.limiter.clone().acquire_owned().await else {
                return;
            };
            forwarder.execute(id, info).await;
        });
    }

    async fn execute(&self, id: String, info: ForwardInfo) {
        let frames = match self.call_local(&info).await {
            Ok((status, body)) => {
                info!("{} {} -> {}", info.method, info.path, status);
                chunk_responses(&id, status, &body)
            }
            Err(e) => {
                warn!(
                    "Local service call failed ({} {}): is anything listening on port {}? ({})",
                    info.method, info.path, self.local_port, e
                );
                vec![Response {
                    request_id: id.clone(),
                    status: 500,
                    body: String::new(),
                    last: true,
                    response_type: ResponseType::NotRunningAppOfClient,
                }]
            }
        };

        for frame in frames {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode response for request {}: {}", id, e);
                    return;
                }
            };
            if let Err(e) = self.writer.enqueue(Message::Text(text)).await {
                debug!("Response frame for request {} dropped: {}", id, e);
                return;
            }
        }
    }

    async fn call_local(&self, info: &ForwardInfo) -> Result<(u16, Vec<u8>)> {
        let url = format!("http://127.0.0.1:{}{}", self.local_port, info.path);
        let method = Method::from_bytes(info.method.as_bytes())?;

        let mut request = self.client.request(method, &url);
        if let Some(body) = &info.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

/// Split a response body into wire frames.
///
/// Bodies over [`CHUNK_SIZE`] become consecutive frames of exactly
/// `CHUNK_SIZE` bytes plus a final remainder; only the final frame carries
/// `last`. A chunk boundary can split a multibyte sequence; lossy conversion
/// keeps every frame valid UTF-8.
fn chunk_responses(id: &str, status: u16, body: &[u8]) -> Vec<Response> {
    let chunks: Vec<&[u8]> = if body.is_empty() {
        vec![&[][..]]
    } else {
        body.chunks(CHUNK_SIZE).collect()
    };

    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| Response {
            request_id: id.to_string(),
            status,
            body: String::from_utf8_lossy(chunk).into_owned(),
            last: i + 1 == total,
            response_type: ResponseType::ResponseChunk,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a fresh loopback port.
    pub(crate) async fn spawn_local_http(status: u16, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    /// A loopback port with nothing listening on it.
    pub(crate) async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }
}
