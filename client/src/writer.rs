//! Outbound writer: the single write path to the control connection.
//!
//! Every outbound frame (responses, keepalive pings, the close frame) goes
//! through one bounded FIFO queue drained by a dedicated task that owns the
//! websocket sink, so the order on the wire is exactly the enqueue order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};
use tunlink_shared::Error;

/// Capacity of the outbound frame queue.
pub const QUEUE_CAPACITY: usize = 100;

enum Command {
    Send(Message),
    Shutdown,
}

/// Cloneable handle for enqueueing frames onto the writer queue.
#[derive(Clone)]
pub struct OutboundWriter {
    tx: mpsc::Sender<Command>,
    closing: Arc<AtomicBool>,
}

impl OutboundWriter {
    /// Append a frame to the queue.
    ///
    /// Fails with [`Error::WriterClosing`] once shutdown has begun and with
    /// [`Error::WriterGone`] if the writer task has stopped; in both cases
    /// the frame is dropped and the caller sees the drop.
    pub async fn enqueue(&self, frame: Message) -> Result<(), Error> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::WriterClosing);
        }
        self.tx
            .send(Command::Send(frame))
            .await
            .map_err(|_| Error::WriterGone)
    }

    /// Stop accepting new frames and ask the writer task to exit.
    ///
    /// The shutdown marker takes a FIFO slot, so everything queued ahead of
    /// it is still written before the task stops. The caller bounds the
    /// drain with a deadline on the task handle.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

/// Spawn the writer task over `sink`.
///
/// A wire write failure is fatal: the loop stops and `done` is signalled so
/// the session can terminate.
pub fn spawn<S>(sink: S, done: mpsc::Sender<()>) -> (OutboundWriter, JoinHandle<()>)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
{
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let writer = OutboundWriter {
        tx,
        closing: Arc::new(AtomicBool::new(false)),
    };
    let handle = tokio::spawn(writer_loop(sink, rx, done));
    (writer, handle)
}

async fn writer_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Command>, done: mpsc::Sender<()>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Send(frame) => {
                if let Err(e) = sink.send(frame).await {
                    error!("Write to relay failed: {}", e);
                    let _ = done.try_send(());
                    return;
                }
            }
            Command::Shutdown => {
                // An enqueue racing with shutdown can land a frame behind
                // this marker; drop those visibly instead of leaving them
                // queued behind a returned task.
                rx.close();
                let mut dropped = 0usize;
                while let Ok(command) = rx.try_recv() {
                    if matches!(command, Command::Send(_)) {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    warn!("Dropped {} frame(s) enqueued during shutdown", dropped);
                }
                debug!("Outbound queue drained, writer stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use futures_util::Sink;
    use tokio_tungstenite::tungstenite::Message;

    /// Sink that records every frame it receives, with a failure switch.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) frames: Arc<Mutex<Vec<Message>>>,
        pub(crate) fail: Arc<AtomicBool>,
    }

    impl Sink<Message> for RecordingSink {
        type Error = std::io::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "sink failed",
                ));
            }
            self.frames.lock().unwrap().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Poll `sink` until it holds at least `n` frames or two seconds pass.
    pub(crate) async fn wait_for_frames(sink: &RecordingSink, n: usize) -> Vec<Message> {
        for _ in 0..200 {
            {
                let frames = sink.frames.lock().unwrap();
                if frames.len() >= n {
                    return frames.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sink.frames.lock().unwrap().clone()
    }
}
