//! Error types for Tunlink.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Shutdown has begun; the frame was dropped, not queued.
    #[error("Writer is shutting down, frame dropped")]
    WriterClosing,

    /// The writer task stopped, usually after a wire write failure.
    #[error("Writer task has stopped")]
    WriterGone,
}
