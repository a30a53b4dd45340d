//! Tunlink shared library
//!
//! Wire protocol envelopes and error types shared by the client.

pub mod error;
pub mod protocol;

pub use error::{Error, Result};
