//! Guest agent client.
//!
//! Layers, bottom up:
//!
//! - [`framer`]: turns a byte stream with no delimiters into JSON replies
//! - [`Connection`]: owns the socket, one request/reply at a time
//! - [`ExecSession`]: launches guest processes and polls them to completion
//! - [`GuestAgent`]: one typed method per guest agent command

mod client;
mod connection;
mod exec;
pub mod framer;

#[cfg(test)]
mod testing;

pub use client::{GuestAgent, FILE_CHUNK_SIZE};
pub use connection::{Connection, ConnectionState};
pub use exec::{
    ExecCancel, ExecHandle, ExecOutput, ExecRequest, ExecResult, ExecSession, ExecStatus,
    PollOutcome, PollPolicy,
};
pub use framer::{FrameSource, MessageFramer};
