//! qgactl - QEMU guest agent client
//!
//! A library and CLI for driving the QEMU guest agent (QGA) over the host
//! side of its virtio-serial channel, exposed as a Unix socket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  qgactl CLI / GuestAgent (typed commands)       │
//! ├─────────────────────────────────────────────────┤
//! │  ExecSession (guest-exec + status polling)      │
//! ├─────────────────────────────────────────────────┤
//! │  Connection (socket, request/reply lock-step)   │
//! ├─────────────────────────────────────────────────┤
//! │  MessageFramer (undelimited JSON replies)       │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! Wire types live in the `qga-protocol` crate.
//!
//! # Example
//!
//! ```no_run
//! use qgactl::agent::{ExecCancel, ExecRequest, GuestAgent};
//! use qgactl::config::ClientConfig;
//!
//! let config = ClientConfig::load()?;
//! let mut agent = GuestAgent::new(&config);
//!
//! agent.ping()?;
//! println!("guest: {}", agent.host_name()?);
//!
//! let request = ExecRequest::new("/bin/uname", vec!["-a".into()]);
//! let result = agent.run(&request, &ExecCancel::new())?;
//! print!("{}", result.stdout);
//! # Ok::<(), qgactl::Error>(())
//! ```
//!
//! # Limitations
//!
//! The guest agent cannot kill a process started with `guest-exec`. A wait
//! that times out or is cancelled leaves the guest process running.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod config;
pub mod error;

// Re-export main types for convenience
pub use agent::{Connection, ConnectionState, GuestAgent};
pub use config::ClientConfig;
pub use error::{CancelReason, Error, ErrorKind, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
