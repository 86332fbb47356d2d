//! Protocol types for talking to the QEMU guest agent.
//!
//! This crate defines the wire protocol spoken between the host and the
//! in-guest agent (`qemu-ga`) over a Unix stream socket.
//!
//! # Protocol Overview
//!
//! Every request is a single JSON object terminated by a newline. Replies are
//! single JSON objects as well, but carry no length prefix and no mandatory
//! delimiter, so the reader has to discover message boundaries by parsing.
//!
//! ```text
//! -> {"execute": "guest-exec", "arguments": {"path": "/bin/true"}}
//! <- {"return": {"pid": 1234}}
//!
//! -> {"execute": "guest-bogus"}
//! <- {"error": {"class": "CommandNotFound", "desc": "The command guest-bogus has not been found"}}
//! ```

#![deny(missing_docs)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod exec;
pub mod guest;

pub use exec::{GuestExec, GuestExecPid, GuestExecStatus};

/// Default path of the guest agent socket on the host.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/qga.sock";

/// Maximum size of a single reply the host is willing to buffer (64 MiB).
///
/// qemu-ga caps captured exec output at 16 MiB per stream; base64 expands
/// that by a third, and stdout and stderr can both be full.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Command names understood by the guest agent.
pub mod commands {
    /// Liveness check.
    pub const PING: &str = "guest-ping";
    /// Agent version and supported command list.
    pub const INFO: &str = "guest-info";
    /// Operating system identification.
    pub const GET_OSINFO: &str = "guest-get-osinfo";
    /// Guest host name.
    pub const GET_HOST_NAME: &str = "guest-get-host-name";
    /// Logged-in users.
    pub const GET_USERS: &str = "guest-get-users";
    /// Guest timezone.
    pub const GET_TIMEZONE: &str = "guest-get-timezone";
    /// Network interfaces and addresses.
    pub const NETWORK_GET_INTERFACES: &str = "guest-network-get-interfaces";
    /// Mounted filesystems.
    pub const GET_FSINFO: &str = "guest-get-fsinfo";
    /// Start a process in the guest.
    pub const EXEC: &str = "guest-exec";
    /// Query a process started with [`EXEC`].
    pub const EXEC_STATUS: &str = "guest-exec-status";
    /// Open a file in the guest.
    pub const FILE_OPEN: &str = "guest-file-open";
    /// Read from an open guest file.
    pub const FILE_READ: &str = "guest-file-read";
    /// Write to an open guest file.
    pub const FILE_WRITE: &str = "guest-file-write";
    /// Close an open guest file.
    pub const FILE_CLOSE: &str = "guest-file-close";
    /// Power down, reboot or halt the guest.
    pub const SHUTDOWN: &str = "guest-shutdown";
}

/// Command arguments: a JSON object.
pub type Arguments = Map<String, Value>;

// ============================================================================
// Requests
// ============================================================================

/// A request envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    /// Command name (e.g., "guest-ping").
    pub execute: &'a str,
    /// Command arguments. The key is omitted entirely when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Arguments>,
}

/// Encode a request to wire format (JSON followed by a newline).
///
/// Empty argument maps are treated the same as no arguments: the
/// `arguments` key is left out of the envelope.
pub fn encode_request(
    command: &str,
    arguments: Option<&Arguments>,
) -> Result<Vec<u8>, serde_json::Error> {
    let request = Request {
        execute: command,
        arguments: arguments.filter(|args| !args.is_empty()),
    };
    let mut buf = serde_json::to_vec(&request)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Serialize a typed payload into a command argument map.
pub fn to_arguments<T: Serialize>(payload: &T) -> Result<Arguments, serde_json::Error> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "arguments must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Error descriptor reported by the guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Error class (e.g., "CommandNotFound", "GenericError").
    #[serde(default)]
    pub class: String,
    /// Human readable description.
    #[serde(default)]
    pub desc: String,
}

/// A classified reply from the guest agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `{"return": <value>}`
    Return(Value),
    /// `{"error": {"class": ..., "desc": ...}}`
    Error(ErrorDescriptor),
}

impl Reply {
    /// Classify a parsed reply.
    ///
    /// Members other than `return` and `error` (such as `id`) are ignored.
    pub fn from_value(value: Value) -> Result<Self, ReplyError> {
        let Value::Object(mut obj) = value else {
            return Err(ReplyError::NotAnObject(json_type_name(&value)));
        };

        if let Some(error) = obj.remove("error") {
            let desc: ErrorDescriptor =
                serde_json::from_value(error).map_err(ReplyError::BadErrorDescriptor)?;
            return Ok(Reply::Error(desc));
        }

        obj.remove("return")
            .map(Reply::Return)
            .ok_or(ReplyError::MissingReturn)
    }
}

/// A reply that is valid JSON but not a valid guest agent reply.
#[derive(Debug)]
pub enum ReplyError {
    /// The reply is not a JSON object.
    NotAnObject(&'static str),
    /// The reply has neither `return` nor `error`.
    MissingReturn,
    /// The `error` member could not be decoded.
    BadErrorDescriptor(serde_json::Error),
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::NotAnObject(kind) => write!(f, "reply is a JSON {}, not an object", kind),
            ReplyError::MissingReturn => write!(f, "reply has neither 'return' nor 'error'"),
            ReplyError::BadErrorDescriptor(e) => write!(f, "malformed error descriptor: {}", e),
        }
    }
}

impl std::error::Error for ReplyError {}

// ============================================================================
// Payload encoding
// ============================================================================

/// Encode raw bytes for a base64 payload field (`input-data`, `buf-b64`).
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload field (`out-data`, `err-data`, `buf-b64`).
pub fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text.as_bytes())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
