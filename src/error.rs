//! Error types for qgactl.
//!
//! # Error Message Style Guide
//!
//! Messages follow the same shape everywhere:
//!
//! - **Format**: `"<operation> failed: <reason>"`
//! - **Case**: all lowercase
//! - **Context**: include the command name, pid or socket path when known
//!
//! ```text
//! "connection failed: connect: /tmp/qga.sock: No such file or directory"
//! "guest command failed: guest-exec: CommandNotFound: x"
//! "exec poll failed: pid 812 still running after 300 polls (30s)"
//! ```
//!
//! # Kinds
//!
//! Callers that need to branch on a failure use [`Error::kind`] rather than
//! matching variants. Context wrappers ([`Error::Exec`]) report the kind of
//! the error they wrap.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failure, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport failed: missing socket, refused, peer closed, no reply.
    Connection,
    /// The transport worked but the payload was malformed or oversized, or
    /// the guest agent reported an error.
    Protocol,
    /// A bounded poll loop ran out of attempts.
    Timeout,
    /// A base64 or text payload could not be decoded.
    Encoding,
    /// The caller stopped waiting (deadline or explicit cancel).
    Cancelled,
    /// Configuration could not be loaded or is invalid.
    Config,
    /// Local file or terminal I/O failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Protocol => write!(f, "protocol"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Encoding => write!(f, "encoding"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Io => write!(f, "io"),
        }
    }
}

/// Why an exec wait was abandoned before the poll budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cancel flag was raised.
    Requested,
    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "cancellation requested"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Result type alias using qgactl's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the guest agent.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure.
    #[error("connection failed: {operation}: {reason}")]
    Connection {
        /// What was being attempted (e.g., "connect", "receive reply").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Malformed, oversized or otherwise unusable reply.
    #[error("protocol check failed: {operation}: {reason}")]
    Protocol {
        /// What was being decoded or validated.
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The guest agent answered with an error descriptor.
    #[error("guest command failed: {command}: {class}: {desc}")]
    Remote {
        /// Command that was rejected.
        command: String,
        /// Error class reported by the agent, verbatim.
        class: String,
        /// Description reported by the agent, verbatim.
        desc: String,
    },

    /// The poll budget ran out before the guest process exited.
    ///
    /// The guest process is not killed and keeps running.
    #[error(
        "exec poll failed: pid {pid} still running after {attempts} polls ({}); guest process left running",
        format_waited(.waited)
    )]
    Timeout {
        /// Guest process identifier.
        pid: i64,
        /// Number of status polls issued.
        attempts: u32,
        /// Wall time spent waiting.
        waited: Duration,
    },

    /// A payload could not be decoded.
    #[error("payload decoding failed: {field}: {reason}")]
    Encoding {
        /// Field or stream being decoded (e.g., "out-data").
        field: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The caller stopped waiting for the guest process.
    ///
    /// The guest process is not killed and keeps running.
    #[error("exec wait failed: pid {pid}: {reason} after {attempts} polls; guest process left running")]
    Cancelled {
        /// Guest process identifier.
        pid: i64,
        /// Number of status polls issued.
        attempts: u32,
        /// Deadline or explicit cancel.
        reason: CancelReason,
    },

    /// Configuration operation failed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g., "read", "parse", "validate").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Local I/O error.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// An exec-session failure with the command and pid attached.
    #[error("exec of '{command}'{} failed: {source}", format_pid(.pid))]
    Exec {
        /// Command path as launched.
        command: String,
        /// Guest pid, when launch got that far.
        pid: Option<i64>,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },
}

fn format_pid(pid: &Option<i64>) -> String {
    pid.map(|p| format!(" (pid {})", p)).unwrap_or_default()
}

fn format_waited(waited: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*waited)
}

impl Error {
    /// Create a connection error.
    pub fn connection(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an error for a remote-reported failure.
    pub fn remote(
        command: impl Into<String>,
        class: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Self::Remote {
            command: command.into(),
            class: class.into(),
            desc: desc.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Attach exec context. Errors that already carry exec context are
    /// returned unchanged so the original pid and command survive.
    pub fn in_exec(self, command: impl Into<String>, pid: Option<i64>) -> Self {
        match self {
            Self::Exec { .. } => self,
            other => Self::Exec {
                command: command.into(),
                pid,
                source: Box::new(other),
            },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Protocol { .. } | Self::Remote { .. } => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Encoding { .. } => ErrorKind::Encoding,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Exec { source, .. } => source.kind(),
        }
    }

    /// Error class reported by the guest agent, if this is a remote error.
    pub fn remote_class(&self) -> Option<&str> {
        match self {
            Self::Remote { class, .. } => Some(class),
            Self::Exec { source, .. } => source.remote_class(),
            _ => None,
        }
    }

    /// Description reported by the guest agent, if this is a remote error.
    pub fn remote_desc(&self) -> Option<&str> {
        match self {
            Self::Remote { desc, .. } => Some(desc),
            Self::Exec { source, .. } => source.remote_desc(),
            _ => None,
        }
    }

    /// Guest pid associated with this error, if any.
    pub fn pid(&self) -> Option<i64> {
        match self {
            Self::Timeout { pid, .. } | Self::Cancelled { pid, .. } => Some(*pid),
            Self::Exec { pid, source, .. } => pid.or_else(|| source.pid()),
            _ => None,
        }
    }

    /// Number of status polls issued before the wait ended, if any.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Timeout { attempts, .. } | Self::Cancelled { attempts, .. } => Some(*attempts),
            Self::Exec { source, .. } => source.attempts(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_includes_operation_and_reason() {
        let err = Error::connection("connect", "/tmp/qga.sock: connection refused");
        let msg = err.to_string();
        assert!(msg.contains("connect"), "Error should include operation");
        assert!(msg.contains("/tmp/qga.sock"), "Error should include path");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_remote_error_is_protocol_kind_and_keeps_fields() {
        let err = Error::remote("guest-bogus", "CommandNotFound", "x");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.remote_class(), Some("CommandNotFound"));
        assert_eq!(err.remote_desc(), Some("x"));
        assert!(err.to_string().contains("guest-bogus"));
    }

    #[test]
    fn test_timeout_mentions_orphaned_process() {
        let err = Error::Timeout {
            pid: 812,
            attempts: 300,
            waited: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("812"));
        assert!(msg.contains("300 polls"));
        assert!(msg.contains("left running"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.attempts(), Some(300));
    }

    #[test]
    fn test_exec_context_preserves_kind() {
        let inner = Error::encoding("out-data", "invalid symbol");
        let err = inner.in_exec("/bin/ls", Some(7));
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.pid(), Some(7));

        let msg = err.to_string();
        assert!(msg.contains("/bin/ls"));
        assert!(msg.contains("pid 7"));
        assert!(msg.contains("out-data"));
    }

    #[test]
    fn test_exec_context_is_not_nested() {
        let err = Error::protocol("parse reply", "eof")
            .in_exec("/bin/true", Some(1))
            .in_exec("/bin/false", Some(2));
        assert_eq!(err.pid(), Some(1));
        assert!(err.to_string().contains("/bin/true"));
    }

    #[test]
    fn test_exec_context_reports_remote_class() {
        let err = Error::remote("guest-exec", "GenericError", "no such file").in_exec("/x", None);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.remote_class(), Some("GenericError"));
        assert!(!err.to_string().contains("pid"));
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        let err = Error::Cancelled {
            pid: 5,
            attempts: 2,
            reason: CancelReason::DeadlineExceeded,
        };
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_ne!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[test]
    fn test_all_errors_are_lowercase() {
        let errors: Vec<Error> = vec![
            Error::connection("op", "reason"),
            Error::protocol("op", "reason"),
            Error::remote("cmd", "Class", "desc"),
            Error::encoding("field", "reason"),
            Error::config("op", "reason"),
            Error::Timeout {
                pid: 1,
                attempts: 1,
                waited: Duration::from_millis(100),
            },
            Error::Cancelled {
                pid: 1,
                attempts: 0,
                reason: CancelReason::Requested,
            },
            Error::protocol("op", "reason").in_exec("/bin/sh", None),
            Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
        ];

        for err in errors {
            let msg = err.to_string();
            let first_char = msg.chars().next().unwrap();
            assert!(
                first_char.is_lowercase(),
                "Error message should start lowercase: {}",
                msg
            );
            assert!(
                msg.contains("failed"),
                "Error message should contain 'failed': {}",
                msg
            );
        }
    }
}
