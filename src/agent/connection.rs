//! Guest agent socket connection.
//!
//! A [`Connection`] owns one Unix stream socket and speaks strict
//! request/reply lock-step over it:
//!
//! ```text
//! Disconnected --connect--> Connected --send--> Busy --reply--> Connected
//!       ^                                         |
//!       +---------- transport/framing error ------+
//! ```
//!
//! When a request fails in the transport or framing layer, the stream
//! position is unknown (a late reply may still be in flight), so the socket
//! is dropped rather than reused. A guest-reported error consumed a whole
//! reply and leaves the connection usable.

use crate::agent::framer::MessageFramer;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use qga_protocol::{encode_request, Arguments, Reply};
use serde_json::Value;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is open.
    Disconnected,
    /// Socket open, no request outstanding.
    Connected,
    /// A request has been written and its reply not yet read.
    Busy,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Busy => write!(f, "busy"),
        }
    }
}

/// A connection to the guest agent socket.
///
/// Every request needs `&mut self`; share a connection across threads only
/// behind a mutex. The socket is closed when the connection is dropped.
#[derive(Debug)]
pub struct Connection {
    socket_path: PathBuf,
    timeout: Duration,
    write_timeout: Duration,
    framer: MessageFramer,
    stream: Option<UnixStream>,
    state: ConnectionState,
}

impl Connection {
    /// Create a disconnected connection for the given socket with default settings.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self::from_config(&ClientConfig::new(socket_path))
    }

    /// Create a disconnected connection from a client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            timeout: config.timeout,
            write_timeout: config.write_timeout,
            framer: MessageFramer::new(config.max_message_size, config.followup_timeout),
            stream: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a socket is open and idle.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Path of the guest agent socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Reply timeout used by [`Connection::send_command`].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the socket.
    ///
    /// Does nothing if already connected.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the socket cannot be opened or its
    /// timeouts cannot be set. The partially opened socket is closed.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Busy => return Err(busy_error()),
            ConnectionState::Disconnected => {}
        }

        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::connection("connect", format!("{}: {}", self.socket_path.display(), e))
        })?;

        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| Error::connection("set read timeout", e.to_string()))?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| Error::connection("set write timeout", e.to_string()))?;

        tracing::info!(socket = %self.socket_path.display(), "connected to guest agent");

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Send a command and return its `return` value.
    ///
    /// Connects first if needed. `arguments` is left out of the request
    /// when `None` or empty.
    ///
    /// # Errors
    ///
    /// - connection error: the socket could not be opened, written or read
    /// - protocol error: the reply was malformed or oversized, or the guest
    ///   agent reported an error (see [`Error::remote_class`])
    pub fn send_command(&mut self, command: &str, arguments: Option<&Arguments>) -> Result<Value> {
        self.send_command_with_timeout(command, arguments, self.timeout)
    }

    /// Like [`Connection::send_command`], with a different reply timeout for
    /// this request only.
    pub fn send_command_with_timeout(
        &mut self,
        command: &str,
        arguments: Option<&Arguments>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.state == ConnectionState::Busy {
            return Err(busy_error());
        }
        self.connect()?;

        let request = encode_request(command, arguments)
            .map_err(|e| Error::protocol("encode request", e.to_string()))?;

        tracing::debug!(command, bytes = request.len(), "sending guest agent command");

        self.state = ConnectionState::Busy;
        let reply = match self.exchange(&request, timeout) {
            Ok(reply) => {
                self.state = ConnectionState::Connected;
                reply
            }
            Err(e) => {
                tracing::debug!(command, error = %e, "dropping connection after failed request");
                self.close();
                return Err(e);
            }
        };

        match Reply::from_value(reply) {
            Ok(Reply::Return(value)) => Ok(value),
            Ok(Reply::Error(desc)) => {
                tracing::debug!(
                    command,
                    class = %desc.class,
                    desc = %desc.desc,
                    "guest agent reported error"
                );
                Err(Error::remote(command, desc.class, desc.desc))
            }
            Err(e) => Err(Error::protocol("decode reply", e.to_string())),
        }
    }

    /// Write one request and read one reply.
    fn exchange(&mut self, request: &[u8], timeout: Duration) -> Result<Value> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::connection("send request", "not connected"))?;

        stream
            .write_all(request)
            .map_err(|e| Error::connection("send request", e.to_string()))?;

        self.framer.receive_one(stream, timeout)
    }

    /// Close the socket. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            tracing::info!(socket = %self.socket_path.display(), "disconnected from guest agent");
        }
        self.close();
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; the fd is released on drop either way.
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn busy_error() -> Error {
    Error::connection(
        "send request",
        "a previous request never completed; disconnect before reusing this connection",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{FakeAgent, Script};
    use crate::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_connect_missing_socket_is_connection_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut conn = Connection::new(dir.path().join("nope.sock"));

        let err = conn.connect().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("nope.sock"));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_lazy_connect_and_return_value() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"return": {"host-name": "vm1"}}))]);
        let mut conn = agent.connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let value = conn.send_command("guest-get-host-name", None).unwrap();
        assert_eq!(value, json!({"host-name": "vm1"}));
        assert!(conn.is_connected());

        let requests = agent.finish();
        assert_eq!(requests, vec![json!({"execute": "guest-get-host-name"})]);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"return": {}}))]);
        let mut conn = agent.connection();
        conn.connect().unwrap();
        conn.connect().unwrap();
        conn.send_command("guest-ping", None).unwrap();
        assert_eq!(agent.finish().len(), 1);
    }

    #[test]
    fn test_arguments_serialized_when_present() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"return": {}}))]);
        let mut conn = agent.connection();
        let mut args = Arguments::new();
        args.insert("mode".into(), json!("reboot"));

        conn.send_command("guest-shutdown", Some(&args)).unwrap();
        assert_eq!(
            agent.finish(),
            vec![json!({"execute": "guest-shutdown", "arguments": {"mode": "reboot"}})]
        );
    }

    #[test]
    fn test_remote_error_keeps_class_and_desc() {
        let agent = FakeAgent::start(vec![
            Script::reply(json!({"error": {"class": "CommandNotFound", "desc": "x"}})),
            Script::reply(json!({"return": {}})),
        ]);
        let mut conn = agent.connection();

        let err = conn.send_command("guest-bogus", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.remote_class(), Some("CommandNotFound"));
        assert_eq!(err.remote_desc(), Some("x"));

        // The whole reply was consumed, so the socket stays usable.
        assert!(conn.is_connected());
        conn.send_command("guest-ping", None).unwrap();
        assert_eq!(agent.finish().len(), 2);
    }

    #[test]
    fn test_reply_without_return_is_protocol_error() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"QMP": {}}))]);
        let mut conn = agent.connection();
        let err = conn.send_command("guest-ping", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.remote_class().is_none());
        agent.finish();
    }

    #[test]
    fn test_framing_failure_drops_socket_and_next_call_reconnects() {
        let agent = FakeAgent::start(vec![
            Script::raw(b"{\"return\": {\"pi".to_vec()).then_stall(),
            Script::reply(json!({"return": {"pid": 9}})),
        ]);
        let mut conn = agent.connection_with(|c| {
            c.followup_timeout = Duration::from_millis(50);
        });

        let err = conn.send_command("guest-exec", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let value = conn.send_command("guest-exec", None).unwrap();
        assert_eq!(value, json!({"pid": 9}));
        assert_eq!(agent.finish().len(), 2);
    }

    #[test]
    fn test_silent_agent_times_out_and_next_call_reconnects() {
        let agent = FakeAgent::start(vec![
            Script::silent(),
            Script::reply(json!({"return": {}})),
        ]);
        let mut conn = agent.connection_with(|c| {
            c.timeout = Duration::from_millis(200);
            c.followup_timeout = Duration::from_millis(50);
        });

        let err = conn.send_command("guest-sync", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("no reply within 200ms"));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.send_command("guest-ping", None).unwrap();
        let requests = agent.finish();
        assert_eq!(
            requests,
            vec![json!({"execute": "guest-sync"}), json!({"execute": "guest-ping"})]
        );
    }

    #[test]
    fn test_peer_close_is_connection_error() {
        let agent = FakeAgent::start(vec![Script::close()]);
        let mut conn = agent.connection();
        let err = conn.send_command("guest-ping", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        agent.finish();
    }

    #[test]
    fn test_disconnect_twice_is_noop() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"return": {}}))]);
        let mut conn = agent.connection();
        conn.send_command("guest-ping", None).unwrap();

        conn.disconnect();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        agent.finish();
    }

    #[test]
    fn test_busy_connection_refuses_requests() {
        let mut conn = Connection::new("/nonexistent/qga.sock");
        conn.state = ConnectionState::Busy;

        let err = conn.send_command("guest-ping", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("never completed"));

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
