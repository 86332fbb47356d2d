//! Typed guest agent commands.
//!
//! [`GuestAgent`] wraps a [`Connection`] and turns the generic
//! `send_command` primitive into one method per guest agent command.

use crate::agent::connection::Connection;
use crate::agent::exec::{
    ExecCancel, ExecHandle, ExecRequest, ExecResult, ExecSession, PollOutcome, PollPolicy,
};
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use qga_protocol::guest::{
    GuestFileRead, GuestFileWrite, GuestFilesystem, GuestHostName, GuestInfo,
    GuestNetworkInterface, GuestOsInfo, GuestTimezone, GuestUser, ShutdownMode,
};
use qga_protocol::{commands, decode_payload, encode_payload, Arguments};
use serde_json::Value;
use std::time::Duration;

/// Bytes requested per `guest-file-read` and sent per `guest-file-write`.
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Reply timeout for `guest-shutdown` (5 seconds).
/// The agent usually tears the channel down instead of replying, so there is
/// no point waiting the full request timeout.
const SHUTDOWN_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Reply helpers
// ============================================================================

/// Decode a `return` value into a typed reply.
fn expect_data<T: serde::de::DeserializeOwned>(value: Value, command: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("decode {} reply", command), e.to_string()))
}

/// Decode a `guest-file-open` handle.
fn expect_handle(value: Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        Error::protocol(
            format!("decode {} reply", commands::FILE_OPEN),
            format!("expected integer handle, got {}", value),
        )
    })
}

/// A guest agent client.
pub struct GuestAgent {
    connection: Connection,
    policy: PollPolicy,
}

impl GuestAgent {
    /// Create a client from settings. Nothing is opened until the first request.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            connection: Connection::from_config(config),
            policy: PollPolicy::from_config(config),
        }
    }

    /// Wrap an existing connection with the default poll policy.
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection,
            policy: PollPolicy::default(),
        }
    }

    /// Set the exec poll policy.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Close the socket.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    /// Send any command and return its raw `return` value.
    pub fn command(&mut self, name: &str, arguments: Option<&Arguments>) -> Result<Value> {
        self.connection.send_command(name, arguments)
    }

    // ========================================================================
    // Information
    // ========================================================================

    /// Check that the agent is alive.
    pub fn ping(&mut self) -> Result<()> {
        self.connection.send_command(commands::PING, None)?;
        Ok(())
    }

    /// Agent version and supported commands.
    pub fn info(&mut self) -> Result<GuestInfo> {
        let value = self.connection.send_command(commands::INFO, None)?;
        expect_data(value, commands::INFO)
    }

    /// Guest operating system identification.
    pub fn os_info(&mut self) -> Result<GuestOsInfo> {
        let value = self.connection.send_command(commands::GET_OSINFO, None)?;
        expect_data(value, commands::GET_OSINFO)
    }

    /// Guest host name.
    pub fn host_name(&mut self) -> Result<String> {
        let value = self.connection.send_command(commands::GET_HOST_NAME, None)?;
        let reply: GuestHostName = expect_data(value, commands::GET_HOST_NAME)?;
        Ok(reply.host_name)
    }

    /// Users currently logged in.
    pub fn users(&mut self) -> Result<Vec<GuestUser>> {
        let value = self.connection.send_command(commands::GET_USERS, None)?;
        expect_data(value, commands::GET_USERS)
    }

    /// Guest timezone.
    pub fn timezone(&mut self) -> Result<GuestTimezone> {
        let value = self.connection.send_command(commands::GET_TIMEZONE, None)?;
        expect_data(value, commands::GET_TIMEZONE)
    }

    /// Network interfaces and their addresses.
    pub fn network_interfaces(&mut self) -> Result<Vec<GuestNetworkInterface>> {
        let value = self
            .connection
            .send_command(commands::NETWORK_GET_INTERFACES, None)?;
        expect_data(value, commands::NETWORK_GET_INTERFACES)
    }

    /// Mounted filesystems.
    pub fn fs_info(&mut self) -> Result<Vec<GuestFilesystem>> {
        let value = self.connection.send_command(commands::GET_FSINFO, None)?;
        expect_data(value, commands::GET_FSINFO)
    }

    // ========================================================================
    // File I/O
    // ========================================================================

    /// Open a file in the guest. `mode` follows `fopen` (default "r").
    pub fn file_open(&mut self, path: &str, mode: Option<&str>) -> Result<i64> {
        let mut arguments = Arguments::new();
        arguments.insert("path".into(), path.into());
        if let Some(mode) = mode {
            arguments.insert("mode".into(), mode.into());
        }
        let value = self
            .connection
            .send_command(commands::FILE_OPEN, Some(&arguments))?;
        let handle = expect_handle(value)?;
        tracing::debug!(path, handle, "opened guest file");
        Ok(handle)
    }

    /// Read up to `count` bytes. Returns the data and whether EOF was reached.
    pub fn file_read(&mut self, handle: i64, count: usize) -> Result<(Vec<u8>, bool)> {
        let mut arguments = Arguments::new();
        arguments.insert("handle".into(), handle.into());
        arguments.insert("count".into(), count.into());
        let value = self
            .connection
            .send_command(commands::FILE_READ, Some(&arguments))?;
        let reply: GuestFileRead = expect_data(value, commands::FILE_READ)?;
        let data = decode_payload(&reply.buf_b64)
            .map_err(|e| Error::encoding("buf-b64", e.to_string()))?;
        Ok((data, reply.eof))
    }

    /// Write bytes to an open file. Returns the number of bytes written.
    pub fn file_write(&mut self, handle: i64, data: &[u8]) -> Result<u64> {
        let mut arguments = Arguments::new();
        arguments.insert("handle".into(), handle.into());
        arguments.insert("buf-b64".into(), encode_payload(data).into());
        let value = self
            .connection
            .send_command(commands::FILE_WRITE, Some(&arguments))?;
        let reply: GuestFileWrite = expect_data(value, commands::FILE_WRITE)?;
        Ok(reply.count)
    }

    /// Close an open file.
    pub fn file_close(&mut self, handle: i64) -> Result<()> {
        let mut arguments = Arguments::new();
        arguments.insert("handle".into(), handle.into());
        self.connection
            .send_command(commands::FILE_CLOSE, Some(&arguments))?;
        Ok(())
    }

    /// Read a whole file from the guest.
    ///
    /// The guest handle is closed whether or not the read succeeds.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let handle = self.file_open(path, Some("r"))?;
        let result = self.read_to_end(handle);
        self.finish_file(handle, result)
    }

    fn read_to_end(&mut self, handle: i64) -> Result<Vec<u8>> {
        let mut contents = Vec::new();
        loop {
            let (chunk, eof) = self.file_read(handle, FILE_CHUNK_SIZE)?;
            let done = eof || chunk.is_empty();
            contents.extend_from_slice(&chunk);
            if done {
                return Ok(contents);
            }
        }
    }

    /// Write `data` to a guest file, truncating it first.
    ///
    /// The guest handle is closed whether or not the write succeeds.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let handle = self.file_open(path, Some("w"))?;
        let result = self.write_all(handle, data);
        self.finish_file(handle, result)
    }

    fn write_all(&mut self, handle: i64, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(FILE_CHUNK_SIZE) {
            let written = self.file_write(handle, chunk)?;
            if written != chunk.len() as u64 {
                return Err(Error::protocol(
                    commands::FILE_WRITE,
                    format!("short write: {} of {} bytes", written, chunk.len()),
                ));
            }
        }
        Ok(())
    }

    /// Close `handle`, preferring the operation's error over the close error.
    fn finish_file<T>(&mut self, handle: i64, result: Result<T>) -> Result<T> {
        let closed = self.file_close(handle);
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                tracing::warn!(handle, error = %close_err, "failed to close guest file");
                Err(e)
            }
        }
    }

    // ========================================================================
    // Power
    // ========================================================================

    /// Ask the guest to shut down.
    ///
    /// The agent normally goes away without replying, so once the request
    /// has been written a connection-level failure counts as success. The
    /// connection is left disconnected.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> Result<()> {
        // Connect separately so an unreachable agent is still reported.
        self.connection.connect()?;

        let mut arguments = Arguments::new();
        arguments.insert("mode".into(), mode.to_string().into());

        let timeout = SHUTDOWN_REPLY_TIMEOUT.min(self.connection.timeout());
        match self
            .connection
            .send_command_with_timeout(commands::SHUTDOWN, Some(&arguments), timeout)
        {
            Ok(_) => {
                tracing::debug!(%mode, "guest agent acknowledged shutdown");
            }
            Err(e) if e.kind() == ErrorKind::Connection => {
                tracing::debug!(%mode, error = %e, "no shutdown reply (channel closed)");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(%mode, "guest shutdown requested");
        self.connection.disconnect();
        Ok(())
    }

    // ========================================================================
    // Exec
    // ========================================================================

    /// Start a command and return without waiting.
    pub fn exec(&mut self, request: &ExecRequest) -> Result<ExecHandle> {
        ExecSession::new(&mut self.connection).launch(request)
    }

    /// Query a process once.
    pub fn exec_status(&mut self, handle: ExecHandle) -> Result<PollOutcome> {
        ExecSession::new(&mut self.connection).poll(handle)
    }

    /// Run a command and wait for it to finish.
    pub fn run(&mut self, request: &ExecRequest, cancel: &ExecCancel) -> Result<ExecResult> {
        ExecSession::new(&mut self.connection)
            .with_policy(self.policy)
            .run(request, cancel)
    }
}
