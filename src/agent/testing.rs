//! In-process fake guest agent for socket-level tests.
//!
//! The agent listens on a Unix socket in a temporary directory and plays a
//! fixed script: for each step it reads one newline-terminated request,
//! records it, and responds as the step says.

use crate::agent::Connection;
use crate::config::ClientConfig;
use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tempfile::TempDir;

/// Server-side socket timeout, so a broken test fails instead of hanging.
const SERVER_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// One scripted exchange.
pub(crate) struct Script {
    reply: Option<Vec<u8>>,
    chunk_size: Option<usize>,
    after: After,
}

enum After {
    /// Keep the connection for the next step.
    Continue,
    /// Keep the connection open without writing until the client hangs up.
    Stall,
    /// Close the connection.
    Close,
}

impl Script {
    /// Respond with a JSON value.
    pub(crate) fn reply(value: Value) -> Self {
        Self::raw(serde_json::to_vec(&value).expect("serialize scripted reply"))
    }

    /// Respond with raw bytes.
    pub(crate) fn raw(bytes: Vec<u8>) -> Self {
        Self {
            reply: Some(bytes),
            chunk_size: None,
            after: After::Continue,
        }
    }

    /// Respond with a JSON value written in small pieces.
    pub(crate) fn chunked(value: Value, chunk_size: usize) -> Self {
        Self {
            chunk_size: Some(chunk_size),
            ..Self::reply(value)
        }
    }

    /// Read the request and hang up without responding.
    pub(crate) fn close() -> Self {
        Self {
            reply: None,
            chunk_size: None,
            after: After::Close,
        }
    }

    /// Read the request and never respond.
    pub(crate) fn silent() -> Self {
        Self {
            reply: None,
            chunk_size: None,
            after: After::Stall,
        }
    }

    /// After responding, keep the socket open but send nothing more.
    pub(crate) fn then_stall(mut self) -> Self {
        self.after = After::Stall;
        self
    }
}

/// A scripted guest agent running on a background thread.
pub(crate) struct FakeAgent {
    _dir: TempDir,
    socket_path: PathBuf,
    handle: JoinHandle<Vec<Value>>,
}

impl FakeAgent {
    /// Bind a socket and start playing `script`.
    pub(crate) fn start(script: Vec<Script>) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let socket_path = dir.path().join("qga.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind fake agent socket");

        let handle = std::thread::spawn(move || serve(listener, script));

        Self {
            _dir: dir,
            socket_path,
            handle,
        }
    }

    /// Client settings pointing at this agent.
    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.socket_path)
    }

    /// A disconnected connection to this agent.
    pub(crate) fn connection(&self) -> Connection {
        Connection::from_config(&self.config())
    }

    /// A disconnected connection with adjusted settings.
    pub(crate) fn connection_with(&self, adjust: impl FnOnce(&mut ClientConfig)) -> Connection {
        let mut config = self.config();
        adjust(&mut config);
        Connection::from_config(&config)
    }

    /// Wait for the script to finish and return the requests received.
    pub(crate) fn finish(self) -> Vec<Value> {
        self.handle.join().expect("fake agent panicked")
    }
}

fn serve(listener: UnixListener, script: Vec<Script>) -> Vec<Value> {
    let mut requests = Vec::new();
    let mut conn: Option<BufReader<UnixStream>> = None;

    for step in script {
        if conn.is_none() {
            let (stream, _) = listener.accept().expect("accept client");
            stream
                .set_read_timeout(Some(SERVER_IO_TIMEOUT))
                .expect("set server timeout");
            conn = Some(BufReader::new(stream));
        }
        let reader = conn.as_mut().expect("client connected");

        let mut line = String::new();
        if reader.read_line(&mut line).expect("read request") == 0 {
            // Client hung up before using the rest of the script.
            break;
        }
        requests.push(serde_json::from_str(&line).expect("request is JSON"));

        if let Some(reply) = step.reply {
            let stream = reader.get_mut();
            match step.chunk_size {
                Some(size) => {
                    for piece in reply.chunks(size) {
                        stream.write_all(piece).expect("write reply piece");
                        stream.flush().expect("flush reply piece");
                        std::thread::sleep(Duration::from_millis(2));
                    }
                }
                None => stream.write_all(&reply).expect("write reply"),
            }
        }

        match step.after {
            After::Continue => {}
            After::Close => conn = None,
            After::Stall => {
                if let Some(mut reader) = conn.take() {
                    // Wait for the client to hang up.
                    let mut sink = Vec::new();
                    let _ = reader.read_to_end(&mut sink);
                }
            }
        }
    }

    requests
}
