//! Reply framing for the guest agent socket.
//!
//! The agent writes one JSON object per reply with no length prefix, so a
//! message is complete exactly when the buffered bytes hold one whole JSON
//! value. Until then the framer keeps reading:
//!
//! - a UTF-8 sequence cut at the end of the buffer is waited out
//! - a JSON value that has not closed yet is waited out
//! - anything else (invalid UTF-8, a real syntax error) fails at once
//!
//! Each received byte is scanned once to track string and nesting state, and
//! the buffer is parsed only when the top-level value closes. Framing cost is
//! linear in the reply size. Bytes after the closing byte (including invalid
//! UTF-8) are not part of the reply and are discarded.
//!
//! The first read waits for the full reply timeout. Once bytes have arrived,
//! each further read uses the shorter follow-up timeout, so a peer that
//! stalls mid-message fails fast instead of holding the caller for another
//! full timeout.

use crate::error::{Error, Result};
use serde_json::Value;
use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Bytes requested per read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// A byte source whose read timeout can be adjusted between reads.
pub trait FrameSource: Read {
    /// Set the timeout applied to subsequent reads.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl FrameSource for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }
}

/// Splits a reply stream into JSON messages.
#[derive(Debug, Clone)]
pub struct MessageFramer {
    max_message_size: usize,
    followup_timeout: Duration,
    chunk_size: usize,
}

impl MessageFramer {
    /// Create a framer with the given buffer cap and follow-up timeout.
    pub fn new(max_message_size: usize, followup_timeout: Duration) -> Self {
        Self {
            max_message_size,
            followup_timeout,
            chunk_size: READ_CHUNK_SIZE,
        }
    }

    /// Override the read chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Largest reply this framer will buffer.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Read exactly one JSON message.
    ///
    /// `timeout` bounds the wait for the first chunk. The source's read
    /// timeout is reset to `timeout` before returning, on success and on
    /// every error path. Bytes following the message in the last chunk are
    /// discarded.
    pub fn receive_one<S: FrameSource>(&self, source: &mut S, timeout: Duration) -> Result<Value> {
        source
            .set_read_timeout(Some(timeout))
            .map_err(|e| Error::connection("set read timeout", e.to_string()))?;

        let result = self.read_message(source, timeout);

        if let Err(e) = source.set_read_timeout(Some(timeout)) {
            tracing::warn!(error = %e, "failed to reset socket read timeout");
        }

        result
    }

    fn read_message<S: FrameSource>(&self, source: &mut S, timeout: Duration) -> Result<Value> {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; self.chunk_size];
        let mut scanner = ValueScanner::default();
        let mut utf8_checked = 0;

        loop {
            let n = match source.read(&mut chunk) {
                Ok(0) => {
                    let reason = if buf.is_empty() {
                        "connection closed by guest agent".to_string()
                    } else {
                        format!(
                            "connection closed after {} bytes of an incomplete reply",
                            buf.len()
                        )
                    };
                    return Err(Error::connection("receive reply", reason));
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_timeout(&e) => {
                    return Err(if buf.is_empty() {
                        Error::connection(
                            "receive reply",
                            format!("no reply within {}", humantime::format_duration(timeout)),
                        )
                    } else {
                        Error::protocol(
                            "receive reply",
                            format!(
                                "incomplete reply: {} bytes received, nothing more within {}",
                                buf.len(),
                                humantime::format_duration(self.followup_timeout)
                            ),
                        )
                    });
                }
                Err(e) => return Err(Error::connection("receive reply", e.to_string())),
            };

            let first_chunk = buf.is_empty();
            buf.extend_from_slice(&chunk[..n]);

            let parsed = match scanner.advance(&buf) {
                Scan::Complete(end) => {
                    if end > self.max_message_size {
                        return Err(self.oversized());
                    }
                    match parse_complete(&buf[..end])? {
                        Some(found) => Some(found),
                        None => {
                            return Err(Error::protocol(
                                "parse reply",
                                "reply closed before its value was complete",
                            ))
                        }
                    }
                }
                Scan::Scalar => parse_complete(&buf)?,
                Scan::Pending => {
                    utf8_checked = check_utf8(&buf, utf8_checked)?;
                    None
                }
            };

            if let Some((value, consumed)) = parsed {
                if consumed > self.max_message_size {
                    return Err(self.oversized());
                }
                let rest = &buf[consumed..];
                if rest.iter().any(|b| !b.is_ascii_whitespace()) {
                    tracing::debug!(
                        discarded = rest.len(),
                        "discarding bytes after complete reply"
                    );
                }
                tracing::debug!(bytes = consumed, "received complete reply");
                return Ok(value);
            }

            if buf.len() > self.max_message_size {
                return Err(self.oversized());
            }

            if first_chunk {
                source
                    .set_read_timeout(Some(self.followup_timeout))
                    .map_err(|e| Error::connection("set read timeout", e.to_string()))?;
            }
        }
    }

    fn oversized(&self) -> Error {
        Error::protocol(
            "receive reply",
            format!(
                "reply exceeds {} bytes without forming a complete message",
                self.max_message_size
            ),
        )
    }
}

/// Where the scan of the first top-level value stands.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// The value has not closed yet.
    Pending,
    /// The value ends just before this offset.
    Complete(usize),
    /// The value is a bare number or literal, which has no closing byte.
    Scalar,
}

/// Incremental scan for the end of the first top-level JSON value.
///
/// Every byte is visited once across calls. Only ASCII bytes are
/// structural, and those never occur inside a multi-byte UTF-8 sequence,
/// so the scan works on raw bytes.
#[derive(Debug, Default)]
struct ValueScanner {
    scanned: usize,
    depth: usize,
    started: bool,
    scalar: bool,
    in_string: bool,
    escaped: bool,
}

impl ValueScanner {
    fn advance(&mut self, buf: &[u8]) -> Scan {
        if self.scalar {
            return Scan::Scalar;
        }

        while let Some(&byte) = buf.get(self.scanned) {
            self.scanned += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        return Scan::Complete(self.scanned);
                    }
                }
                continue;
            }

            match byte {
                b'"' => {
                    self.started = true;
                    self.in_string = true;
                }
                b'{' | b'[' => {
                    self.started = true;
                    self.depth += 1;
                }
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Scan::Complete(self.scanned);
                    }
                }
                b' ' | b'\t' | b'\n' | b'\r' => {}
                _ if !self.started => {
                    self.scalar = true;
                    return Scan::Scalar;
                }
                _ => {}
            }
        }

        Scan::Pending
    }
}

/// Parse the first JSON value in `buf`.
///
/// Returns the value and the number of bytes it used. `Ok(None)` means more
/// bytes are needed. Invalid UTF-8 is an error only when it falls inside
/// the value; after a complete value it is trailing garbage.
fn parse_complete(buf: &[u8]) -> Result<Option<(Value, usize)>> {
    let (text, invalid_at) = match std::str::from_utf8(buf) {
        Ok(text) => (text, None),
        Err(e) => {
            let valid = &buf[..e.valid_up_to()];
            let text = std::str::from_utf8(valid)
                .map_err(|inner| Error::encoding("reply", inner.to_string()))?;
            // error_len() is None for a sequence cut at the end of the buffer.
            (text, e.error_len().map(|_| e.valid_up_to()))
        }
    };

    match first_value(text)? {
        Some(found) => Ok(Some(found)),
        None => match invalid_at {
            Some(at) => Err(Error::encoding(
                "reply",
                format!("invalid utf-8 at byte {}", at),
            )),
            None => Ok(None),
        },
    }
}

fn first_value(text: &str) -> Result<Option<(Value, usize)>> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match values.next() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some((value, values.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(Error::protocol("parse reply", e.to_string())),
    }
}

/// Validate the bytes after `checked` and return the new validated offset.
fn check_utf8(buf: &[u8], checked: usize) -> Result<usize> {
    match std::str::from_utf8(&buf[checked..]) {
        Ok(_) => Ok(buf.len()),
        // Truncated multi-byte sequence at the end: wait for the rest.
        Err(e) if e.error_len().is_none() => Ok(checked + e.valid_up_to()),
        Err(e) => Err(Error::encoding(
            "reply",
            format!("invalid utf-8 at byte {}", checked + e.valid_up_to()),
        )),
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
