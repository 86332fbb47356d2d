//! Asynchronous command execution in the guest.
//!
//! `guest-exec` starts a process and returns at once with its pid; the
//! result has to be collected by polling `guest-exec-status` until the agent
//! reports `exited`. [`ExecSession`] drives that loop:
//!
//! ```text
//! launch ──> poll ──┬──> exited ──> ExecResult
//!             ^     │
//!             └─────┤ running: sleep poll_interval
//!                   ├──> max_retries polls spent ──> Error::Timeout
//!                   └──> deadline / cancel ────────> Error::Cancelled
//! ```
//!
//! # Orphaned processes
//!
//! The protocol has no way to kill a process started with `guest-exec`.
//! When a wait ends in a timeout or cancellation, the guest process keeps
//! running and its captured output stays buffered in the agent until
//! someone polls the pid to completion. The error carries the pid so that
//! can still be done.

use crate::agent::connection::Connection;
use crate::config::{ClientConfig, DEFAULT_MAX_POLL_RETRIES, DEFAULT_POLL_INTERVAL};
use crate::error::{CancelReason, Error, Result};
use qga_protocol::{
    commands, decode_payload, encode_payload, to_arguments, Arguments, GuestExec, GuestExecPid,
    GuestExecStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Requests and handles
// ============================================================================

/// A command to run in the guest.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Program path.
    pub path: String,
    /// Arguments, not including the program itself.
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` strings.
    pub env: Vec<String>,
    /// Bytes fed to stdin.
    pub input: Option<Vec<u8>>,
}

impl ExecRequest {
    /// Create a request for `path` with the given arguments.
    pub fn new(path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
            ..Self::default()
        }
    }

    /// Create a request from a full argument vector (program first).
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (path, args) = argv
            .split_first()
            .ok_or_else(|| Error::protocol("build exec request", "no command specified"))?;
        Ok(Self::new(path.clone(), args.to_vec()))
    }

    /// Set stdin contents.
    pub fn with_input(mut self, input: Option<Vec<u8>>) -> Self {
        self.input = input;
        self
    }

    /// Set environment variables.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// The command line, for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.path.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn to_wire(&self) -> GuestExec {
        GuestExec {
            path: self.path.clone(),
            arg: self.args.clone(),
            env: self.env.clone(),
            input_data: self.input.as_deref().map(encode_payload),
            capture_output: true,
        }
    }
}

/// A process started in the guest.
///
/// Not `Clone`: polling consumes the handle and hands it back
/// only while the process is still running, so a pid whose final status has
/// been collected cannot be polled again.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ExecHandle {
    pid: i64,
    command: Option<String>,
}

impl ExecHandle {
    /// Adopt a pid started elsewhere (e.g., by an earlier `exec-async`).
    pub fn from_pid(pid: i64) -> Self {
        Self { pid, command: None }
    }

    /// Guest process identifier.
    pub fn pid(&self) -> i64 {
        self.pid
    }

    /// Command line the process was started with, if known.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    fn context(&self) -> String {
        self.command
            .clone()
            .unwrap_or_else(|| "guest process".to_string())
    }
}

/// Result of one status poll.
#[derive(Debug)]
pub enum PollOutcome {
    /// Still running; poll again with the returned handle.
    Running(ExecHandle),
    /// Terminal status. The handle is gone.
    Exited(ExecStatus),
}

/// Terminal status of a guest process, with output still base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStatus {
    /// Guest process identifier.
    pub pid: i64,
    /// Raw status as reported by the agent.
    pub raw: GuestExecStatus,
}

impl ExecStatus {
    /// Decode captured output.
    pub fn into_result(self) -> Result<ExecResult> {
        let stdout = decode_stream("out-data", self.raw.out_data.as_deref())?;
        let stderr = decode_stream("err-data", self.raw.err_data.as_deref())?;
        let signal = self.raw.signal;

        Ok(ExecResult {
            pid: self.pid,
            exit_code: if signal.is_some() {
                None
            } else {
                self.raw.exitcode
            },
            signal,
            stdout,
            stderr,
            stdout_truncated: self.raw.out_truncated,
            stderr_truncated: self.raw.err_truncated,
        })
    }
}

fn decode_stream(field: &str, data: Option<&str>) -> Result<ExecOutput> {
    match data {
        None => Ok(ExecOutput::default()),
        Some(text) => decode_payload(text)
            .map(ExecOutput::from_bytes)
            .map_err(|e| Error::encoding(field, e.to_string())),
    }
}

// ============================================================================
// Results
// ============================================================================

/// Captured output of a guest process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutput {
    /// Valid UTF-8.
    Text(String),
    /// Anything else, kept byte for byte.
    Binary(Vec<u8>),
}

impl Default for ExecOutput {
    fn default() -> Self {
        ExecOutput::Text(String::new())
    }
}

impl ExecOutput {
    /// Interpret bytes as text, keeping them raw if they are not UTF-8.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => ExecOutput::Text(text),
            Err(e) => ExecOutput::Binary(e.into_bytes()),
        }
    }

    /// The output bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ExecOutput::Text(text) => text.as_bytes(),
            ExecOutput::Binary(bytes) => bytes,
        }
    }

    /// The output as text, if it was valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ExecOutput::Text(text) => Some(text.as_str()),
            ExecOutput::Binary(_) => None,
        }
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl std::fmt::Display for ExecOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Outcome of a guest process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Guest process identifier.
    pub pid: i64,
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Signal that terminated the process.
    pub signal: Option<i32>,
    /// Captured stdout.
    pub stdout: ExecOutput,
    /// Captured stderr.
    pub stderr: ExecOutput,
    /// The agent dropped stdout beyond its capture limit.
    pub stdout_truncated: bool,
    /// The agent dropped stderr beyond its capture limit.
    pub stderr_truncated: bool,
}

impl ExecResult {
    /// Whether the process was terminated by a signal.
    pub fn signaled(&self) -> bool {
        self.signal.is_some()
    }

    /// Whether the process exited normally with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ============================================================================
// Polling policy and cancellation
// ============================================================================

/// How often and how long to poll for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause after each poll that finds the process still running.
    pub interval: Duration,
    /// Number of polls before giving up.
    pub max_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_POLL_RETRIES,
        }
    }
}

impl PollPolicy {
    /// Create a policy.
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Policy from client settings.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.poll_interval, config.max_poll_retries)
    }

    /// Upper bound on the time spent sleeping between polls.
    pub fn worst_case(&self) -> Duration {
        self.interval.saturating_mul(self.max_retries)
    }
}

/// Lets a caller stop waiting for a guest process.
///
/// Clones share the same flag, so one clone can be handed to a signal
/// handler or another thread while the wait runs. Cancelling only ends the
/// wait; the guest process is not killed.
#[derive(Debug, Clone, Default)]
pub struct ExecCancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ExecCancel {
    /// A token that never fires unless [`ExecCancel::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also fire once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Also fire once `timeout` has elapsed from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            return Some(CancelReason::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Sleep for `interval`, cut short at the deadline.
    fn sleep(&self, interval: Duration) {
        let pause = match self.deadline {
            Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
            None => interval,
        };
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Runs commands in the guest over a borrowed [`Connection`].
pub struct ExecSession<'a> {
    connection: &'a mut Connection,
    policy: PollPolicy,
}

impl<'a> ExecSession<'a> {
    /// Create a session with the default poll policy.
    pub fn new(connection: &'a mut Connection) -> Self {
        Self {
            connection,
            policy: PollPolicy::default(),
        }
    }

    /// Set the poll policy used by [`ExecSession::run`].
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start a process and return its handle.
    ///
    /// Output is always captured so it can be collected by polling.
    ///
    /// # Errors
    ///
    /// Fails with a protocol error if the agent rejects the command or the
    /// reply carries no pid.
    pub fn launch(&mut self, request: &ExecRequest) -> Result<ExecHandle> {
        let command = request.display();
        let arguments = to_arguments(&request.to_wire())
            .map_err(|e| Error::protocol("encode guest-exec", e.to_string()).in_exec(&command, None))?;

        let value = self
            .connection
            .send_command(commands::EXEC, Some(&arguments))
            .map_err(|e| e.in_exec(&command, None))?;

        let reply: GuestExecPid = serde_json::from_value(value).map_err(|e| {
            Error::protocol("decode guest-exec reply", format!("no pid in reply: {}", e))
                .in_exec(&command, None)
        })?;

        tracing::info!(pid = reply.pid, command = %command, "launched guest process");

        Ok(ExecHandle {
            pid: reply.pid,
            command: Some(command),
        })
    }

    /// Query a process once.
    ///
    /// Some agent versions free a process's resources on the first read
    /// after it exits, so an [`PollOutcome::Exited`] status is final.
    pub fn poll(&mut self, handle: ExecHandle) -> Result<PollOutcome> {
        let mut arguments = Arguments::new();
        arguments.insert("pid".into(), handle.pid.into());

        let value = self
            .connection
            .send_command(commands::EXEC_STATUS, Some(&arguments))
            .map_err(|e| e.in_exec(handle.context(), Some(handle.pid)))?;

        let raw: GuestExecStatus = serde_json::from_value(value).map_err(|e| {
            Error::protocol("decode guest-exec-status reply", e.to_string())
                .in_exec(handle.context(), Some(handle.pid))
        })?;

        if raw.exited {
            Ok(PollOutcome::Exited(ExecStatus {
                pid: handle.pid,
                raw,
            }))
        } else {
            Ok(PollOutcome::Running(handle))
        }
    }

    /// Poll until the process exits, the poll budget runs out, or `cancel`
    /// fires.
    ///
    /// The first poll happens immediately. After each poll that finds the
    /// process running the session sleeps `policy.interval`, so the wait is
    /// bounded by `policy.worst_case()` plus request round trips.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] after exactly `policy.max_retries` polls
    /// - [`Error::Cancelled`] when `cancel` fires first
    /// - any error from [`ExecSession::poll`] or output decoding
    ///
    /// In the first two cases the guest process is left running.
    pub fn run_to_completion(
        &mut self,
        handle: ExecHandle,
        policy: PollPolicy,
        cancel: &ExecCancel,
    ) -> Result<ExecResult> {
        let pid = handle.pid;
        let context = handle.context();
        let started = Instant::now();
        let mut handle = handle;
        let mut attempts: u32 = 0;

        loop {
            if let Some(reason) = cancel.check() {
                tracing::warn!(pid, attempts, %reason, "stopped waiting for guest process; it keeps running");
                return Err(Error::Cancelled {
                    pid,
                    attempts,
                    reason,
                }
                .in_exec(context, Some(pid)));
            }

            if attempts >= policy.max_retries {
                let waited = started.elapsed();
                tracing::warn!(
                    pid,
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    "guest process still running after poll budget; it keeps running"
                );
                return Err(Error::Timeout {
                    pid,
                    attempts,
                    waited,
                }
                .in_exec(context, Some(pid)));
            }

            attempts += 1;
            handle = match self.poll(handle)? {
                PollOutcome::Exited(status) => {
                    let result = status.into_result().map_err(|e| e.in_exec(&context, Some(pid)))?;
                    if result.stdout_truncated || result.stderr_truncated {
                        tracing::warn!(
                            pid,
                            stdout_truncated = result.stdout_truncated,
                            stderr_truncated = result.stderr_truncated,
                            "guest agent truncated captured output"
                        );
                    }
                    tracing::info!(
                        pid,
                        attempts,
                        exit_code = ?result.exit_code,
                        signal = ?result.signal,
                        "guest process exited"
                    );
                    return Ok(result);
                }
                PollOutcome::Running(handle) => handle,
            };

            cancel.sleep(policy.interval);
        }
    }

    /// Launch a process and wait for it with the session's poll policy.
    pub fn run(&mut self, request: &ExecRequest, cancel: &ExecCancel) -> Result<ExecResult> {
        let handle = self.launch(request)?;
        let policy = self.policy;
        self.run_to_completion(handle, policy, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{FakeAgent, Script};
    use crate::ErrorKind;
    use serde_json::{json, Value};

    fn launched(pid: i64) -> Script {
        Script::reply(json!({"return": {"pid": pid}}))
    }

    fn running() -> Script {
        Script::reply(json!({"return": {"exited": false}}))
    }

    fn exited(code: i32, stdout: &[u8], stderr: &[u8]) -> Script {
        let mut status = json!({"exited": true, "exitcode": code});
        if !stdout.is_empty() {
            status["out-data"] = json!(encode_payload(stdout));
        }
        if !stderr.is_empty() {
            status["err-data"] = json!(encode_payload(stderr));
        }
        Script::reply(json!({ "return": status }))
    }

    fn status_requests(requests: &[Value]) -> usize {
        requests
            .iter()
            .filter(|r| r["execute"] == "guest-exec-status")
            .count()
    }

    #[test]
    fn test_launch_sends_exec_arguments() {
        let agent = FakeAgent::start(vec![launched(42)]);
        let mut conn = agent.connection();
        let mut session = ExecSession::new(&mut conn);

        let request = ExecRequest::new("/bin/cat", vec!["-".into()])
            .with_input(Some(b"hello".to_vec()))
            .with_env(vec!["LANG=C".into()]);
        let handle = session.launch(&request).unwrap();
        assert_eq!(handle.pid(), 42);
        assert_eq!(handle.command(), Some("/bin/cat -"));

        let requests = agent.finish();
        assert_eq!(
            requests[0],
            json!({
                "execute": "guest-exec",
                "arguments": {
                    "path": "/bin/cat",
                    "arg": ["-"],
                    "env": ["LANG=C"],
                    "input-data": "aGVsbG8=",
                    "capture-output": true
                }
            })
        );
    }

    #[test]
    fn test_launch_without_pid_is_protocol_error() {
        let agent = FakeAgent::start(vec![Script::reply(json!({"return": {}}))]);
        let mut conn = agent.connection();
        let err = ExecSession::new(&mut conn)
            .launch(&ExecRequest::new("/bin/true", vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("/bin/true"));
        agent.finish();
    }

    #[test]
    fn test_launch_remote_error_keeps_class() {
        let agent = FakeAgent::start(vec![Script::reply(json!({
            "error": {"class": "GenericError", "desc": "Failed to execute child process"}
        }))]);
        let mut conn = agent.connection();
        let err = ExecSession::new(&mut conn)
            .launch(&ExecRequest::new("/nope", vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.remote_class(), Some("GenericError"));
        assert!(err.pid().is_none());
        agent.finish();
    }

    #[test]
    fn test_poll_hands_back_running_handle() {
        let agent = FakeAgent::start(vec![running(), exited(0, b"", b"")]);
        let mut conn = agent.connection();
        let mut session = ExecSession::new(&mut conn);

        let handle = match session.poll(ExecHandle::from_pid(7)).unwrap() {
            PollOutcome::Running(handle) => handle,
            other => panic!("expected running, got {:?}", other),
        };
        assert_eq!(handle.pid(), 7);

        let PollOutcome::Exited(status) = session.poll(handle).unwrap() else {
            panic!("expected exited");
        };
        assert_eq!(status.pid, 7);
        assert_eq!(status.raw.exitcode, Some(0));

        let requests = agent.finish();
        assert_eq!(
            requests[0],
            json!({"execute": "guest-exec-status", "arguments": {"pid": 7}})
        );
    }

    #[test]
    fn test_immediate_exit_returns_without_sleeping() {
        let agent = FakeAgent::start(vec![launched(3), exited(0, b"hello\n", b"")]);
        let mut conn = agent.connection();
        // An interval this long would blow the assertion below if slept once.
        let policy = PollPolicy::new(Duration::from_secs(30), 300);
        let mut session = ExecSession::new(&mut conn).with_policy(policy);

        let started = Instant::now();
        let result = session
            .run(&ExecRequest::new("/bin/echo", vec!["hello".into()]), &ExecCancel::new())
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.signaled());
        assert_eq!(result.stdout, ExecOutput::Text("hello\n".into()));
        assert_eq!(result.stderr, ExecOutput::Text(String::new()));
        assert!(result.success());
        assert_eq!(status_requests(&agent.finish()), 1);
    }

    #[test]
    fn test_polls_until_exit() {
        let agent = FakeAgent::start(vec![
            launched(11),
            running(),
            running(),
            exited(2, b"", b"oops"),
        ]);
        let mut conn = agent.connection();
        let policy = PollPolicy::new(Duration::from_millis(1), 10);
        let mut session = ExecSession::new(&mut conn).with_policy(policy);

        let result = session
            .run(&ExecRequest::new("/bin/false", vec![]), &ExecCancel::new())
            .unwrap();
        assert_eq!(result.pid, 11);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.stderr.to_string(), "oops");
        assert!(!result.success());
        assert_eq!(status_requests(&agent.finish()), 3);
    }

    #[test]
    fn test_never_exiting_process_times_out_after_exact_budget() {
        const MAX_RETRIES: u32 = 5;
        let mut script = vec![launched(99)];
        script.extend((0..MAX_RETRIES).map(|_| running()));
        let agent = FakeAgent::start(script);

        let mut conn = agent.connection();
        let interval = Duration::from_millis(10);
        let policy = PollPolicy::new(interval, MAX_RETRIES);
        let mut session = ExecSession::new(&mut conn).with_policy(policy);

        let started = Instant::now();
        let err = session
            .run(&ExecRequest::new("/bin/sleep", vec!["inf".into()]), &ExecCancel::new())
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.pid(), Some(99));
        assert_eq!(err.attempts(), Some(MAX_RETRIES));
        assert!(err.to_string().contains("left running"));
        assert!(elapsed >= interval * MAX_RETRIES);
        assert!(elapsed < Duration::from_secs(5));

        // No kill or extra poll is sent after giving up.
        let requests = agent.finish();
        assert_eq!(status_requests(&requests), MAX_RETRIES as usize);
        assert_eq!(requests.len(), 1 + MAX_RETRIES as usize);
    }

    #[test]
    fn test_cancel_flag_stops_wait_without_polling() {
        let agent = FakeAgent::start(vec![launched(5)]);
        let mut conn = agent.connection();
        let mut session = ExecSession::new(&mut conn);

        let handle = session.launch(&ExecRequest::new("/bin/sleep", vec![])).unwrap();
        let cancel = ExecCancel::new();
        cancel.clone().cancel();

        let err = session
            .run_to_completion(handle, PollPolicy::default(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.pid(), Some(5));
        assert_eq!(status_requests(&agent.finish()), 0);
    }

    #[test]
    fn test_deadline_is_distinct_from_retry_budget() {
        let mut script = vec![launched(6)];
        script.extend((0..3).map(|_| running()));
        let agent = FakeAgent::start(script);
        let mut conn = agent.connection();
        let mut session = ExecSession::new(&mut conn);

        let handle = session.launch(&ExecRequest::new("/bin/sleep", vec![])).unwrap();
        // Budget is huge; the deadline lands before a fourth poll can start.
        let policy = PollPolicy::new(Duration::from_millis(50), 1000);
        let cancel = ExecCancel::new().with_timeout(Duration::from_millis(125));

        let err = session.run_to_completion(handle, policy, &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.to_string().contains("deadline exceeded"));
        let attempts = err.attempts().unwrap();
        assert!((1..=3).contains(&attempts), "attempts = {}", attempts);

        drop(conn);
        assert_eq!(status_requests(&agent.finish()), attempts as usize);
    }

    #[test]
    fn test_binary_output_falls_back_to_bytes() {
        let raw = vec![0u8, 159, 146, 150, 0, b'x', 0xff];
        let agent = FakeAgent::start(vec![launched(8), exited(0, &raw, b"")]);
        let mut conn = agent.connection();
        let mut session = ExecSession::new(&mut conn);

        let result = session
            .run(&ExecRequest::new("/bin/head", vec![]), &ExecCancel::new())
            .unwrap();
        assert_eq!(result.stdout, ExecOutput::Binary(raw.clone()));
        assert_eq!(result.stdout.as_bytes(), raw.as_slice());
        assert!(result.stdout.as_text().is_none());
        agent.finish();
    }

    #[test]
    fn test_nul_bytes_survive_as_text() {
        let raw = b"a\0b\0".to_vec();
        let output = ExecOutput::from_bytes(
            decode_payload(&encode_payload(&raw)).unwrap(),
        );
        assert_eq!(output.as_text(), Some("a\0b\0"));
        assert_eq!(output.as_bytes(), raw.as_slice());
    }

    #[test]
    fn test_bad_base64_is_encoding_error_with_pid() {
        let agent = FakeAgent::start(vec![
            launched(12),
            Script::reply(json!({"return": {"exited": true, "exitcode": 0, "out-data": "%%%"}})),
        ]);
        let mut conn = agent.connection();
        let err = ExecSession::new(&mut conn)
            .run(&ExecRequest::new("/bin/true", vec![]), &ExecCancel::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(err.pid(), Some(12));
        assert!(err.to_string().contains("out-data"));
        agent.finish();
    }

    #[test]
    fn test_signaled_process_has_no_exit_code() {
        let agent = FakeAgent::start(vec![
            launched(13),
            Script::reply(json!({"return": {"exited": true, "exitcode": 0, "signal": 9}})),
        ]);
        let mut conn = agent.connection();
        let result = ExecSession::new(&mut conn)
            .run(&ExecRequest::new("/bin/sleep", vec![]), &ExecCancel::new())
            .unwrap();
        assert!(result.signaled());
        assert_eq!(result.signal, Some(9));
        assert_eq!(result.exit_code, None);
        agent.finish();
    }

    #[test]
    fn test_large_status_delivered_in_pieces() {
        let stdout = "line of output\n".repeat(2000);
        let status = json!({"return": {
            "exited": true,
            "exitcode": 0,
            "out-data": encode_payload(stdout.as_bytes())
        }});
        let agent = FakeAgent::start(vec![launched(14), Script::chunked(status, 1500)]);
        let mut conn = agent.connection();
        let result = ExecSession::new(&mut conn)
            .run(&ExecRequest::new("/bin/yes", vec![]), &ExecCancel::new())
            .unwrap();
        assert_eq!(result.stdout.as_text(), Some(stdout.as_str()));
        agent.finish();
    }

    #[test]
    fn test_from_argv_requires_command() {
        assert!(ExecRequest::from_argv(&[]).is_err());
        let req = ExecRequest::from_argv(&["ls".into(), "-la".into()]).unwrap();
        assert_eq!(req.path, "ls");
        assert_eq!(req.args, vec!["-la".to_string()]);
        assert_eq!(req.display(), "ls -la");
    }

    #[test]
    fn test_default_policy_caps_wait_at_thirty_seconds() {
        assert_eq!(PollPolicy::default().worst_case(), Duration::from_secs(30));
    }
}
