//! Payloads for `guest-exec` and `guest-exec-status`.

use serde::{Deserialize, Serialize};

/// Arguments of `guest-exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestExec {
    /// Path of the program to run.
    pub path: String,
    /// Argument vector, not including the program itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg: Vec<String>,
    /// Environment as `KEY=VALUE` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Base64-encoded bytes fed to the process's stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<String>,
    /// Whether the agent should buffer stdout and stderr.
    #[serde(default)]
    pub capture_output: bool,
}

/// Reply of `guest-exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestExecPid {
    /// Guest-assigned process identifier.
    pub pid: i64,
}

/// Reply of `guest-exec-status`.
///
/// `exitcode` is only meaningful once `exited` is set and `signal` is absent.
/// The output fields are only populated when the process was started with
/// `capture-output` and has exited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestExecStatus {
    /// Whether the process has terminated.
    #[serde(default)]
    pub exited: bool,
    /// Process exit code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitcode: Option<i32>,
    /// Signal number that terminated the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    /// Base64-encoded stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_data: Option<String>,
    /// Base64-encoded stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_data: Option<String>,
    /// Set when the agent dropped stdout beyond its capture limit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub out_truncated: bool,
    /// Set when the agent dropped stderr beyond its capture limit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub err_truncated: bool,
}
