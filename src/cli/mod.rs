//! CLI command implementations.

pub mod exec;
pub mod file;
pub mod guest;
pub mod parsers;

use clap::Args;
use qgactl::agent::GuestAgent;
use qgactl::config::ClientConfig;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Path to the guest agent Unix socket [default: /tmp/qga.sock, or $QGA_SOCKET]
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Reply timeout (e.g., "30s", "500ms", or plain seconds)
    #[arg(short, long, global = true, value_parser = parsers::parse_timeout)]
    pub timeout: Option<Duration>,

    /// Print results as JSON
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Read settings from this file instead of the default config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Resolved settings for one invocation.
pub struct Context {
    /// Client settings after file, environment and flags.
    pub config: ClientConfig,
    /// Print JSON instead of text.
    pub json: bool,
}

impl GlobalOpts {
    /// Merge defaults, config file, environment and flags.
    pub fn resolve(&self) -> qgactl::Result<Context> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = ClientConfig::load_from(path)?;
                config.apply_env();
                config
            }
            None => ClientConfig::load()?,
        };

        if let Some(socket) = &self.socket {
            config.socket_path = socket.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
            // Keep the follow-up wait inside a short main timeout.
            config.followup_timeout = config.followup_timeout.min(timeout / 2);
        }
        config.validate()?;

        tracing::debug!(
            socket = %config.socket_path.display(),
            timeout = %humantime::format_duration(config.timeout),
            "resolved client settings"
        );

        Ok(Context {
            config,
            json: self.json,
        })
    }
}

impl Context {
    /// A client for the configured socket.
    pub fn agent(&self) -> GuestAgent {
        GuestAgent::new(&self.config)
    }
}

// ============================================================================
// Display Helpers
// ============================================================================

/// Placeholder for fields the guest did not report.
pub const NOT_AVAILABLE: &str = "N/A";

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> qgactl::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| qgactl::Error::protocol("format json", e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// Show an optional field, or "N/A".
pub fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or(NOT_AVAILABLE)
}

/// Flush stdout and stderr, ignoring errors.
///
/// Used before `std::process::exit`, which skips buffered writers.
pub fn flush_output() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
