//! Guest command execution.
//!
//! - exec: run a command and wait for it, exiting with its exit code
//! - exec-async: start a command and print its pid
//! - exec-status: query a pid started earlier

use crate::cli::parsers::{parse_duration, parse_env_spec, read_input};
use crate::cli::{flush_output, print_json, Context};
use clap::Args;
use qga_protocol::encode_payload;
use qgactl::agent::{ExecCancel, ExecHandle, ExecOutput, ExecRequest, ExecResult, PollOutcome};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Exit status reported for a guest process killed by a signal, shell style.
fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

/// Process exit code for a finished guest command.
fn exit_code_of(result: &ExecResult) -> i32 {
    match (result.exit_code, result.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => signal_exit_code(signal),
        (None, None) => 1,
    }
}

fn output_json(output: &ExecOutput) -> Value {
    match output {
        ExecOutput::Text(text) => json!(text),
        ExecOutput::Binary(bytes) => json!({ "base64": encode_payload(bytes) }),
    }
}

fn result_json(result: &ExecResult) -> Value {
    json!({
        "pid": result.pid,
        "exitcode": result.exit_code,
        "signal": result.signal,
        "stdout": output_json(&result.stdout),
        "stderr": output_json(&result.stderr),
        "stdout-truncated": result.stdout_truncated,
        "stderr-truncated": result.stderr_truncated,
    })
}

/// Write captured output byte for byte.
fn print_result(result: &ExecResult) -> qgactl::Result<()> {
    std::io::stdout().write_all(result.stdout.as_bytes())?;
    std::io::stderr().write_all(result.stderr.as_bytes())?;
    if result.stdout_truncated || result.stderr_truncated {
        eprintln!("warning: guest agent truncated captured output");
    }
    Ok(())
}

/// Arguments shared by `exec` and `exec-async`.
#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Command and arguments to run in the guest
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,

    /// Environment variable (KEY=VALUE)
    #[arg(short = 'e', long = "env", value_parser = parse_env_spec)]
    pub env: Vec<String>,

    /// Feed this file to the command's stdin ("-" for our stdin)
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,
}

impl CommandArgs {
    fn request(&self) -> qgactl::Result<ExecRequest> {
        let input = self.input.as_deref().map(read_input).transpose()?;
        Ok(ExecRequest::from_argv(&self.command)?
            .with_env(self.env.clone())
            .with_input(input))
    }
}

/// Run a command in the guest and wait for it to finish
#[derive(Args, Debug)]
pub struct ExecCmd {
    #[command(flatten)]
    pub args: CommandArgs,

    /// Print the exit code after the output
    #[arg(long)]
    pub show_exitcode: bool,

    /// Stop waiting after this long (e.g., "10s"); the guest process keeps running
    #[arg(long, value_parser = parse_duration)]
    pub deadline: Option<Duration>,
}

impl ExecCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let request = self.args.request()?;

        let mut cancel = ExecCancel::new();
        if let Some(deadline) = self.deadline {
            cancel = cancel.with_timeout(deadline);
        }

        let mut agent = ctx.agent();
        let result = agent.run(&request, &cancel)?;
        agent.disconnect();

        if ctx.json {
            print_json(&result_json(&result))?;
        } else {
            print_result(&result)?;
            if self.show_exitcode {
                match result.signal {
                    Some(signal) => println!("\nKilled by signal: {}", signal),
                    None => println!("\nExit code: {}", exit_code_of(&result)),
                }
            }
        }

        flush_output();
        std::process::exit(exit_code_of(&result));
    }
}

/// Start a command in the guest and print its pid without waiting
#[derive(Args, Debug)]
pub struct ExecAsyncCmd {
    #[command(flatten)]
    pub args: CommandArgs,
}

impl ExecAsyncCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let request = self.args.request()?;
        let handle = ctx.agent().exec(&request)?;
        if ctx.json {
            print_json(&json!({ "pid": handle.pid() }))
        } else {
            println!("{}", handle.pid());
            Ok(())
        }
    }
}

/// Query a guest process started with exec-async
#[derive(Args, Debug)]
pub struct ExecStatusCmd {
    /// Guest process id
    pub pid: i64,
}

impl ExecStatusCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let outcome = ctx.agent().exec_status(ExecHandle::from_pid(self.pid))?;
        let result = match outcome {
            PollOutcome::Running(handle) => {
                if ctx.json {
                    return print_json(&json!({ "pid": handle.pid(), "exited": false }));
                }
                println!("pid {} is still running", handle.pid());
                return Ok(());
            }
            PollOutcome::Exited(status) => status.into_result()?,
        };

        if ctx.json {
            let mut value = result_json(&result);
            value["exited"] = json!(true);
            return print_json(&value);
        }

        print_result(&result)?;
        match result.signal {
            Some(signal) => println!("pid {} killed by signal {}", result.pid, signal),
            None => println!("pid {} exited with code {}", result.pid, exit_code_of(&result)),
        }
        Ok(())
    }
}
