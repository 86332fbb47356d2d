//! qgactl CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// qgactl - QEMU guest agent client
#[derive(Parser, Debug)]
#[command(name = "qgactl")]
#[command(about = "Talk to a QEMU guest agent over its Unix socket")]
#[command(
    long_about = "qgactl sends commands to the QEMU guest agent running inside a VM.\n\n\
The VM must expose the agent on a host Unix socket, for example:\n  \
-chardev socket,path=/tmp/qga.sock,server=on,wait=off,id=qga0\n  \
-device virtio-serial\n  \
-device virtserialport,chardev=qga0,name=org.qemu.guest_agent.0\n\n\
Quick start:\n  \
qgactl ping\n  \
qgactl exec -- uname -a\n  \
qgactl -s /run/vm1-qga.sock --json network"
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: cli::GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the guest agent responds
    Ping(cli::guest::PingCmd),

    /// Show agent version and supported commands
    Info(cli::guest::InfoCmd),

    /// Show guest operating system information
    Osinfo(cli::guest::OsInfoCmd),

    /// Show the guest host name
    Hostname(cli::guest::HostnameCmd),

    /// List users logged in to the guest
    Users(cli::guest::UsersCmd),

    /// Show the guest timezone
    Timezone(cli::guest::TimezoneCmd),

    /// Show guest network interfaces
    Network(cli::guest::NetworkCmd),

    /// Show guest filesystems
    Fsinfo(cli::guest::FsInfoCmd),

    /// Run a command in the guest and wait for it
    Exec(cli::exec::ExecCmd),

    /// Start a command in the guest without waiting
    ExecAsync(cli::exec::ExecAsyncCmd),

    /// Query a guest process started with exec-async
    ExecStatus(cli::exec::ExecStatusCmd),

    /// Print a file from the guest
    FileRead(cli::file::FileReadCmd),

    /// Write a file in the guest
    FileWrite(cli::file::FileWriteCmd),

    /// Shut down, reboot or halt the guest
    Shutdown(cli::guest::ShutdownCmd),

    /// Send any guest agent command
    Raw(cli::guest::RawCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = qgactl::VERSION, "starting qgactl");

    let result = cli
        .global
        .resolve()
        .and_then(|ctx| match cli.command {
            Commands::Ping(cmd) => cmd.run(&ctx),
            Commands::Info(cmd) => cmd.run(&ctx),
            Commands::Osinfo(cmd) => cmd.run(&ctx),
            Commands::Hostname(cmd) => cmd.run(&ctx),
            Commands::Users(cmd) => cmd.run(&ctx),
            Commands::Timezone(cmd) => cmd.run(&ctx),
            Commands::Network(cmd) => cmd.run(&ctx),
            Commands::Fsinfo(cmd) => cmd.run(&ctx),
            Commands::Exec(cmd) => cmd.run(&ctx),
            Commands::ExecAsync(cmd) => cmd.run(&ctx),
            Commands::ExecStatus(cmd) => cmd.run(&ctx),
            Commands::FileRead(cmd) => cmd.run(&ctx),
            Commands::FileWrite(cmd) => cmd.run(&ctx),
            Commands::Shutdown(cmd) => cmd.run(&ctx),
            Commands::Raw(cmd) => cmd.run(&ctx),
        });

    // Handle errors
    if let Err(e) = result {
        tracing::error!(error = %e, kind = %e.kind(), "command failed");
        eprintln!("Error: {}", e);
        if e.kind() == qgactl::ErrorKind::Connection {
            eprintln!("\nIs the VM running with the guest agent enabled?");
        }
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qgactl=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
