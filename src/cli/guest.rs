//! Guest information and power commands.

use crate::cli::parsers::parse_json_arguments;
use crate::cli::{or_na, print_json, Context};
use clap::Args;
use qga_protocol::guest::ShutdownMode;
use serde_json::json;

/// Check that the guest agent responds
#[derive(Args, Debug)]
pub struct PingCmd {}

impl PingCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        ctx.agent().ping()?;
        if ctx.json {
            print_json(&json!({"responding": true}))
        } else {
            println!("Guest agent is responding");
            Ok(())
        }
    }
}

/// Show agent version and supported commands
#[derive(Args, Debug)]
pub struct InfoCmd {}

impl InfoCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let info = ctx.agent().info()?;
        if ctx.json {
            return print_json(&info);
        }

        println!("QGA Version: {}", info.version);
        println!();
        println!("Supported Commands ({}):", info.supported_commands.len());
        for cmd in &info.supported_commands {
            let status = if cmd.enabled { "+" } else { "-" };
            println!("  {} {}", status, cmd.name);
        }
        Ok(())
    }
}

/// Show guest operating system information
#[derive(Args, Debug)]
pub struct OsInfoCmd {}

impl OsInfoCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let os = ctx.agent().os_info()?;
        if ctx.json {
            return print_json(&os);
        }

        println!("OS Name: {}", or_na(os.name.as_deref()));
        println!("Version: {}", or_na(os.version.as_deref()));
        println!("Kernel Version: {}", or_na(os.kernel_version.as_deref()));
        println!("Kernel Release: {}", or_na(os.kernel_release.as_deref()));
        println!("Machine: {}", or_na(os.machine.as_deref()));
        println!("ID: {}", or_na(os.id.as_deref()));
        Ok(())
    }
}

/// Show the guest host name
#[derive(Args, Debug)]
pub struct HostnameCmd {}

impl HostnameCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let name = ctx.agent().host_name()?;
        if ctx.json {
            print_json(&json!({ "host-name": name }))
        } else {
            println!("{}", name);
            Ok(())
        }
    }
}

/// List users logged in to the guest
#[derive(Args, Debug)]
pub struct UsersCmd {}

impl UsersCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let users = ctx.agent().users()?;
        if ctx.json {
            return print_json(&users);
        }

        if users.is_empty() {
            println!("No users currently logged in");
            return Ok(());
        }
        println!("Logged-in Users ({}):", users.len());
        for user in &users {
            let name = match &user.domain {
                Some(domain) => format!("{}\\{}", domain, user.user),
                None => user.user.clone(),
            };
            println!("  - {} (login time: {})", name, user.login_time);
        }
        Ok(())
    }
}

/// Show the guest timezone
#[derive(Args, Debug)]
pub struct TimezoneCmd {}

impl TimezoneCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let tz = ctx.agent().timezone()?;
        if ctx.json {
            return print_json(&tz);
        }

        let sign = if tz.offset < 0 { '-' } else { '+' };
        let minutes = tz.offset.abs() / 60;
        println!(
            "{} (UTC{}{:02}:{:02})",
            or_na(tz.zone.as_deref()),
            sign,
            minutes / 60,
            minutes % 60
        );
        Ok(())
    }
}

/// Show guest network interfaces
#[derive(Args, Debug)]
pub struct NetworkCmd {}

impl NetworkCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let interfaces = ctx.agent().network_interfaces()?;
        if ctx.json {
            return print_json(&interfaces);
        }

        println!("Network Interfaces ({}):", interfaces.len());
        for iface in &interfaces {
            println!();
            println!("  {}:", iface.name);
            println!(
                "    Hardware Address: {}",
                or_na(iface.hardware_address.as_deref())
            );
            if !iface.ip_addresses.is_empty() {
                println!("    IP Addresses:");
                for ip in &iface.ip_addresses {
                    println!(
                        "      - {}/{} ({})",
                        ip.ip_address, ip.prefix, ip.ip_address_type
                    );
                }
            }
        }
        Ok(())
    }
}

/// Show guest filesystems
#[derive(Args, Debug)]
pub struct FsInfoCmd {}

impl FsInfoCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let filesystems = ctx.agent().fs_info()?;
        if ctx.json {
            return print_json(&filesystems);
        }

        println!("Filesystems ({}):", filesystems.len());
        for fs in &filesystems {
            let disks: Vec<&str> = fs.disk.iter().map(|d| or_na(d.dev.as_deref())).collect();
            println!();
            println!("  {}:", fs.mountpoint);
            println!("    Type: {}", fs.fs_type);
            println!("    Disk: {}", disks.join(", "));
            if let (Some(used), Some(total)) = (fs.used_bytes, fs.total_bytes) {
                println!("    Used: {} of {} bytes", used, total);
            }
        }
        Ok(())
    }
}

/// Shut down, reboot or halt the guest
#[derive(Args, Debug)]
pub struct ShutdownCmd {
    /// powerdown, reboot or halt
    #[arg(short, long, default_value_t = ShutdownMode::Powerdown)]
    pub mode: ShutdownMode,
}

impl ShutdownCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        ctx.agent().shutdown(self.mode)?;
        if ctx.json {
            print_json(&json!({ "mode": self.mode }))
        } else {
            println!("Requested guest {}", self.mode);
            Ok(())
        }
    }
}

/// Send any guest agent command and print the reply
#[derive(Args, Debug)]
pub struct RawCmd {
    /// Command name (e.g., guest-sync)
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: Option<String>,
}

impl RawCmd {
    pub fn run(self, ctx: &Context) -> qgactl::Result<()> {
        let arguments = self
            .arguments
            .as_deref()
            .map(parse_json_arguments)
            .transpose()?;
        let value = ctx.agent().command(&self.name, arguments.as_ref())?;
        // Raw replies have no text layout of their own.
        print_json(&value)
    }
}
