//! Payloads for the informational, file and shutdown commands.
//!
//! Field names follow the agent's schema. Unknown fields are ignored so
//! newer agents with extra members still decode.

use serde::{Deserialize, Serialize};

/// Reply of `guest-info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuestInfo {
    /// Agent version string.
    pub version: String,
    /// Commands known to this agent.
    #[serde(default)]
    pub supported_commands: Vec<GuestCommandInfo>,
}

/// One entry of [`GuestInfo::supported_commands`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestCommandInfo {
    /// Command name.
    pub name: String,
    /// Whether the command is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Whether the command sends a reply on success.
    #[serde(default = "default_true")]
    pub success_response: bool,
}

fn default_true() -> bool {
    true
}

/// Reply of `guest-get-osinfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestOsInfo {
    /// Kernel release (`uname -r`).
    pub kernel_release: Option<String>,
    /// Kernel version (`uname -v`).
    pub kernel_version: Option<String>,
    /// Hardware name (`uname -m`).
    pub machine: Option<String>,
    /// OS identifier (`ID` in os-release).
    pub id: Option<String>,
    /// OS name.
    pub name: Option<String>,
    /// Pretty OS name.
    pub pretty_name: Option<String>,
    /// OS version.
    pub version: Option<String>,
    /// OS version identifier.
    pub version_id: Option<String>,
}

/// Reply of `guest-get-host-name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestHostName {
    /// Host name.
    pub host_name: String,
}

/// One entry of the `guest-get-users` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestUser {
    /// User name.
    pub user: String,
    /// Logon domain (Windows guests only).
    pub domain: Option<String>,
    /// Login time in seconds since the epoch.
    #[serde(default)]
    pub login_time: f64,
}

/// Reply of `guest-get-timezone`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestTimezone {
    /// Zone name, when the guest can report one.
    pub zone: Option<String>,
    /// Offset from UTC in seconds.
    #[serde(default)]
    pub offset: i64,
}

/// One entry of the `guest-network-get-interfaces` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestNetworkInterface {
    /// Interface name.
    pub name: String,
    /// MAC address.
    pub hardware_address: Option<String>,
    /// Configured addresses.
    #[serde(default)]
    pub ip_addresses: Vec<GuestIpAddress>,
}

/// An address of a [`GuestNetworkInterface`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestIpAddress {
    /// Textual address.
    pub ip_address: String,
    /// "ipv4" or "ipv6".
    pub ip_address_type: String,
    /// Prefix length.
    #[serde(default)]
    pub prefix: u8,
}

/// One entry of the `guest-get-fsinfo` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestFilesystem {
    /// Device name.
    pub name: String,
    /// Mount point.
    pub mountpoint: String,
    /// Filesystem type.
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Bytes in use, when reported.
    pub used_bytes: Option<u64>,
    /// Total bytes, when reported.
    pub total_bytes: Option<u64>,
    /// Backing disks.
    #[serde(default)]
    pub disk: Vec<GuestDisk>,
}

/// A disk backing a [`GuestFilesystem`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestDisk {
    /// Device node in the guest.
    pub dev: Option<String>,
    /// Bus type (e.g., "virtio", "scsi").
    pub bus_type: Option<String>,
    /// Disk serial number.
    pub serial: Option<String>,
}

/// Reply of `guest-file-read`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuestFileRead {
    /// Number of bytes read.
    pub count: u64,
    /// Base64-encoded data.
    #[serde(default)]
    pub buf_b64: String,
    /// Whether end of file was reached.
    #[serde(default)]
    pub eof: bool,
}

/// Reply of `guest-file-write`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestFileWrite {
    /// Number of bytes written.
    pub count: u64,
    /// Whether end of file was reached.
    #[serde(default)]
    pub eof: bool,
}

/// Shutdown mode for `guest-shutdown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// ACPI power down.
    #[default]
    Powerdown,
    /// Reboot the guest.
    Reboot,
    /// Halt without powering off.
    Halt,
}

impl std::fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownMode::Powerdown => write!(f, "powerdown"),
            ShutdownMode::Reboot => write!(f, "reboot"),
            ShutdownMode::Halt => write!(f, "halt"),
        }
    }
}

impl std::str::FromStr for ShutdownMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "powerdown" | "poweroff" => Ok(ShutdownMode::Powerdown),
            "reboot" => Ok(ShutdownMode::Reboot),
            "halt" => Ok(ShutdownMode::Halt),
            _ => Err(format!("invalid shutdown mode: {}", s)),
        }
    }
}
