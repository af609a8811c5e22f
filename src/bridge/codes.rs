//! Translation between configuration vocabulary and the four-character
//! codes UTM's scripting dictionary expects.
//!
//! Every table here is closed: a value that is not listed fails with
//! [`UvmError::UnsupportedConfiguration`]. There is no default code.

use crate::error::UvmError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines an enum with a fixed `name <-> code` table.
macro_rules! bridge_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => ($label:literal, $code:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Human-readable name used in manifests and on the command line.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Four-character scripting code.
            pub fn code(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn parse(value: &str) -> Result<Self> {
                match value {
                    $($label => Ok($name::$variant),)+
                    other => Err(unsupported($kind, other, Self::ALL.iter().map(|v| v.as_str()))),
                }
            }

            /// Reverse lookup from a code as printed by the bridge.
            pub fn from_code(code: &str) -> Result<Self> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(unsupported(
                        concat!($kind, " code"),
                        other,
                        Self::ALL.iter().map(|v| v.code()),
                    )),
                }
            }

            /// Accepts either the code (bare or as `«constant ****XXXX»`) or the name.
            pub fn from_bridge(raw: &str) -> Result<Self> {
                let raw = raw.trim();
                match extract_code(raw) {
                    Some(code) => Self::from_code(code),
                    None => Self::from_code(raw).or_else(|_| Self::parse(raw)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UvmError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }
    };
}

bridge_enum! {
    /// Virtualization backend of a VM.
    Backend, "backend" {
        Qemu => ("qemu", "QeMu"),
        Apple => ("apple", "ApLe"),
    }
}

bridge_enum! {
    /// Drive controller of a QEMU VM.
    DriveInterface, "drive interface" {
        None => ("none", "QdIn"),
        Ide => ("ide", "QdIi"),
        Scsi => ("scsi", "QdIs"),
        Sd => ("sd", "QdId"),
        Mtd => ("mtd", "QdIm"),
        Floppy => ("floppy", "QdIf"),
        Pflash => ("pflash", "QdIp"),
        Virtio => ("virtio", "QdIv"),
        Nvme => ("nvme", "QdIN"),
        Usb => ("usb", "QdIu"),
    }
}

bridge_enum! {
    /// Network interface mode.
    NetworkMode, "network mode" {
        Shared => ("shared", "ShRd"),
        Emulated => ("emulated", "EmUd"),
        Bridged => ("bridged", "BrGd"),
        Host => ("host", "HsOo"),
    }
}

bridge_enum! {
    /// Port-forward transport protocol.
    Protocol, "protocol" {
        Tcp => ("tcp", "TcPp"),
        Udp => ("udp", "UdPp"),
    }
}

bridge_enum! {
    /// Raw VM status as reported by UTM.
    Status, "status" {
        Stopped => ("stopped", "StSa"),
        Starting => ("starting", "StSt"),
        Started => ("started", "StSd"),
        Pausing => ("pausing", "StPa"),
        Paused => ("paused", "StPd"),
        Resuming => ("resuming", "StRe"),
        Stopping => ("stopping", "StSo"),
    }
}

impl NetworkMode {
    /// Only emulated VLAN interfaces accept port-forward rules.
    pub fn supports_port_forwarding(&self) -> bool {
        matches!(self, NetworkMode::Emulated)
    }
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Shared
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Qemu
    }
}

/// Coarse run state derived from [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
    Suspended,
    Unknown,
}

impl From<Status> for RunState {
    fn from(status: Status) -> Self {
        match status {
            Status::Stopped => RunState::Stopped,
            Status::Started => RunState::Running,
            Status::Paused => RunState::Suspended,
            Status::Starting | Status::Pausing | Status::Resuming | Status::Stopping => {
                RunState::Unknown
            }
        }
    }
}

impl RunState {
    /// Parse a status name or code; anything unrecognised is `Unknown`.
    pub fn from_bridge(raw: &str) -> Self {
        Status::from_bridge(raw)
            .map(RunState::from)
            .unwrap_or(RunState::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Running => "running",
            RunState::Suspended => "suspended",
            RunState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Guest CPU architecture as named in the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    pub const ALL: &'static [Arch] = &[Arch::Arm64, Arch::X86_64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }

    /// Architecture string of the QEMU configuration.
    pub fn emulator_arch(&self) -> &'static str {
        match self {
            Arch::Arm64 => "aarch64",
            Arch::X86_64 => "x86_64",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "arm64" => Ok(Arch::Arm64),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(unsupported(
                "architecture",
                other,
                Self::ALL.iter().map(|a| a.as_str()),
            )),
        }
    }

    pub fn from_emulator_arch(value: &str) -> Result<Self> {
        match value {
            "aarch64" => Ok(Arch::Arm64),
            "x86_64" => Ok(Arch::X86_64),
            other => Err(unsupported(
                "emulator architecture",
                other,
                Self::ALL.iter().map(|a| a.emulator_arch()),
            )),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = UvmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Pull `XXXX` out of an AppleScript `«constant ****XXXX»` rendering.
fn extract_code(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix("«constant ****")?.strip_suffix('»')?;
    (inner.len() == 4).then_some(inner)
}

fn unsupported<'a>(
    kind: &'static str,
    value: &str,
    expected: impl Iterator<Item = &'a str>,
) -> UvmError {
    UvmError::UnsupportedConfiguration {
        kind,
        value: value.to_string(),
        expected: expected.collect::<Vec<_>>().join(", "),
    }
}
