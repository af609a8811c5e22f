//! Gallery manifest schema definitions

use crate::bridge::codes::{Arch, Backend, DriveInterface};
use serde::{Deserialize, Serialize};

/// Top-level manifest document
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    pub templates: Vec<GalleryEntry>,
}

/// One VM template
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub key: String,
    pub name: String,
    pub os: OsFamily,
    pub arch: Arch,
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub backend: Backend,
    pub hardware: HardwareProfile,
    pub media: MediaSource,
}

/// Guest operating system family
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Macos,
    Freebsd,
}

/// Hardware profile
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HardwareProfile {
    pub ram_mb: u64,
    pub disk_mb: u64,
    pub cpus: u32,
    #[serde(default = "default_uefi")]
    pub uefi: bool,
    #[serde(default)]
    pub disk_interface: Option<DriveInterface>,
}

/// Where installation media comes from
///
/// A pinned `checksum` wins; otherwise the file's line in the publisher's
/// checksum list at `checksum_url` is used.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>, // "<algorithm>:<hex>"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_url: Option<String>,
}

fn default_uefi() -> bool {
    true
}

impl OsFamily {
    pub const ALL: &'static [OsFamily] = &[
        OsFamily::Linux,
        OsFamily::Windows,
        OsFamily::Macos,
        OsFamily::Freebsd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Windows => "windows",
            OsFamily::Macos => "macos",
            OsFamily::Freebsd => "freebsd",
        }
    }

    pub fn parse(value: &str) -> crate::Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|os| os.as_str() == value)
            .ok_or_else(|| crate::error::UvmError::UnsupportedConfiguration {
                kind: "operating system",
                value: value.to_string(),
                expected: Self::ALL
                    .iter()
                    .map(|os| os.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl GalleryEntry {
    /// Controller for the system disk: explicit, else NVMe for Windows, VirtIO otherwise.
    pub fn disk_interface(&self) -> Option<DriveInterface> {
        if self.backend == Backend::Apple {
            return None;
        }
        Some(self.hardware.disk_interface.unwrap_or(match self.os {
            OsFamily::Windows => DriveInterface::Nvme,
            _ => DriveInterface::Virtio,
        }))
    }

    /// Removable media always goes through a USB controller on QEMU.
    pub fn media_interface(&self) -> Option<DriveInterface> {
        match self.backend {
            Backend::Qemu => Some(DriveInterface::Usb),
            Backend::Apple => None,
        }
    }

    /// File name of the media inside the cache.
    pub fn media_file_name(&self) -> String {
        self.media
            .url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.split('?').next().unwrap_or(s).to_string())
            .unwrap_or_else(|| format!("{}.iso", self.key))
    }
}
