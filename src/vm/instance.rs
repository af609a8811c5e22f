//! VM instance model as reported by UTM

use crate::bridge::codes::{Arch, Backend, DriveInterface, NetworkMode, Protocol, RunState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Host side of a forward binds here unless told otherwise.
pub const DEFAULT_HOST_ADDRESS: &str = "127.0.0.1";

/// One row of `uvm list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSummary {
    pub uuid: Uuid,
    pub name: String,
    pub state: RunState,
    pub backend: Backend,
}

/// Full view of a VM's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInfo {
    pub uuid: Uuid,
    pub name: String,
    pub state: RunState,
    pub backend: Backend,
    pub arch: Option<Arch>,
    pub drives: Vec<Drive>,
    pub interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    pub interface: Option<DriveInterface>,
    pub removable: bool,
    pub size_mib: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub index: usize,
    pub mode: NetworkMode,
    pub forwards: Vec<PortForward>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub protocol: Protocol,
    /// `None` forwards to any guest address.
    pub guest_address: Option<String>,
    pub guest_port: u16,
    pub host_address: String,
    pub host_port: u16,
}

impl PortForward {
    /// tcp/udp forward from loopback `host_port` to `guest_port`.
    pub fn new(protocol: Protocol, guest_port: u16, host_port: u16) -> Self {
        Self {
            protocol,
            guest_address: None,
            guest_port,
            host_address: DEFAULT_HOST_ADDRESS.to_string(),
            host_port,
        }
    }

    /// Same protocol and guest port, i.e. the routing key on one interface.
    pub fn same_route(&self, other: &PortForward) -> bool {
        self.protocol == other.protocol && self.guest_port == other.guest_port
    }
}

impl VmInfo {
    /// The fixed disk, if one has been added.
    pub fn system_drive(&self) -> Option<&Drive> {
        self.drives.iter().find(|d| !d.removable)
    }

    /// The removable installation medium, if attached.
    pub fn boot_media(&self) -> Option<&Drive> {
        self.drives.iter().find(|d| d.removable)
    }

    pub fn interface(&self, index: usize) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|n| n.index == index)
    }

    pub fn emulated_interfaces(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.interfaces
            .iter()
            .filter(|n| n.mode == NetworkMode::Emulated)
    }
}

/// Format a UUID the way UTM prints identifiers.
pub fn vm_ref(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}
