//! Error types for uvm

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for every library operation.
#[derive(Error, Debug)]
pub enum UvmError {
    // Scripting bridge
    #[error("scripting bridge failed running '{script}': {message}")]
    Bridge { script: String, message: String },

    #[error(
        "automation permission denied: {message}\n\
         hint: allow your terminal to control UTM in System Settings > Privacy & Security > Automation, \
         or re-run with --manual to get step-by-step instructions"
    )]
    PermissionDenied { message: String },

    #[error("unsupported {kind} '{value}' (expected one of: {expected})")]
    UnsupportedConfiguration {
        kind: &'static str,
        value: String,
        expected: String,
    },

    // Gallery and media
    #[error("invalid gallery manifest: {message}")]
    Manifest { message: String },

    #[error("template '{key}' not found in gallery")]
    TemplateNotFound { key: String },

    #[error(
        "checksum mismatch for {}: expected {expected}, got {actual}\n\
         hint: the file was not used; re-run to download it again, and if the mismatch persists the gallery checksum is out of date",
        path.display()
    )]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    // VMs
    #[error("VM '{vm}' not found")]
    VmNotFound { vm: String },

    #[error("VM '{name}' already exists ({uuid}); pass --force to resume it or --force --recreate to start over")]
    VmExists { name: String, uuid: String },

    #[error("VM '{vm}' is running; stop it first with `uvm stop {vm}`")]
    VmRunning { vm: String },

    // Guest protocol
    #[error("guest agent in VM '{vm}' is not responding: {reason}")]
    NotResponding { vm: String, reason: String },

    #[error("transfer of '{path}' for VM '{vm}' failed: {message}")]
    Transfer {
        vm: String,
        path: String,
        message: String,
    },

    #[error("{what} did not finish within {secs}s (process killed)")]
    Timeout { what: String, secs: u64 },

    // Network
    #[error(
        "network interface {index} of VM '{vm}' is in {mode} mode, which does not support port forwarding\n\
         hint: run `uvm setup-network {vm}` or pass --setup-network to add an emulated VLAN interface"
    )]
    UnsupportedNetworkMode {
        vm: String,
        index: usize,
        mode: String,
    },

    #[error("VM '{vm}' has no network interface with index {index}")]
    InterfaceNotFound { vm: String, index: usize },

    #[error("{protocol} guest port {guest_port} is already forwarded on interface {index} of VM '{vm}' (host port {host_port})")]
    PortConflict {
        vm: String,
        index: usize,
        protocol: String,
        guest_port: u16,
        host_port: u16,
    },

    // Host application
    #[error("{operation} requires UTM {required} or newer (installed: {installed})\nhint: update UTM from https://mac.getutm.app")]
    UnsupportedVersion {
        operation: &'static str,
        required: String,
        installed: String,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl UvmError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
