//! VM provisioning pipeline
//!
//! Creation is a chain of separate bridge calls with no rollback:
//!
//! ```text
//! none -> created -> hardware-configured -> disk-attached
//!      -> media-attached -> network-attached -> ready
//! ```
//!
//! Only the first step allocates an identity. Every later step checks the VM
//! before acting, so re-running against a VM that already got that far adds
//! nothing. The first failure stops the pipeline and is returned together
//! with the UUID reached so far.

use crate::bridge::codes::{Arch, DriveInterface, NetworkMode};
use crate::bridge::utm::Utm;
use crate::bridge::{is_already_configured, Bridge};
use crate::config::schema::{GalleryEntry, OsFamily};
use crate::error::UvmError;
use crate::gallery::Gallery;
use crate::utils::paths::PathsConfig;
use crate::vm::instance::vm_ref;
use crate::vm::media::{self, MediaFetcher};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// How far provisioning got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisioningState {
    None,
    Created,
    HardwareConfigured,
    DiskAttached,
    MediaAttached,
    NetworkAttached,
    Ready,
}

impl ProvisioningState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningState::None => "none",
            ProvisioningState::Created => "created",
            ProvisioningState::HardwareConfigured => "hardware-configured",
            ProvisioningState::DiskAttached => "disk-attached",
            ProvisioningState::MediaAttached => "media-attached",
            ProvisioningState::NetworkAttached => "network-attached",
            ProvisioningState::Ready => "ready",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    #[default]
    Automated,
    /// Print the steps instead of driving the bridge.
    Manual,
}

/// VM Creation parameters
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub key: String,
    /// Defaults to the template key.
    pub name: Option<String>,
    pub network_mode: NetworkMode,
    pub mode: CreateMode,
    /// Continue an existing VM of the same name instead of failing.
    pub force: bool,
    /// With `force`: delete the existing VM and start at step one.
    pub recreate: bool,
    pub resume: Option<Uuid>,
}

impl CreateParams {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            network_mode: NetworkMode::default(),
            mode: CreateMode::default(),
            force: false,
            recreate: false,
            resume: None,
        }
    }
}

/// Successful run of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    pub uuid: Uuid,
    pub name: String,
    pub state: ProvisioningState,
    /// Steps that were already done and left alone.
    pub skipped: Vec<ProvisioningState>,
}

/// A pipeline step failed.
#[derive(Debug)]
pub struct ProvisionFailure {
    /// `None` when no VM was allocated.
    pub uuid: Option<Uuid>,
    /// The state the failed step was trying to reach.
    pub step: ProvisioningState,
    pub source: UvmError,
}

impl fmt::Display for ProvisionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provisioning failed at step '{}': {}", self.step, self.source)?;
        match &self.uuid {
            Some(uuid) => write!(
                f,
                "\nVM {} was left partially configured; re-run with --force --resume {} to continue, or --force --recreate to start over",
                vm_ref(uuid),
                vm_ref(uuid)
            ),
            None => write!(f, "\nno VM was created"),
        }
    }
}

impl std::error::Error for ProvisionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// VM Creator
pub struct VmCreator<'a> {
    utm: Utm<'a>,
    gallery: &'a Gallery,
    paths: &'a PathsConfig,
    fetcher: &'a dyn MediaFetcher,
}

type StepResult<T> = std::result::Result<T, ProvisionFailure>;

impl<'a> VmCreator<'a> {
    pub fn new(
        bridge: &'a dyn Bridge,
        gallery: &'a Gallery,
        paths: &'a PathsConfig,
        fetcher: &'a dyn MediaFetcher,
    ) -> Self {
        Self {
            utm: Utm::new(bridge),
            gallery,
            paths,
            fetcher,
        }
    }

    /// Drive a template through every step up to `ready`.
    pub fn provision(&self, params: &CreateParams) -> StepResult<ProvisionReport> {
        let fail_early = |source: UvmError| ProvisionFailure {
            uuid: None,
            step: ProvisioningState::Created,
            source,
        };

        let entry = self.gallery.get(&params.key).map_err(fail_early)?;
        let name = params.name.clone().unwrap_or_else(|| entry.key.clone());
        let mut skipped = Vec::new();

        let uuid = self.allocate(entry, &name, params, &mut skipped)?;
        let vm = vm_ref(&uuid);
        info!(vm = %vm, state = %ProvisioningState::Created, "provisioning");

        let fail = |step: ProvisioningState| move |source: UvmError| ProvisionFailure {
            uuid: Some(uuid),
            step,
            source,
        };

        // created -> hardware-configured
        let hw = &entry.hardware;
        self.attempt(ProvisioningState::HardwareConfigured, &vm, || {
            self.utm.configure_hardware(&vm, hw.cpus, hw.ram_mb, hw.uefi)
        })
        .map_err(fail(ProvisioningState::HardwareConfigured))?;

        let info = self
            .utm
            .inspect(&vm)
            .map_err(fail(ProvisioningState::DiskAttached))?;

        // hardware-configured -> disk-attached
        if info.system_drive().is_some() {
            skip(&mut skipped, ProvisioningState::DiskAttached, &vm);
        } else {
            self.attempt(ProvisioningState::DiskAttached, &vm, || {
                self.utm.add_drive(&vm, entry.disk_interface(), hw.disk_mb)
            })
            .map_err(fail(ProvisioningState::DiskAttached))?;
        }

        // disk-attached -> media-attached
        if info.boot_media().is_some() {
            skip(&mut skipped, ProvisioningState::MediaAttached, &vm);
        } else {
            let media = media::ensure_media(self.fetcher, entry, &self.paths.media_cache_dir)
                .map_err(fail(ProvisioningState::MediaAttached))?;
            self.attempt(ProvisioningState::MediaAttached, &vm, || {
                self.utm.attach_media(&vm, entry.media_interface(), &media)
            })
            .map_err(fail(ProvisioningState::MediaAttached))?;
        }

        // media-attached -> network-attached
        if !info.interfaces.is_empty() {
            skip(&mut skipped, ProvisioningState::NetworkAttached, &vm);
        } else {
            self.attempt(ProvisioningState::NetworkAttached, &vm, || {
                self.utm.add_network(&vm, params.network_mode).map(drop)
            })
            .map_err(fail(ProvisioningState::NetworkAttached))?;
        }

        info!(vm = %vm, state = %ProvisioningState::Ready, "provisioning complete");
        Ok(ProvisionReport {
            uuid,
            name,
            state: ProvisioningState::Ready,
            skipped,
        })
    }

    /// Step one: find or make the VM identity.
    fn allocate(
        &self,
        entry: &GalleryEntry,
        name: &str,
        params: &CreateParams,
        skipped: &mut Vec<ProvisioningState>,
    ) -> StepResult<Uuid> {
        let fail = |uuid: Option<Uuid>, source: UvmError| ProvisionFailure {
            uuid,
            step: ProvisioningState::Created,
            source,
        };

        if let Some(uuid) = params.resume {
            let info = self.utm.inspect(&vm_ref(&uuid)).map_err(|e| fail(None, e))?;
            skip(skipped, ProvisioningState::Created, &vm_ref(&info.uuid));
            return Ok(info.uuid);
        }

        match self.utm.find(name).map_err(|e| fail(None, e))? {
            Some(existing) if params.force && params.recreate => {
                warn!(vm = %vm_ref(&existing.uuid), name, "deleting existing VM before re-creating");
                self.utm
                    .delete(&vm_ref(&existing.uuid))
                    .map_err(|e| fail(Some(existing.uuid), e))?;
            }
            Some(existing) if params.force => {
                skip(skipped, ProvisioningState::Created, &vm_ref(&existing.uuid));
                return Ok(existing.uuid);
            }
            Some(existing) => {
                return Err(fail(
                    Some(existing.uuid),
                    UvmError::VmExists {
                        name: name.to_string(),
                        uuid: vm_ref(&existing.uuid),
                    },
                ))
            }
            None => {}
        }

        self.utm
            .create(name, entry.backend, entry.arch)
            .map_err(|e| fail(None, e))
    }

    fn attempt(
        &self,
        step: ProvisioningState,
        vm: &str,
        f: impl FnOnce() -> crate::Result<()>,
    ) -> crate::Result<()> {
        match f() {
            Ok(()) => {
                info!(vm, state = %step, "provisioning");
                Ok(())
            }
            Err(e) if is_already_configured(&e) => {
                info!(vm, state = %step, "already configured");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn skip(skipped: &mut Vec<ProvisioningState>, step: ProvisioningState, vm: &str) {
    warn!(vm, state = %step, "step already done, skipping");
    skipped.push(step);
}

/// Step-by-step instructions equivalent to the automated pipeline.
pub fn manual_instructions(
    entry: &GalleryEntry,
    name: &str,
    network_mode: NetworkMode,
    paths: &PathsConfig,
) -> Vec<String> {
    let host_native = match entry.arch {
        Arch::Arm64 => std::env::consts::ARCH == "aarch64",
        Arch::X86_64 => std::env::consts::ARCH == "x86_64",
    };
    let hw = &entry.hardware;
    let media_path = media::cache_path(&paths.media_cache_dir, entry);

    vec![
        download_step(entry, &media_path),
        format!(
            "In UTM click \"+\", choose \"{}\", then \"{}\"; name the VM \"{}\" and pick architecture {}",
            if host_native { "Virtualize" } else { "Emulate" },
            os_label(entry.os),
            name,
            entry.arch.emulator_arch()
        ),
        format!(
            "System: {} MiB memory, {} CPU cores, UEFI boot {}",
            hw.ram_mb,
            hw.cpus,
            if hw.uefi { "on" } else { "off" }
        ),
        format!(
            "Drives: add a {} drive of {} MiB",
            interface_label(entry.disk_interface()),
            hw.disk_mb
        ),
        format!(
            "Drives: add a removable {} drive and select {}",
            interface_label(entry.media_interface()),
            media_path.display()
        ),
        format!("Network: add one interface in \"{}\" mode", mode_label(network_mode)),
        "Save the VM; it is ready to start".to_string(),
    ]
}

fn download_step(entry: &GalleryEntry, media_path: &std::path::Path) -> String {
    let target = format!("Download {} to {}", entry.media.url, media_path.display());
    let pinned = entry
        .media
        .checksum
        .as_deref()
        .and_then(|c| media::Checksum::parse(c).ok());
    match (pinned, entry.media.checksum_url.as_deref()) {
        (Some(c), _) => format!(
            "{target} and check that `shasum -a {}` prints {}",
            c.algorithm.bits(),
            c.hex
        ),
        (None, Some(list)) => format!(
            "{target} and check `shasum -a {}` against the {} line of {list}",
            media::Algorithm::from_list_url(list).bits(),
            entry.media_file_name()
        ),
        (None, None) => target,
    }
}

fn os_label(os: OsFamily) -> &'static str {
    match os {
        OsFamily::Linux => "Linux",
        OsFamily::Windows => "Windows",
        OsFamily::Macos => "macOS 12+",
        OsFamily::Freebsd => "Other",
    }
}

fn interface_label(interface: Option<DriveInterface>) -> &'static str {
    match interface {
        Some(DriveInterface::Virtio) => "VirtIO",
        Some(DriveInterface::Nvme) => "NVMe",
        Some(DriveInterface::Usb) => "USB",
        Some(DriveInterface::Ide) => "IDE",
        Some(DriveInterface::Scsi) => "SCSI",
        Some(other) => other.as_str(),
        None => "default",
    }
}

fn mode_label(mode: NetworkMode) -> &'static str {
    match mode {
        NetworkMode::Shared => "Shared Network",
        NetworkMode::Emulated => "Emulated VLAN",
        NetworkMode::Bridged => "Bridged (Advanced)",
        NetworkMode::Host => "Host Only",
    }
}
