//! Typed facade over the UTM scripting dictionary

use super::codes::{Arch, Backend, DriveInterface, NetworkMode, Protocol, RunState};
use super::{scripts, Bridge, Script};
use crate::error::UvmError;
use crate::vm::instance::{Drive, NetworkInterface, PortForward, VmInfo, VmSummary};
use crate::Result;
use std::path::Path;
use uuid::Uuid;

/// Every call is one bridge invocation.
pub struct Utm<'a> {
    bridge: &'a dyn Bridge,
}

impl<'a> Utm<'a> {
    pub fn new(bridge: &'a dyn Bridge) -> Self {
        Self { bridge }
    }

    fn call(&self, script: &Script, args: Vec<String>) -> Result<String> {
        self.bridge.run(script, &args)
    }

    /// Run a script addressed at one VM, turning lookup failures into `VmNotFound`.
    fn call_vm(&self, script: &Script, vm: &str, mut rest: Vec<String>) -> Result<String> {
        let mut args = vec![vm.to_string()];
        args.append(&mut rest);
        self.call(script, args).map_err(|e| match e {
            UvmError::Bridge { ref message, .. }
                if message.contains("(-1728)") || message.contains("Can’t get virtual machine") || message.contains("Can't get virtual machine") =>
            {
                UvmError::VmNotFound { vm: vm.to_string() }
            }
            other => other,
        })
    }

    pub fn list(&self) -> Result<Vec<VmSummary>> {
        let out = self.call(&scripts::LIST_VMS, Vec::new())?;
        out.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let f: Vec<&str> = line.split('\t').collect();
                match f.as_slice() {
                    ["vm", id, name, status, backend, ..] => Ok(VmSummary {
                        uuid: parse_uuid(scripts::LIST_VMS.name, id)?,
                        name: name.to_string(),
                        state: RunState::from_bridge(status),
                        backend: Backend::from_bridge(backend)?,
                    }),
                    _ => Err(unexpected(scripts::LIST_VMS.name, line)),
                }
            })
            .collect()
    }

    /// Look a VM up by UUID or name.
    pub fn find(&self, ident: &str) -> Result<Option<VmSummary>> {
        let wanted = Uuid::parse_str(ident).ok();
        Ok(self
            .list()?
            .into_iter()
            .find(|vm| Some(vm.uuid) == wanted || vm.name == ident))
    }

    pub fn inspect(&self, vm: &str) -> Result<VmInfo> {
        let out = self.call_vm(&scripts::INSPECT_VM, vm, Vec::new())?;
        parse_vm_info(&out)
    }

    pub fn create(&self, name: &str, backend: Backend, arch: Arch) -> Result<Uuid> {
        let out = self.call(
            &scripts::CREATE_VM,
            vec![
                name.to_string(),
                backend.code().to_string(),
                arch.emulator_arch().to_string(),
            ],
        )?;
        parse_uuid(scripts::CREATE_VM.name, out.trim())
    }

    pub fn configure_hardware(&self, vm: &str, cpus: u32, memory_mib: u64, uefi: bool) -> Result<()> {
        self.call_vm(
            &scripts::CONFIGURE_HARDWARE,
            vm,
            vec![cpus.to_string(), memory_mib.to_string(), uefi.to_string()],
        )?;
        Ok(())
    }

    pub fn add_drive(&self, vm: &str, interface: Option<DriveInterface>, size_mib: u64) -> Result<()> {
        self.call_vm(
            &scripts::ADD_DRIVE,
            vm,
            vec![code_or_empty(interface), size_mib.to_string()],
        )?;
        Ok(())
    }

    pub fn attach_media(&self, vm: &str, interface: Option<DriveInterface>, media: &Path) -> Result<()> {
        self.call_vm(
            &scripts::ATTACH_MEDIA,
            vm,
            vec![code_or_empty(interface), media.display().to_string()],
        )?;
        Ok(())
    }

    /// Append an interface and return its index.
    pub fn add_network(&self, vm: &str, mode: NetworkMode) -> Result<usize> {
        let out = self.call_vm(&scripts::ADD_NETWORK, vm, vec![mode.code().to_string()])?;
        out.trim()
            .parse()
            .map_err(|_| unexpected(scripts::ADD_NETWORK.name, &out))
    }

    pub fn add_port_forward(&self, vm: &str, index: usize, rule: &PortForward) -> Result<()> {
        self.call_vm(
            &scripts::ADD_PORT_FORWARD,
            vm,
            vec![
                index.to_string(),
                rule.protocol.code().to_string(),
                rule.guest_address.clone().unwrap_or_default(),
                rule.guest_port.to_string(),
                rule.host_address.clone(),
                rule.host_port.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn remove_port_forward(&self, vm: &str, index: usize, protocol: Protocol, guest_port: u16) -> Result<()> {
        self.call_vm(
            &scripts::REMOVE_PORT_FORWARD,
            vm,
            vec![index.to_string(), protocol.code().to_string(), guest_port.to_string()],
        )?;
        Ok(())
    }

    pub fn start(&self, vm: &str) -> Result<()> {
        self.call_vm(&scripts::START_VM, vm, Vec::new()).map(drop)
    }

    pub fn stop(&self, vm: &str) -> Result<()> {
        self.call_vm(&scripts::STOP_VM, vm, Vec::new()).map(drop)
    }

    pub fn delete(&self, vm: &str) -> Result<()> {
        self.call_vm(&scripts::DELETE_VM, vm, Vec::new()).map(drop)
    }

    pub fn version(&self) -> Result<String> {
        Ok(self.call(&scripts::APP_VERSION, Vec::new())?.trim().to_string())
    }

    pub fn export(&self, vm: &str, output: &Path) -> Result<()> {
        self.call_vm(&scripts::EXPORT_VM, vm, vec![output.display().to_string()])
            .map(drop)
    }

    pub fn import(&self, bundle: &Path) -> Result<Uuid> {
        let out = self.call(&scripts::IMPORT_VM, vec![bundle.display().to_string()])?;
        parse_uuid(scripts::IMPORT_VM.name, out.trim())
    }
}

/// Parse the line protocol printed by the inspect script.
pub fn parse_vm_info(out: &str) -> Result<VmInfo> {
    let script = scripts::INSPECT_VM.name;
    let mut info: Option<VmInfo> = None;
    let mut forwards: Vec<(usize, PortForward)> = Vec::new();

    for line in out.lines().filter(|l| !l.trim().is_empty()) {
        let f: Vec<&str> = line.split('\t').collect();
        match f.as_slice() {
            ["vm", id, name, status, backend, ..] => {
                info = Some(VmInfo {
                    uuid: parse_uuid(script, id)?,
                    name: name.to_string(),
                    state: RunState::from_bridge(status),
                    backend: Backend::from_bridge(backend)?,
                    arch: None,
                    drives: Vec::new(),
                    interfaces: Vec::new(),
                });
            }
            ["arch", arch] => {
                let vm = info.as_mut().ok_or_else(|| unexpected(script, line))?;
                vm.arch = Some(Arch::from_emulator_arch(arch)?);
            }
            ["drive", interface, removable, size] => {
                let vm = info.as_mut().ok_or_else(|| unexpected(script, line))?;
                vm.drives.push(Drive {
                    interface: if interface.is_empty() {
                        None
                    } else {
                        Some(DriveInterface::from_bridge(interface)?)
                    },
                    removable: *removable == "true",
                    size_mib: size.parse().ok(),
                });
            }
            ["net", index, mode] => {
                let vm = info.as_mut().ok_or_else(|| unexpected(script, line))?;
                vm.interfaces.push(NetworkInterface {
                    index: parse_num(script, line, index)?,
                    mode: NetworkMode::from_bridge(mode)?,
                    forwards: Vec::new(),
                });
            }
            ["fwd", index, protocol, guest_addr, guest_port, host_addr, host_port] => {
                forwards.push((
                    parse_num(script, line, index)?,
                    PortForward {
                        protocol: Protocol::from_bridge(protocol)?,
                        guest_address: (!guest_addr.is_empty()).then(|| guest_addr.to_string()),
                        guest_port: parse_num(script, line, guest_port)?,
                        host_address: host_addr.to_string(),
                        host_port: parse_num(script, line, host_port)?,
                    },
                ));
            }
            _ => return Err(unexpected(script, line)),
        }
    }

    let mut info = info.ok_or_else(|| unexpected(script, out))?;
    for (index, rule) in forwards {
        match info.interfaces.iter_mut().find(|n| n.index == index) {
            Some(nic) => nic.forwards.push(rule),
            None => return Err(unexpected(script, &format!("forward for missing interface {index}"))),
        }
    }
    Ok(info)
}

fn code_or_empty(interface: Option<DriveInterface>) -> String {
    interface.map(|i| i.code().to_string()).unwrap_or_default()
}

fn parse_uuid(script: &str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| unexpected(script, raw))
}

fn parse_num<T: std::str::FromStr>(script: &str, line: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| unexpected(script, line))
}

fn unexpected(script: &str, output: &str) -> UvmError {
    UvmError::Bridge {
        script: script.to_string(),
        message: format!("unexpected output: {output:?}"),
    }
}
