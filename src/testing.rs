//! In-memory stand-ins for UTM and utmctl used by unit tests

use crate::bridge::codes::{Backend, DriveInterface, NetworkMode, Protocol, RunState};
use crate::bridge::{scripts, Bridge, Script};
use crate::error::UvmError;
use crate::guest::{ControlUtility, GuestOutput};
use crate::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Write};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub uuid: Uuid,
    pub name: String,
    pub status: &'static str,
    pub backend: Backend,
    pub arch: String,
    pub cpus: u32,
    pub memory: u64,
    pub uefi: bool,
    pub drives: Vec<(Option<DriveInterface>, bool, Option<u64>)>,
    pub nics: Vec<(NetworkMode, Vec<FakeForward>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeForward {
    pub protocol: Protocol,
    pub guest_address: String,
    pub guest_port: u16,
    pub host_address: String,
    pub host_port: u16,
}

/// Simulates the UTM scripting dictionary.
#[derive(Default)]
pub struct FakeUtm {
    pub vms: RefCell<Vec<FakeVm>>,
    pub calls: RefCell<Vec<String>>,
    pub version: RefCell<String>,
    /// Script name that fails with a generic bridge error.
    pub fail_on: RefCell<Option<&'static str>>,
    pub deny_permission: RefCell<bool>,
}

impl FakeUtm {
    pub fn new() -> Self {
        let fake = Self::default();
        *fake.version.borrow_mut() = "4.6.4".into();
        fake
    }

    /// Register a stopped VM with a single shared-mode interface.
    pub fn add_vm(&self, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.vms.borrow_mut().push(FakeVm {
            uuid,
            name: name.to_string(),
            status: "StSa",
            backend: Backend::Qemu,
            arch: "aarch64".into(),
            cpus: 1,
            memory: 512,
            uefi: true,
            drives: Vec::new(),
            nics: vec![(NetworkMode::Shared, Vec::new())],
        });
        uuid
    }

    pub fn vm(&self, ident: &str) -> Option<FakeVm> {
        self.vms
            .borrow()
            .iter()
            .find(|vm| matches_ident(vm, ident))
            .cloned()
    }

    pub fn calls_to(&self, script: &Script) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| *c == script.name)
            .count()
    }

    fn with_vm<T>(&self, ident: &str, f: impl FnOnce(&mut FakeVm) -> T) -> Result<T> {
        let mut vms = self.vms.borrow_mut();
        let vm = vms
            .iter_mut()
            .find(|vm| matches_ident(vm, ident))
            .ok_or_else(|| UvmError::Bridge {
                script: "fake".into(),
                message: format!("execution error: Can't get virtual machine id \"{ident}\". (-1728)"),
            })?;
        Ok(f(vm))
    }
}

fn matches_ident(vm: &FakeVm, ident: &str) -> bool {
    vm.name == ident
        || Uuid::parse_str(ident)
            .map(|u| u == vm.uuid)
            .unwrap_or(false)
}

fn render_vm_line(vm: &FakeVm) -> String {
    format!(
        "vm\t{}\t{}\t{}\t{}\n",
        vm.uuid.to_string().to_uppercase(),
        vm.name,
        vm.status,
        vm.backend.code()
    )
}

impl Bridge for FakeUtm {
    fn run(&self, script: &Script, args: &[String]) -> Result<String> {
        self.calls.borrow_mut().push(script.name.to_string());
        if *self.deny_permission.borrow() {
            return Err(crate::bridge::classify_failure(
                script.name,
                "execution error: Not authorized to send Apple events to UTM. (-1743)",
            ));
        }
        if *self.fail_on.borrow() == Some(script.name) {
            return Err(UvmError::Bridge {
                script: script.name.into(),
                message: "simulated failure".into(),
            });
        }

        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let code = |i: usize| arg(i);

        match script.name {
            n if n == scripts::LIST_VMS.name => Ok(self
                .vms
                .borrow()
                .iter()
                .map(render_vm_line)
                .collect()),
            n if n == scripts::INSPECT_VM.name => self.with_vm(&arg(0), |vm| {
                let mut out = render_vm_line(vm);
                out.push_str(&format!("arch\t{}\n", vm.arch));
                for (iface, removable, size) in &vm.drives {
                    out.push_str(&format!(
                        "drive\t{}\t{}\t{}\n",
                        iface.map(|i| i.code()).unwrap_or(""),
                        removable,
                        size.map(|s| s.to_string()).unwrap_or_default()
                    ));
                }
                for (idx, (mode, fwds)) in vm.nics.iter().enumerate() {
                    out.push_str(&format!("net\t{idx}\t{}\n", mode.code()));
                    for f in fwds {
                        out.push_str(&format!(
                            "fwd\t{idx}\t{}\t{}\t{}\t{}\t{}\n",
                            f.protocol.code(),
                            f.guest_address,
                            f.guest_port,
                            f.host_address,
                            f.host_port
                        ));
                    }
                }
                out
            }),
            n if n == scripts::CREATE_VM.name => {
                let uuid = Uuid::new_v4();
                self.vms.borrow_mut().push(FakeVm {
                    uuid,
                    name: arg(0),
                    status: "StSa",
                    backend: Backend::from_code(&code(1))?,
                    arch: arg(2),
                    cpus: 1,
                    memory: 512,
                    uefi: false,
                    drives: Vec::new(),
                    nics: Vec::new(),
                });
                Ok(uuid.to_string().to_uppercase())
            }
            n if n == scripts::CONFIGURE_HARDWARE.name => self.with_vm(&arg(0), |vm| {
                vm.cpus = arg(1).parse().unwrap_or(0);
                vm.memory = arg(2).parse().unwrap_or(0);
                vm.uefi = arg(3) == "true";
                String::new()
            }),
            n if n == scripts::ADD_DRIVE.name || n == scripts::ATTACH_MEDIA.name => {
                let iface = if code(1).is_empty() {
                    None
                } else {
                    Some(DriveInterface::from_code(&code(1))?)
                };
                let removable = n == scripts::ATTACH_MEDIA.name;
                let size = if removable { None } else { arg(2).parse().ok() };
                self.with_vm(&arg(0), |vm| {
                    vm.drives.push((iface, removable, size));
                    String::new()
                })
            }
            n if n == scripts::ADD_NETWORK.name => {
                let mode = NetworkMode::from_code(&code(1))?;
                self.with_vm(&arg(0), |vm| {
                    vm.nics.push((mode, Vec::new()));
                    (vm.nics.len() - 1).to_string()
                })
            }
            n if n == scripts::ADD_PORT_FORWARD.name => {
                let fwd = FakeForward {
                    protocol: Protocol::from_code(&code(2))?,
                    guest_address: arg(3),
                    guest_port: arg(4).parse().unwrap_or(0),
                    host_address: arg(5),
                    host_port: arg(6).parse().unwrap_or(0),
                };
                let index: usize = arg(1).parse().unwrap_or(usize::MAX);
                self.with_vm(&arg(0), |vm| match vm.nics.get_mut(index) {
                    Some((_, fwds)) => {
                        fwds.push(fwd);
                        Ok(String::new())
                    }
                    None => Err(UvmError::Bridge {
                        script: n.into(),
                        message: "invalid index".into(),
                    }),
                })?
            }
            n if n == scripts::REMOVE_PORT_FORWARD.name => {
                let protocol = Protocol::from_code(&code(2))?;
                let port: u16 = arg(3).parse().unwrap_or(0);
                let index: usize = arg(1).parse().unwrap_or(usize::MAX);
                self.with_vm(&arg(0), |vm| {
                    if let Some((_, fwds)) = vm.nics.get_mut(index) {
                        fwds.retain(|f| !(f.protocol == protocol && f.guest_port == port));
                    }
                    String::new()
                })
            }
            n if n == scripts::START_VM.name => self.with_vm(&arg(0), |vm| {
                vm.status = "StSd";
                String::new()
            }),
            n if n == scripts::STOP_VM.name => self.with_vm(&arg(0), |vm| {
                vm.status = "StSa";
                String::new()
            }),
            n if n == scripts::DELETE_VM.name => {
                let ident = arg(0);
                self.with_vm(&ident, |_| ())?;
                self.vms.borrow_mut().retain(|vm| !matches_ident(vm, &ident));
                Ok(String::new())
            }
            n if n == scripts::APP_VERSION.name => Ok(self.version.borrow().clone()),
            n if n == scripts::EXPORT_VM.name => self.with_vm(&arg(0), |vm| {
                let _ = std::fs::write(arg(1), format!("{}\n", vm.name));
                String::new()
            }),
            n if n == scripts::IMPORT_VM.name => {
                let name = std::fs::read_to_string(arg(0)).map_err(|e| UvmError::Bridge {
                    script: n.into(),
                    message: e.to_string(),
                })?;
                let uuid = self.add_vm(name.trim());
                Ok(uuid.to_string())
            }
            other => Err(UvmError::Bridge {
                script: other.into(),
                message: "unknown script".into(),
            }),
        }
    }
}

/// Simulates utmctl with an in-memory guest filesystem.
#[derive(Default)]
pub struct FakeUtmctl {
    pub states: RefCell<HashMap<String, RunState>>,
    pub files: RefCell<HashMap<String, Vec<u8>>>,
    pub commands: RefCell<Vec<(String, Vec<String>)>>,
    pub addresses: RefCell<Vec<String>>,
    pub agent_down: RefCell<bool>,
}

impl FakeUtmctl {
    pub fn running(vm: &str) -> Self {
        let fake = Self::default();
        fake.states
            .borrow_mut()
            .insert(vm.to_string(), RunState::Running);
        fake
    }

    fn check_agent(&self, vm: &str) -> Result<()> {
        if *self.agent_down.borrow() {
            return Err(UvmError::NotResponding {
                vm: vm.into(),
                reason: "guest agent is not running".into(),
            });
        }
        Ok(())
    }
}

impl ControlUtility for FakeUtmctl {
    fn status(&self, vm: &str) -> Result<RunState> {
        self.states
            .borrow()
            .get(vm)
            .copied()
            .ok_or_else(|| UvmError::VmNotFound { vm: vm.into() })
    }

    fn exec(&self, vm: &str, argv: &[String], _output: GuestOutput) -> Result<i32> {
        self.check_agent(vm)?;
        self.commands
            .borrow_mut()
            .push((vm.to_string(), argv.to_vec()));
        Ok(if argv.last().map(|c| c.contains("false")).unwrap_or(false) {
            1
        } else {
            0
        })
    }

    fn push(&self, vm: &str, source: &mut (dyn Read + Send), remote: &str) -> Result<u64> {
        self.check_agent(vm)?;
        if !remote.starts_with('/') || remote.starts_with("/nonexistent/") {
            return Err(UvmError::Transfer {
                vm: vm.into(),
                path: remote.into(),
                message: "No such file or directory".into(),
            });
        }
        let mut buf = Vec::new();
        source
            .read_to_end(&mut buf)
            .map_err(|e| UvmError::io("reading push source", e))?;
        let n = buf.len() as u64;
        self.files.borrow_mut().insert(remote.to_string(), buf);
        Ok(n)
    }

    fn pull(&self, vm: &str, remote: &str, sink: &mut (dyn Write + Send)) -> Result<u64> {
        self.check_agent(vm)?;
        let files = self.files.borrow();
        let data = files.get(remote).ok_or_else(|| UvmError::Transfer {
            vm: vm.into(),
            path: remote.into(),
            message: "No such file or directory".into(),
        })?;
        sink.write_all(data)
            .map_err(|e| UvmError::io("writing pull sink", e))?;
        Ok(data.len() as u64)
    }

    fn ip_addresses(&self, _vm: &str) -> Result<Vec<String>> {
        Ok(self.addresses.borrow().clone())
    }
}
