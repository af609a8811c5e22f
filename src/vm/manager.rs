//! VM lifecycle management

use crate::bridge::codes::RunState;
use crate::bridge::utm::Utm;
use crate::bridge::Bridge;
use crate::error::UvmError;
use crate::vm::instance::{vm_ref, VmInfo, VmSummary};
use crate::Result;
use std::io::{self, BufRead, Write};
use tracing::info;

/// VM Manager for lifecycle operations
pub struct VmManager<'a> {
    utm: Utm<'a>,
}

impl<'a> VmManager<'a> {
    pub fn new(bridge: &'a dyn Bridge) -> Self {
        Self {
            utm: Utm::new(bridge),
        }
    }

    /// Resolve a name or UUID to a known VM.
    pub fn resolve(&self, ident: &str) -> Result<VmSummary> {
        self.utm.find(ident)?.ok_or_else(|| UvmError::VmNotFound {
            vm: ident.to_string(),
        })
    }

    pub fn list(&self) -> Result<Vec<VmSummary>> {
        self.utm.list()
    }

    pub fn status(&self, ident: &str) -> Result<VmInfo> {
        let vm = self.resolve(ident)?;
        self.utm.inspect(&vm_ref(&vm.uuid))
    }

    /// Start a VM; a running VM is left alone.
    pub fn start_vm(&self, ident: &str) -> Result<()> {
        let vm = self.resolve(ident)?;
        if vm.state == RunState::Running {
            info!(vm = %vm.name, "already running");
            return Ok(());
        }
        self.utm.start(&vm_ref(&vm.uuid))?;
        info!(vm = %vm.name, "started");
        Ok(())
    }

    /// Stop a VM; a stopped VM is left alone.
    pub fn stop_vm(&self, ident: &str) -> Result<()> {
        let vm = self.resolve(ident)?;
        if vm.state == RunState::Stopped {
            info!(vm = %vm.name, "already stopped");
            return Ok(());
        }
        self.utm.stop(&vm_ref(&vm.uuid))?;
        info!(vm = %vm.name, "stopped");
        Ok(())
    }

    /// Delete a VM by name or UUID. Returns false when the user declined.
    pub fn delete_vm(&self, ident: &str, force: bool) -> Result<bool> {
        self.delete_vm_with(ident, force, &mut io::stdin().lock(), &mut io::stdout())
    }

    fn delete_vm_with(
        &self,
        ident: &str,
        force: bool,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<bool> {
        let vm = self.resolve(ident)?;

        if vm.state == RunState::Running {
            return Err(UvmError::VmRunning { vm: vm.name });
        }

        if !force {
            let info = self.utm.inspect(&vm_ref(&vm.uuid))?;
            let mut prompt = || -> io::Result<String> {
                writeln!(output, "About to delete VM '{}':", info.name)?;
                writeln!(output, "  UUID: {}", vm_ref(&info.uuid))?;
                writeln!(output, "  Backend: {}", info.backend)?;
                for drive in info.drives.iter().filter(|d| !d.removable) {
                    if let Some(size) = drive.size_mib {
                        writeln!(output, "  Disk: {size} MiB")?;
                    }
                }
                writeln!(output)?;
                write!(output, "Are you sure you want to delete this VM? [y/N]: ")?;
                output.flush()?;

                let mut answer = String::new();
                input.read_line(&mut answer)?;
                Ok(answer)
            };
            let answer = prompt().map_err(|e| UvmError::io("reading confirmation", e))?;

            if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
                let _ = writeln!(output, "Deletion cancelled.");
                return Ok(false);
            }
        }

        self.utm.delete(&vm_ref(&vm.uuid))?;
        info!(vm = %vm.name, "deleted");
        Ok(true)
    }
}
