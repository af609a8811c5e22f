//! Guest command execution and file transfer through `utmctl`
//!
//! Everything here needs the VM to be running with its guest agent up.
//! There is no built-in deadline unless the [`Utmctl`] was given one.

mod utmctl;

pub use utmctl::Utmctl;

use crate::bridge::codes::RunState;
use crate::error::UvmError;
use crate::Result;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Where the guest's stdout goes during `exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestOutput {
    Inherit,
    Discard,
}

/// The companion control utility's operations.
pub trait ControlUtility {
    fn status(&self, vm: &str) -> Result<RunState>;
    /// Run `argv` in the guest and return its exit code.
    fn exec(&self, vm: &str, argv: &[String], output: GuestOutput) -> Result<i32>;
    fn push(&self, vm: &str, source: &mut (dyn Read + Send), remote: &str) -> Result<u64>;
    fn pull(&self, vm: &str, remote: &str, sink: &mut (dyn Write + Send)) -> Result<u64>;
    fn ip_addresses(&self, vm: &str) -> Result<Vec<String>>;
}

/// Shell used to interpret command strings inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestShell {
    #[default]
    Posix,
    Windows,
}

impl GuestShell {
    pub fn wrap(&self, command: &str) -> Vec<String> {
        match self {
            GuestShell::Posix => vec!["/bin/sh".into(), "-c".into(), command.into()],
            GuestShell::Windows => vec!["cmd.exe".into(), "/C".into(), command.into()],
        }
    }

    /// Build one command line from CLI arguments. A lone argument is taken as
    /// a command line already; otherwise each argument is quoted so it
    /// reaches the guest as a single word.
    pub fn command_line(&self, args: &[String]) -> String {
        if let [only] = args {
            return only.clone();
        }
        args.iter()
            .map(|a| self.quote(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn quote(&self, arg: &str) -> String {
        match self {
            GuestShell::Posix => {
                let plain = !arg.is_empty()
                    && arg
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
                if plain {
                    arg.to_string()
                } else {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                }
            }
            GuestShell::Windows => {
                if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
                    arg.to_string()
                } else {
                    format!("\"{}\"", arg.replace('"', "\\\""))
                }
            }
        }
    }

    /// Command that exits 0 as soon as the agent can run anything.
    fn noop(&self) -> &'static str {
        match self {
            GuestShell::Posix => "true",
            GuestShell::Windows => "exit 0",
        }
    }
}

/// VM-name-addressed exec/push/pull.
pub struct Guest<'a> {
    ctl: &'a dyn ControlUtility,
    shell: GuestShell,
}

impl<'a> Guest<'a> {
    pub fn new(ctl: &'a dyn ControlUtility, shell: GuestShell) -> Self {
        Self { ctl, shell }
    }

    fn ensure_running(&self, vm: &str) -> Result<()> {
        match self.ctl.status(vm)? {
            RunState::Running => Ok(()),
            state => Err(UvmError::NotResponding {
                vm: vm.to_string(),
                reason: format!("VM is {state}, not running"),
            }),
        }
    }

    /// Run a command string in the guest shell, streaming its output.
    pub fn exec(&self, vm: &str, command: &str) -> Result<i32> {
        self.ensure_running(vm)?;
        debug!(vm, command, "guest exec");
        self.ctl.exec(vm, &self.shell.wrap(command), GuestOutput::Inherit)
    }

    /// Check that the agent answers.
    pub fn probe(&self, vm: &str) -> Result<()> {
        self.ensure_running(vm)?;
        let code = self
            .ctl
            .exec(vm, &self.shell.wrap(self.shell.noop()), GuestOutput::Discard)?;
        if code == 0 {
            Ok(())
        } else {
            Err(UvmError::NotResponding {
                vm: vm.to_string(),
                reason: format!("probe command exited with {code}"),
            })
        }
    }

    pub fn push(&self, vm: &str, local: &Path, remote: &str) -> Result<u64> {
        self.ensure_running(vm)?;
        let mut file = File::open(local).map_err(|e| UvmError::Transfer {
            vm: vm.to_string(),
            path: local.display().to_string(),
            message: e.to_string(),
        })?;
        let bytes = self.ctl.push(vm, &mut file, remote)?;
        info!(vm, local = %local.display(), remote, bytes, "pushed file");
        Ok(bytes)
    }

    /// Creates or truncates `local`; a failed pull leaves no file behind.
    pub fn pull(&self, vm: &str, remote: &str, local: &Path) -> Result<u64> {
        self.ensure_running(vm)?;
        let file = File::create(local).map_err(|e| UvmError::Transfer {
            vm: vm.to_string(),
            path: local.display().to_string(),
            message: e.to_string(),
        })?;
        let mut sink = BufWriter::new(file);
        let result = self.ctl.pull(vm, remote, &mut sink).and_then(|bytes| {
            sink.flush()
                .map_err(|e| UvmError::io(format!("writing {}", local.display()), e))?;
            Ok(bytes)
        });
        match result {
            Ok(bytes) => {
                info!(vm, remote, local = %local.display(), bytes, "pulled file");
                Ok(bytes)
            }
            Err(e) => {
                drop(sink);
                let _ = fs::remove_file(local);
                Err(e)
            }
        }
    }
}
