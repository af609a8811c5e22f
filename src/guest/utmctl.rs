//! `utmctl` process wrapper

use super::{ControlUtility, GuestOutput};
use crate::bridge::codes::RunState;
use crate::error::UvmError;
use crate::utils::paths::PathsConfig;
use crate::utils::system::wait_with_deadline;
use crate::Result;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// One external process per call; nothing is shared between calls.
pub struct Utmctl {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Utmctl {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            timeout: None,
        }
    }

    /// Prefer the copy inside the configured app bundle, then PATH.
    pub fn from_paths(paths: &PathsConfig) -> Self {
        let bundled = paths.utmctl_path();
        let program = if bundled.is_file() {
            bundled
        } else {
            which::which("utmctl").unwrap_or(bundled)
        };
        Self::new(program)
    }

    /// Kill the child and fail with `Timeout` after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!(program = %self.program.display(), ?args, "running utmctl");
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn spawn_err(&self, e: io::Error) -> UvmError {
        UvmError::io(format!("spawning {}", self.program.display()), e)
    }

    /// Run to completion and capture stdout.
    fn capture(&self, vm: &str, args: &[&str]) -> Result<String> {
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_err(e))?;

        let (stdout, stderr, status) = thread::scope(|s| {
            let out = child.stdout.take().map(|p| s.spawn(move || read_all(p)));
            let err = child.stderr.take().map(|p| s.spawn(move || read_all(p)));
            let status = wait_with_deadline(&mut child, self.timeout, "utmctl");
            (join(out), join(err), status)
        });
        let status = status?;
        if status.success() {
            Ok(stdout)
        } else {
            Err(classify(vm, args.first().copied().unwrap_or("utmctl"), &stderr))
        }
    }
}

impl ControlUtility for Utmctl {
    fn status(&self, vm: &str) -> Result<RunState> {
        let out = self.capture(vm, &["status", vm])?;
        Ok(RunState::from_bridge(out.trim()))
    }

    fn exec(&self, vm: &str, argv: &[String], output: GuestOutput) -> Result<i32> {
        let mut args = vec!["exec", vm, "--cmd"];
        args.extend(argv.iter().map(String::as_str));
        let mut child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(match output {
                GuestOutput::Inherit => Stdio::inherit(),
                GuestOutput::Discard => Stdio::null(),
            })
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_err(e))?;

        // Forward stderr line by line while watching for agent failures.
        let (agent_error, status) = thread::scope(|s| {
            let watcher = child.stderr.take().map(|pipe| {
                s.spawn(move || {
                    let mut agent_error = None;
                    let mut stderr = io::stderr();
                    for line in BufReader::new(pipe).lines().map_while(|l| l.ok()) {
                        if agent_error.is_none() && mentions_agent(&line) {
                            agent_error = Some(line.clone());
                        }
                        let _ = writeln!(stderr, "{line}");
                    }
                    agent_error
                })
            });
            let status = wait_with_deadline(&mut child, self.timeout, "guest command");
            (watcher.and_then(|h| h.join().ok()).flatten(), status)
        });
        let status = status?;

        match (status.success(), agent_error) {
            (false, Some(reason)) => Err(UvmError::NotResponding {
                vm: vm.to_string(),
                reason,
            }),
            _ => Ok(status.code().unwrap_or(-1)),
        }
    }

    fn push(&self, vm: &str, source: &mut (dyn Read + Send), remote: &str) -> Result<u64> {
        let mut child = self
            .command(&["file", "push", vm, remote])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_err(e))?;

        let mut stdin = child.stdin.take();
        let (copied, stderr, status) = thread::scope(|s| {
            let copier = s.spawn(move || match stdin.as_mut() {
                // stdin is dropped at the end of the closure, closing the pipe.
                Some(pipe) => io::copy(source, pipe),
                None => Ok(0),
            });
            let err = child.stderr.take().map(|p| s.spawn(move || read_all(p)));
            let status = wait_with_deadline(&mut child, self.timeout, "file push");
            (copier.join().ok(), join(err), status)
        });
        let status = status?;

        if !status.success() {
            return Err(transfer_failure(vm, remote, &stderr));
        }
        match copied {
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(UvmError::Transfer {
                vm: vm.to_string(),
                path: remote.to_string(),
                message: e.to_string(),
            }),
            None => Err(UvmError::Transfer {
                vm: vm.to_string(),
                path: remote.to_string(),
                message: "copy thread panicked".into(),
            }),
        }
    }

    fn pull(&self, vm: &str, remote: &str, sink: &mut (dyn Write + Send)) -> Result<u64> {
        let mut child = self
            .command(&["file", "pull", vm, remote])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_err(e))?;

        let stdout = child.stdout.take();
        let (copied, stderr, status) = thread::scope(|s| {
            let copier = s.spawn(move || match stdout {
                Some(mut pipe) => io::copy(&mut pipe, sink),
                None => Ok(0),
            });
            let err = child.stderr.take().map(|p| s.spawn(move || read_all(p)));
            let status = wait_with_deadline(&mut child, self.timeout, "file pull");
            (copier.join().ok(), join(err), status)
        });
        let status = status?;

        if !status.success() {
            return Err(transfer_failure(vm, remote, &stderr));
        }
        match copied {
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => Err(UvmError::Transfer {
                vm: vm.to_string(),
                path: remote.to_string(),
                message: e.to_string(),
            }),
            None => Err(UvmError::Transfer {
                vm: vm.to_string(),
                path: remote.to_string(),
                message: "copy thread panicked".into(),
            }),
        }
    }

    fn ip_addresses(&self, vm: &str) -> Result<Vec<String>> {
        let out = self.capture(vm, &["ip-address", vm])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

fn read_all(mut pipe: impl Read) -> String {
    let mut buf = String::new();
    let _ = pipe.read_to_string(&mut buf);
    buf
}

fn join(handle: Option<thread::ScopedJoinHandle<'_, String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn mentions_agent(line: &str) -> bool {
    let l = line.to_lowercase();
    l.contains("guest agent") || l.contains("qemu-ga")
}

fn classify(vm: &str, operation: &str, stderr: &str) -> UvmError {
    let message = stderr.trim();
    if mentions_agent(message) {
        UvmError::NotResponding {
            vm: vm.to_string(),
            reason: message.to_string(),
        }
    } else if message.to_lowercase().contains("virtual machine not found") {
        UvmError::VmNotFound { vm: vm.to_string() }
    } else {
        UvmError::Bridge {
            script: format!("utmctl {operation}"),
            message: message.to_string(),
        }
    }
}

fn transfer_failure(vm: &str, remote: &str, stderr: &str) -> UvmError {
    match classify(vm, "file", stderr) {
        UvmError::Bridge { message, .. } => UvmError::Transfer {
            vm: vm.to_string(),
            path: remote.to_string(),
            message,
        },
        other => other,
    }
}
