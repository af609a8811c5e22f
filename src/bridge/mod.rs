//! Scripting bridge to the UTM application
//!
//! All AppleScript text lives in [`scripts`]; all four-character codes live in
//! [`codes`]. Callers above this module only see typed values through
//! [`utm::Utm`].

pub mod codes;
pub mod scripts;
pub mod utm;

use crate::error::UvmError;
use crate::Result;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// A named AppleScript program that takes positional string arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script {
    pub name: &'static str,
    pub body: &'static str,
}

/// Runs a script against the host application and returns what it printed.
pub trait Bridge {
    fn run(&self, script: &Script, args: &[String]) -> Result<String>;
}

/// Bridge backed by `osascript`, reading the program from stdin.
pub struct OsaScript {
    program: PathBuf,
}

impl OsaScript {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Find `osascript` on PATH, falling back to the system location.
    pub fn locate() -> Self {
        let program = which::which("osascript").unwrap_or_else(|_| PathBuf::from("/usr/bin/osascript"));
        Self::new(program)
    }
}

impl Bridge for OsaScript {
    fn run(&self, script: &Script, args: &[String]) -> Result<String> {
        debug!(script = script.name, ?args, "running bridge script");

        let mut child = Command::new(&self.program)
            .arg("-")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| UvmError::io(format!("spawning {}", self.program.display()), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            let source = format!("{}\n{}", scripts::PRELUDE, script.body);
            stdin
                .write_all(source.as_bytes())
                .map_err(|e| UvmError::io("writing script to osascript", e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| UvmError::io("waiting for osascript", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            Err(classify_failure(
                script.name,
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }
}

/// Turn interpreter diagnostics into a typed error.
pub fn classify_failure(script: &str, stderr: &str) -> UvmError {
    let denied = stderr.contains("(-1743)")
        || stderr.contains("(-1744)")
        || stderr.contains("Not authorized to send Apple events");
    if denied {
        UvmError::PermissionDenied {
            message: stderr.to_string(),
        }
    } else {
        UvmError::Bridge {
            script: script.to_string(),
            message: if stderr.is_empty() {
                "no diagnostic output".to_string()
            } else {
                stderr.to_string()
            },
        }
    }
}

/// True for failures UTM reports when a step has already been applied.
pub fn is_already_configured(err: &UvmError) -> bool {
    match err {
        UvmError::Bridge { message, .. } => message.to_lowercase().contains("already"),
        _ => false,
    }
}
