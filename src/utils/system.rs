//! System utility functions

use crate::error::UvmError;
use crate::Result;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// Get current UTC timestamp in RFC3339 format
pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Wait for a child, killing it once `timeout` has passed.
pub fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>, what: &str) -> Result<ExitStatus> {
    let Some(limit) = timeout else {
        return child
            .wait()
            .map_err(|e| UvmError::io(format!("waiting for {what}"), e));
    };

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() >= limit => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(UvmError::Timeout {
                    what: what.to_string(),
                    secs: limit.as_secs(),
                });
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Err(UvmError::io(format!("waiting for {what}"), e)),
        }
    }
}

/// Numeric comparison of dotted versions ("4.10" > "4.6.2").
pub fn version_at_least(installed: &str, required: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.trim()
            .split(|c: char| c == '.' || c == '-' || c == ' ')
            .map_while(|p| p.parse().ok())
            .collect()
    }
    let (have, need) = (parts(installed), parts(required));
    let len = have.len().max(need.len());
    for i in 0..len {
        let (h, n) = (
            have.get(i).copied().unwrap_or(0),
            need.get(i).copied().unwrap_or(0),
        );
        if h != n {
            return h > n;
        }
    }
    true
}
