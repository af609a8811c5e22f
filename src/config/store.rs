//! Persisted paths configuration

use crate::error::UvmError;
use crate::utils::paths::{conf_path, PathsConfig};
use crate::Result;
use std::fs::{self, File};
use std::path::Path;

/// Save paths configuration to `<home>/paths.json`
pub fn save_paths(home: &Path, cfg: &PathsConfig) -> Result<()> {
    fs::create_dir_all(home).map_err(|e| UvmError::io(format!("creating {}", home.display()), e))?;
    let path = conf_path(home);
    let f = File::create(&path).map_err(|e| UvmError::io(format!("creating {}", path.display()), e))?;
    serde_json::to_writer_pretty(f, cfg).map_err(|e| UvmError::Config {
        message: format!("writing {}: {e}", path.display()),
    })?;
    Ok(())
}

/// Load paths configuration from `<home>/paths.json`
pub fn load_paths(home: &Path) -> Result<PathsConfig> {
    let path = conf_path(home);
    let f = File::open(&path).map_err(|e| UvmError::io(format!("opening {}", path.display()), e))?;
    serde_json::from_reader(f).map_err(|e| UvmError::Config {
        message: format!("parsing {}: {e}", path.display()),
    })
}
