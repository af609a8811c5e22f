//! Path utility functions and the process-wide paths configuration

use crate::error::UvmError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application bundle name inside a uvm home.
pub const APP_BUNDLE: &str = "UTM.app";
/// Per-project directory, relative to the project root.
pub const PROJECT_DIR: &str = ".uvm";
pub const MEDIA_DIR: &str = "media";
pub const SHARED_DIR: &str = "shared";

/// Where uvm finds the application, VMs, media, and the shared folder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub version: u32,
    pub generated: String,
    pub app_path: PathBuf,
    pub vm_dir: PathBuf,
    pub media_cache_dir: PathBuf,
    pub shared_dir: PathBuf,
}

/// Get the uvm home directory path (`$UVM_HOME`, else `~/uvm`)
pub fn uvm_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("UVM_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| UvmError::Config {
            message: "no home directory found".into(),
        })?
        .join("uvm"))
}

/// Resolve path under root directory
pub fn resolve_under_root(root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Get persisted paths configuration file path
pub fn conf_path(home: &Path) -> PathBuf {
    home.join("paths.json")
}

/// Per-project asset directory
pub fn project_dir(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR)
}

/// UTM's sandboxed document folder, where it keeps `.utm` bundles.
pub fn utm_documents_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join("Library/Containers/com.utmapp.UTM/Data/Documents")
}

impl PathsConfig {
    fn layout(base: &Path) -> Self {
        Self {
            version: 1,
            generated: crate::utils::system::now_utc(),
            app_path: base.join(APP_BUNDLE),
            vm_dir: utm_documents_dir(),
            media_cache_dir: base.join(MEDIA_DIR),
            shared_dir: base.join(SHARED_DIR),
        }
    }

    /// Shared layout under the uvm home.
    pub fn global(home: &Path) -> Self {
        Self::layout(home)
    }

    /// Legacy layout under `<project>/.uvm`.
    pub fn project(project_root: &Path) -> Self {
        Self::layout(&project_dir(project_root))
    }

    /// Persisted config, else the project layout if it holds the app, else global.
    pub fn resolve(project_root: &Path, home: &Path, app_override: Option<&Path>) -> Result<Self> {
        let mut cfg = if conf_path(home).is_file() {
            crate::config::store::load_paths(home)?
        } else {
            let local = Self::project(project_root);
            if local.app_path.exists() {
                local
            } else {
                Self::global(home)
            }
        };
        if let Some(app) = app_override {
            cfg.app_path = resolve_under_root(project_root, app);
        }
        Ok(cfg)
    }

    /// Resolve from the current directory and environment.
    pub fn from_env(app_override: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| UvmError::io("reading current directory", e))?;
        Self::resolve(&cwd, &uvm_home()?, app_override)
    }

    pub fn utmctl_path(&self) -> PathBuf {
        self.app_path.join("Contents/MacOS/utmctl")
    }

    /// True when assets still live in the per-project directory.
    pub fn is_project_local(&self, project_root: &Path) -> bool {
        self.app_path.starts_with(project_dir(project_root))
            || self.media_cache_dir.starts_with(project_dir(project_root))
    }
}
