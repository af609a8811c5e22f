//! Template gallery
//!
//! Loaded once from the manifest compiled into the binary and never mutated
//! afterwards. Filters hand out owned copies.

use crate::bridge::codes::Arch;
use crate::config::schema::{GalleryEntry, Manifest, OsFamily};
use crate::error::UvmError;
use crate::Result;
use std::collections::HashSet;

/// Manifest shipped with the binary.
pub const BUNDLED_MANIFEST: &str = include_str!("manifest.json");

const SUPPORTED_MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Parse the bundled manifest.
    pub fn load() -> Result<Self> {
        Self::from_json(BUNDLED_MANIFEST)
    }

    /// Parse and validate a manifest document. Any bad entry fails the whole load.
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(text).map_err(|e| UvmError::Manifest {
            message: e.to_string(),
        })?;

        if manifest.version != SUPPORTED_MANIFEST_VERSION {
            return Err(UvmError::Manifest {
                message: format!(
                    "manifest version {} is not supported (expected {SUPPORTED_MANIFEST_VERSION})",
                    manifest.version
                ),
            });
        }

        let mut seen = HashSet::new();
        for entry in &manifest.templates {
            validate(entry)?;
            if !seen.insert(entry.key.as_str()) {
                return Err(UvmError::Manifest {
                    message: format!("duplicate template key '{}'", entry.key),
                });
            }
        }

        Ok(Self {
            entries: manifest.templates,
        })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Result<&GalleryEntry> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .ok_or_else(|| UvmError::TemplateNotFound {
                key: key.to_string(),
            })
    }

    pub fn filter_by_os(&self, os: OsFamily) -> Vec<GalleryEntry> {
        self.entries.iter().filter(|e| e.os == os).cloned().collect()
    }

    pub fn filter_by_arch(&self, arch: Arch) -> Vec<GalleryEntry> {
        self.entries
            .iter()
            .filter(|e| e.arch == arch)
            .cloned()
            .collect()
    }
}

fn validate(entry: &GalleryEntry) -> Result<()> {
    let fail = |message: String| {
        Err(UvmError::Manifest {
            message: format!("template '{}': {message}", entry.key),
        })
    };

    if entry.key.trim().is_empty() {
        return Err(UvmError::Manifest {
            message: "template with empty key".into(),
        });
    }
    if entry.name.trim().is_empty() {
        return fail("empty name".into());
    }
    if entry.version.trim().is_empty() {
        return fail("empty version".into());
    }
    let hw = &entry.hardware;
    if hw.ram_mb == 0 || hw.disk_mb == 0 || hw.cpus == 0 {
        return fail("hardware values must be positive".into());
    }
    if !is_http(&entry.media.url) {
        return fail(format!("media url '{}' is not http(s)", entry.media.url));
    }
    if entry.media.size == Some(0) {
        return fail("media size must be positive".into());
    }
    match (&entry.media.checksum, &entry.media.checksum_url) {
        (None, None) => return fail("media needs a checksum or a checksum_url".into()),
        (Some(pinned), _) => {
            if let Err(e) = crate::vm::media::Checksum::parse(pinned) {
                return fail(e.to_string());
            }
        }
        (None, Some(_)) => {}
    }
    if let Some(url) = &entry.media.checksum_url {
        if !is_http(url) {
            return fail(format!("checksum url '{url}' is not http(s)"));
        }
    }
    Ok(())
}

fn is_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}
