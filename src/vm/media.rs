//! Installation media retrieval and verification

use crate::config::schema::GalleryEntry;
use crate::error::UvmError;
use crate::Result;
use sha2::{Digest, Sha256, Sha512};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

/// A manifest checksum, `sha256:<hex>` or `sha512:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: Algorithm,
    pub hex: String,
}

impl Checksum {
    pub fn parse(raw: &str) -> Result<Self> {
        let (algo, hex) = raw.split_once(':').ok_or_else(|| UvmError::Manifest {
            message: format!("checksum '{raw}' must look like <algorithm>:<hex>"),
        })?;
        let (algorithm, len) = match algo {
            "sha256" => (Algorithm::Sha256, 64),
            "sha512" => (Algorithm::Sha512, 128),
            other => {
                return Err(UvmError::Manifest {
                    message: format!("unsupported checksum algorithm '{other}'"),
                })
            }
        };
        if hex.len() != len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UvmError::Manifest {
                message: format!("checksum '{raw}' is not {len} hex digits"),
            });
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Hash a file with this checksum's algorithm.
    pub fn digest_file(&self, path: &Path) -> Result<String> {
        let mut f = File::open(path)
            .map_err(|e| UvmError::io(format!("opening {}", path.display()), e))?;
        let hashed = match self.algorithm {
            Algorithm::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(&mut f, &mut hasher).map(|_| format!("{:x}", hasher.finalize()))
            }
            Algorithm::Sha512 => {
                let mut hasher = Sha512::new();
                io::copy(&mut f, &mut hasher).map(|_| format!("{:x}", hasher.finalize()))
            }
        };
        hashed.map_err(|e| UvmError::io(format!("hashing {}", path.display()), e))
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let algo = match self.algorithm {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        };
        write!(f, "{algo}:{}", self.hex)
    }
}

impl Algorithm {
    /// Digest width as `shasum -a` takes it.
    pub fn bits(&self) -> u16 {
        match self {
            Algorithm::Sha256 => 256,
            Algorithm::Sha512 => 512,
        }
    }

    /// Guess from a checksum list's name (`SHA512SUMS`), defaulting to SHA-256.
    pub fn from_list_url(url: &str) -> Self {
        if url.to_ascii_uppercase().contains("SHA512") {
            Algorithm::Sha512
        } else {
            Algorithm::Sha256
        }
    }
}

/// Find `file` in a publisher checksum list.
///
/// Understands GNU coreutils lines (`<hex>  [*]<file>`) and BSD tagged lines
/// (`SHA256 (<file>) = <hex>`). Anything else, such as PGP armor or comments,
/// is ignored.
pub fn find_in_list(list: &str, file: &str) -> Option<Checksum> {
    list.lines().find_map(|line| {
        let line = line.trim();
        let (algo, name, hex) = if let Some((tag, rest)) = line.split_once(" (") {
            let (name, hex) = rest.split_once(") = ")?;
            (tag.to_ascii_lowercase(), name, hex)
        } else {
            let (hex, name) = line.split_once(char::is_whitespace)?;
            let algo = match hex.len() {
                64 => "sha256",
                128 => "sha512",
                _ => return None,
            };
            (algo.to_string(), name.trim_start(), hex)
        };
        let name = name.trim_start_matches('*').trim_start_matches("./");
        if name != file {
            return None;
        }
        Checksum::parse(&format!("{algo}:{}", hex.trim())).ok()
    })
}

/// The checksum a template's media must match: the pinned value, else the
/// file's entry in the publisher's list.
pub fn expected_checksum(fetcher: &dyn MediaFetcher, entry: &GalleryEntry) -> Result<Checksum> {
    if let Some(pinned) = &entry.media.checksum {
        return Checksum::parse(pinned);
    }
    let url = entry.media.checksum_url.as_deref().ok_or_else(|| UvmError::Manifest {
        message: format!("template '{}' has no checksum", entry.key),
    })?;
    let file = entry.media_file_name();
    let list = fetcher.fetch_text(url)?;
    let checksum = find_in_list(&list, &file).ok_or_else(|| UvmError::Download {
        url: url.to_string(),
        message: format!("no checksum listed for {file}"),
    })?;
    debug!(%url, %file, %checksum, "checksum from publisher list");
    Ok(checksum)
}

/// Fails with `Integrity` unless `path` hashes to `expected`.
pub fn verify(path: &Path, expected: &str) -> Result<()> {
    verify_checksum(path, &Checksum::parse(expected)?)
}

pub fn verify_checksum(path: &Path, checksum: &Checksum) -> Result<()> {
    let actual = checksum.digest_file(path)?;
    if actual == checksum.hex {
        Ok(())
    } else {
        Err(UvmError::Integrity {
            path: path.to_path_buf(),
            expected: checksum.to_string(),
            actual: Checksum {
                algorithm: checksum.algorithm,
                hex: actual,
            }
            .to_string(),
        })
    }
}

/// `<cache>/<key>/<version>/<file>`
pub fn cache_path(cache_dir: &Path, entry: &GalleryEntry) -> PathBuf {
    cache_dir
        .join(&entry.key)
        .join(&entry.version)
        .join(entry.media_file_name())
}

/// Makes installation media for a template available on disk.
pub trait MediaFetcher {
    /// Return a local path to the media, downloading it if needed. No verification.
    fn fetch(&self, entry: &GalleryEntry, cache_dir: &Path) -> Result<PathBuf>;

    /// Fetch a small text document such as a checksum list.
    fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Downloads over HTTP(S) into the media cache.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(None::<std::time::Duration>)
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new()),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, entry: &GalleryEntry, cache_dir: &Path) -> Result<PathBuf> {
        let dest = cache_path(cache_dir, entry);
        if dest.is_file() {
            info!(path = %dest.display(), "using cached installation media");
            return Ok(dest);
        }
        let dir = dest.parent().unwrap_or(cache_dir);
        fs::create_dir_all(dir)
            .map_err(|e| UvmError::io(format!("creating {}", dir.display()), e))?;

        let url = &entry.media.url;
        info!(%url, bytes = ?entry.media.size, "downloading installation media");
        let download_err = |message: String| UvmError::Download {
            url: url.clone(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        // Written next to the destination so the final rename stays on one filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| UvmError::io(format!("creating temp file in {}", dir.display()), e))?;
        let written = response
            .copy_to(&mut tmp)
            .map_err(|e| download_err(e.to_string()))?;
        if let Some(expected) = entry.media.size.filter(|&size| size != written) {
            warn!(expected, written, "media size differs from manifest");
        }
        tmp.persist(&dest)
            .map_err(|e| UvmError::io(format!("saving {}", dest.display()), e.error))?;

        info!(path = %dest.display(), "installation media cached");
        Ok(dest)
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        let download_err = |message: String| UvmError::Download {
            url: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }
        response.text().map_err(|e| download_err(e.to_string()))
    }
}

/// Fetch and verify. A file that fails verification is removed from the cache.
pub fn ensure_media(fetcher: &dyn MediaFetcher, entry: &GalleryEntry, cache_dir: &Path) -> Result<PathBuf> {
    let expected = expected_checksum(fetcher, entry)?;
    let path = fetcher.fetch(entry, cache_dir)?;
    if let Err(e) = verify_checksum(&path, &expected) {
        if matches!(e, UvmError::Integrity { .. }) && path.starts_with(cache_dir) {
            let _ = fs::remove_file(&path);
        }
        return Err(e);
    }
    Ok(path)
}
