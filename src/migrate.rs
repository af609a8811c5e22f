//! Move per-project assets into the shared uvm home

use crate::config::store::{load_paths, save_paths};
use crate::error::UvmError;
use crate::utils::paths::{conf_path, PathsConfig};
use crate::utils::system::now_utc;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What `migrate_all` did.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Destinations that were already in place.
    pub already_present: Vec<PathBuf>,
    pub paths: PathsConfig,
    /// True when `paths.json` was (re)written.
    pub persisted: bool,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.moved.is_empty() && !self.persisted
    }
}

/// Move `UTM.app` and the media cache from `<project>/.uvm` into `home`, then
/// point the persisted paths configuration at whatever now lives there.
///
/// The app bundle moves whole; if `home` already has one it must contain every
/// file of the project copy. The media cache is merged entry by entry, so an
/// existing (possibly empty) global cache still receives the project's files.
/// Fields of an existing `paths.json` are only changed for assets that came
/// from the project, and a second run does nothing.
pub fn migrate_all(project_root: &Path, home: &Path) -> Result<MigrationReport> {
    let local = PathsConfig::project(project_root);
    let global = PathsConfig::global(home);
    let existing = if conf_path(home).is_file() {
        Some(load_paths(home)?)
    } else {
        None
    };
    let mut paths = existing.clone().unwrap_or_else(|| global.clone());

    let mut moved = Vec::new();
    let mut already_present = Vec::new();

    if local.app_path.exists() {
        if global.app_path.exists() {
            ensure_complete(&local.app_path, &global.app_path)?;
            warn!(from = %local.app_path.display(), to = %global.app_path.display(), "app already in place, leaving project copy");
            already_present.push(global.app_path.clone());
        } else {
            move_path(&local.app_path, &global.app_path)?;
            info!(from = %local.app_path.display(), to = %global.app_path.display(), "moved");
            moved.push((local.app_path.clone(), global.app_path.clone()));
        }
        paths.app_path = global.app_path.clone();
    } else if global.app_path.exists() {
        already_present.push(global.app_path.clone());
    }

    if local.media_cache_dir.exists() {
        if global.media_cache_dir.exists() {
            let before = moved.len();
            merge_into(&local.media_cache_dir, &global.media_cache_dir, &mut moved)?;
            if moved.len() == before {
                already_present.push(global.media_cache_dir.clone());
            }
        } else {
            move_path(&local.media_cache_dir, &global.media_cache_dir)?;
            info!(from = %local.media_cache_dir.display(), to = %global.media_cache_dir.display(), "moved");
            moved.push((local.media_cache_dir.clone(), global.media_cache_dir.clone()));
        }
        paths.media_cache_dir = global.media_cache_dir.clone();
    } else if global.media_cache_dir.exists() {
        already_present.push(global.media_cache_dir.clone());
    }

    // Config is only touched once every move has gone through.
    let persisted = if existing.as_ref() != Some(&paths) {
        paths.generated = now_utc();
        save_paths(home, &paths)?;
        info!(path = %conf_path(home).display(), "paths configuration updated");
        true
    } else {
        false
    };

    Ok(MigrationReport {
        moved,
        already_present,
        paths,
        persisted,
    })
}

/// Fails unless every entry under `from` also exists under `to`.
fn ensure_complete(from: &Path, to: &Path) -> Result<()> {
    let mut missing = Vec::new();
    collect_missing(from, to, Path::new(""), &mut missing)?;
    match missing.first() {
        None => Ok(()),
        Some(first) => Err(UvmError::Config {
            message: format!(
                "{} exists but lacks {} entries from {} (first: {}); remove it and run `uvm migrate` again",
                to.display(),
                missing.len(),
                from.display(),
                first.display()
            ),
        }),
    }
}

fn collect_missing(from: &Path, to: &Path, rel: &Path, missing: &mut Vec<PathBuf>) -> Result<()> {
    for entry in read_entries(from)? {
        let name = entry.file_name();
        let src = entry.path();
        let dst = to.join(&name);
        if fs::symlink_metadata(&dst).is_err() {
            missing.push(rel.join(&name));
        } else if is_real_dir(&src) {
            collect_missing(&src, &dst, &rel.join(&name), missing)?;
        }
    }
    Ok(())
}

/// Move every entry of `from` that `to` lacks, descending into directories
/// present on both sides. Entries already at the destination stay in the
/// source; `from` is removed once it is empty.
fn merge_into(from: &Path, to: &Path, moved: &mut Vec<(PathBuf, PathBuf)>) -> Result<()> {
    for entry in read_entries(from)? {
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if fs::symlink_metadata(&dst).is_err() {
            move_path(&src, &dst)?;
            info!(from = %src.display(), to = %dst.display(), "moved");
            moved.push((src, dst));
        } else if is_real_dir(&src) && is_real_dir(&dst) {
            merge_into(&src, &dst, moved)?;
        } else {
            warn!(from = %src.display(), to = %dst.display(), "destination exists, leaving source in place");
        }
    }
    // Only succeeds when nothing was left behind.
    let _ = fs::remove_dir(from);
    Ok(())
}

fn read_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    fs::read_dir(dir)
        .and_then(|entries| entries.collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| UvmError::io(format!("listing {}", dir.display()), e))
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).map_or(false, |m| m.is_dir())
}

/// Rename, falling back to copy + remove across filesystems.
fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| UvmError::io(format!("creating {}", parent.display()), e))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    copy_recursive(from, to)?;
    let removed = if from.is_dir() {
        fs::remove_dir_all(from)
    } else {
        fs::remove_file(from)
    };
    removed.map_err(|e| UvmError::io(format!("removing {}", from.display()), e))
}

fn copy_recursive(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(from)
        .map_err(|e| UvmError::io(format!("reading {}", from.display()), e))?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(from)
            .map_err(|e| UvmError::io(format!("reading link {}", from.display()), e))?;
        return symlink(&target, to);
    }

    if meta.is_dir() {
        fs::create_dir_all(to).map_err(|e| UvmError::io(format!("creating {}", to.display()), e))?;
        for entry in read_entries(from)? {
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        return Ok(());
    }

    fs::copy(from, to)
        .map(drop)
        .map_err(|e| UvmError::io(format!("copying {} to {}", from.display(), to.display()), e))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| UvmError::io(format!("linking {}", link.display()), e))
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    fs::copy(target, link)
        .map(drop)
        .map_err(|e| UvmError::io(format!("copying {}", link.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::paths::{project_dir, APP_BUNDLE, MEDIA_DIR};
    use tempfile::TempDir;

    fn seed_project(root: &Path) {
        let app = project_dir(root).join(APP_BUNDLE).join("Contents/MacOS");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("utmctl"), b"#!/bin/sh\n").unwrap();
        let media = project_dir(root).join(MEDIA_DIR).join("debian-13-arm/13.1.0");
        fs::create_dir_all(&media).unwrap();
        fs::write(media.join("debian.iso"), b"iso").unwrap();
    }

    #[test]
    fn moves_assets_and_repoints_config() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());

        let report = migrate_all(project.path(), home.path()).unwrap();
        assert_eq!(report.moved.len(), 2);
        assert!(report.persisted);

        assert!(home.path().join("UTM.app/Contents/MacOS/utmctl").is_file());
        assert!(home
            .path()
            .join("media/debian-13-arm/13.1.0/debian.iso")
            .is_file());
        assert!(!project_dir(project.path()).join(APP_BUNDLE).exists());

        let saved = load_paths(home.path()).unwrap();
        assert_eq!(saved.app_path, home.path().join(APP_BUNDLE));
        assert_eq!(saved.media_cache_dir, home.path().join(MEDIA_DIR));

        let resolved = PathsConfig::resolve(project.path(), home.path(), None).unwrap();
        assert!(!resolved.is_project_local(project.path()));
    }

    #[test]
    fn second_run_is_a_noop() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());

        migrate_all(project.path(), home.path()).unwrap();
        let before = fs::read_to_string(conf_path(home.path())).unwrap();

        let again = migrate_all(project.path(), home.path()).unwrap();
        assert!(again.is_noop());
        assert_eq!(again.already_present.len(), 2);
        assert_eq!(fs::read_to_string(conf_path(home.path())).unwrap(), before);
    }

    #[test]
    fn complete_app_destination_is_not_overwritten() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());
        let app = home.path().join(APP_BUNDLE);
        fs::create_dir_all(app.join("Contents/MacOS")).unwrap();
        fs::write(app.join("Contents/MacOS/utmctl"), b"newer").unwrap();
        fs::write(app.join("marker"), b"keep").unwrap();

        let report = migrate_all(project.path(), home.path()).unwrap();
        assert_eq!(report.moved.len(), 1);
        assert_eq!(report.already_present, vec![app.clone()]);
        assert_eq!(fs::read(app.join("Contents/MacOS/utmctl")).unwrap(), b"newer");
        assert!(app.join("marker").is_file());
        assert!(project_dir(project.path()).join(APP_BUNDLE).exists());
        assert_eq!(report.paths.app_path, app);
    }

    #[test]
    fn incomplete_app_destination_fails_without_touching_config() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());
        fs::create_dir_all(home.path().join(APP_BUNDLE)).unwrap();

        let err = migrate_all(project.path(), home.path()).unwrap_err();
        assert!(matches!(err, UvmError::Config { .. }));
        assert!(err.to_string().contains("Contents"));
        assert!(!conf_path(home.path()).exists());
        assert!(project_dir(project.path()).join(APP_BUNDLE).exists());
    }

    #[test]
    fn media_merges_into_empty_global_cache() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());
        fs::create_dir_all(home.path().join(MEDIA_DIR)).unwrap();

        let report = migrate_all(project.path(), home.path()).unwrap();
        assert!(report.persisted);
        assert!(home
            .path()
            .join("media/debian-13-arm/13.1.0/debian.iso")
            .is_file());
        assert!(!project_dir(project.path()).join(MEDIA_DIR).exists());
        assert_eq!(
            load_paths(home.path()).unwrap().media_cache_dir,
            home.path().join(MEDIA_DIR)
        );
    }

    #[test]
    fn media_merge_keeps_existing_files() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        seed_project(project.path());
        let cached = home.path().join("media/debian-13-arm/13.1.0");
        fs::create_dir_all(&cached).unwrap();
        fs::write(cached.join("debian.iso"), b"global").unwrap();
        fs::create_dir_all(project_dir(project.path()).join("media/alpine/3.22")).unwrap();
        fs::write(
            project_dir(project.path()).join("media/alpine/3.22/alpine.iso"),
            b"alpine",
        )
        .unwrap();

        migrate_all(project.path(), home.path()).unwrap();
        assert_eq!(fs::read(cached.join("debian.iso")).unwrap(), b"global");
        assert!(home.path().join("media/alpine/3.22/alpine.iso").is_file());
        // The duplicate stays behind rather than being clobbered.
        assert!(project_dir(project.path())
            .join("media/debian-13-arm/13.1.0/debian.iso")
            .is_file());

        let again = migrate_all(project.path(), home.path()).unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn existing_config_keeps_unmoved_fields() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let media = project_dir(project.path()).join("media/debian-13-arm/13.1.0");
        fs::create_dir_all(&media).unwrap();
        fs::write(media.join("debian.iso"), b"iso").unwrap();

        let mut custom = PathsConfig::global(home.path());
        custom.app_path = PathBuf::from("/Applications/UTM.app");
        custom.media_cache_dir = project_dir(project.path()).join(MEDIA_DIR);
        save_paths(home.path(), &custom).unwrap();

        let report = migrate_all(project.path(), home.path()).unwrap();
        assert!(report.persisted);
        let saved = load_paths(home.path()).unwrap();
        assert_eq!(saved.app_path, PathBuf::from("/Applications/UTM.app"));
        assert_eq!(saved.media_cache_dir, home.path().join(MEDIA_DIR));
        assert_eq!(saved.shared_dir, custom.shared_dir);
    }

    #[test]
    fn nothing_to_move_leaves_existing_config_alone() {
        let project = TempDir::new().unwrap();
        let home = TempDir::new().unwrap();
        let mut custom = PathsConfig::global(home.path());
        custom.app_path = PathBuf::from("/Applications/UTM.app");
        save_paths(home.path(), &custom).unwrap();
        let before = fs::read_to_string(conf_path(home.path())).unwrap();

        let report = migrate_all(project.path(), home.path()).unwrap();
        assert!(report.is_noop());
        assert_eq!(fs::read_to_string(conf_path(home.path())).unwrap(), before);
    }

    #[cfg(unix)]
    #[test]
    fn copy_keeps_symlinks() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("Versions/A")).unwrap();
        fs::write(src.join("Versions/A/bin"), b"x").unwrap();
        std::os::unix::fs::symlink("A", src.join("Versions/Current")).unwrap();

        let dst = dir.path().join("dst");
        copy_recursive(&src, &dst).unwrap();
        let link = fs::read_link(dst.join("Versions/Current")).unwrap();
        assert_eq!(link, Path::new("A"));
        assert_eq!(fs::read(dst.join("Versions/A/bin")).unwrap(), b"x");
    }
}
