//! Portable `.utm` export and import

use crate::bridge::utm::Utm;
use crate::bridge::Bridge;
use crate::error::UvmError;
use crate::utils::system::version_at_least;
use crate::Result;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Oldest UTM whose scripting dictionary has export/import.
pub const MIN_BUNDLE_VERSION: &str = "4.6.0";

fn require_version(utm: &Utm<'_>, operation: &'static str) -> Result<()> {
    let installed = utm.version()?;
    if version_at_least(&installed, MIN_BUNDLE_VERSION) {
        Ok(())
    } else {
        Err(UvmError::UnsupportedVersion {
            operation,
            required: MIN_BUNDLE_VERSION.to_string(),
            installed,
        })
    }
}

/// Write `vm` to `output` as a self-contained bundle.
pub fn export_vm(bridge: &dyn Bridge, vm: &str, output: &Path) -> Result<()> {
    let utm = Utm::new(bridge);
    require_version(&utm, "export")?;
    if output.exists() {
        return Err(UvmError::Config {
            message: format!("{} already exists", output.display()),
        });
    }
    utm.export(vm, output)?;
    info!(vm, path = %output.display(), "exported VM");
    Ok(())
}

/// Register a bundle with UTM and return the new VM's UUID.
pub fn import_vm(bridge: &dyn Bridge, bundle: &Path) -> Result<Uuid> {
    let utm = Utm::new(bridge);
    require_version(&utm, "import")?;
    if !bundle.exists() {
        return Err(UvmError::io(
            format!("reading {}", bundle.display()),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }
    let uuid = utm.import(bundle)?;
    info!(path = %bundle.display(), %uuid, "imported VM");
    Ok(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::scripts;
    use crate::testing::FakeUtm;
    use tempfile::TempDir;

    #[test]
    fn export_then_import_registers_a_new_vm() {
        let dir = TempDir::new().unwrap();
        let utm = FakeUtm::new();
        let original = utm.add_vm("dev");
        let bundle = dir.path().join("dev.utm");

        export_vm(&utm, "dev", &bundle).unwrap();
        assert!(bundle.exists());

        let imported = import_vm(&utm, &bundle).unwrap();
        assert_ne!(imported, original);
        assert_eq!(utm.vms.borrow().len(), 2);
    }

    #[test]
    fn old_utm_is_rejected_before_any_work() {
        let dir = TempDir::new().unwrap();
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        *utm.version.borrow_mut() = "4.5.2".into();

        let err = export_vm(&utm, "dev", &dir.path().join("dev.utm")).unwrap_err();
        match &err {
            UvmError::UnsupportedVersion {
                required, installed, ..
            } => {
                assert_eq!(required, "4.6.0");
                assert_eq!(installed, "4.5.2");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(utm.calls_to(&scripts::EXPORT_VM), 0);
        assert!(matches!(
            import_vm(&utm, &dir.path().join("dev.utm")),
            Err(UvmError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn newer_minor_versions_compare_numerically() {
        let dir = TempDir::new().unwrap();
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        *utm.version.borrow_mut() = "4.10.0".into();
        export_vm(&utm, "dev", &dir.path().join("dev.utm")).unwrap();
    }

    #[test]
    fn export_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let bundle = dir.path().join("dev.utm");
        std::fs::write(&bundle, "existing").unwrap();
        assert!(matches!(
            export_vm(&utm, "dev", &bundle),
            Err(UvmError::Config { .. })
        ));
    }

    #[test]
    fn exporting_unknown_vm_fails() {
        let dir = TempDir::new().unwrap();
        let utm = FakeUtm::new();
        assert!(matches!(
            export_vm(&utm, "ghost", &dir.path().join("ghost.utm")),
            Err(UvmError::VmNotFound { .. })
        ));
    }
}
