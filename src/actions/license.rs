// src/actions/license.rs

//! License texts, installed under the image's license directory

use super::file::{FileHandler, content_hash};
use super::handler::{ActionHandler, ErrnoPolicy, check_io, exec_error, make_parent_dirs};
use super::{Action, IndexEntry};
use crate::error::{Error, Result};
use crate::image::PkgPlan;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// Installed license texts are read-only and owned by root
const LICENSE_MODE: u32 = 0o444;

pub struct LicenseHandler;

impl ActionHandler for LicenseHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("license")
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let mut out = vec![IndexEntry::new(
            "license",
            "license",
            action.get_str("license").unwrap_or_default(),
            None,
        )];
        if let Some(hash) = action.hash() {
            out.push(IndexEntry::new("license", "content", hash, None));
        }
        out
    }

    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let license = action.get_str("license").unwrap_or_default();
        let path = plan.image.license_path(plan.fmri, license);
        make_parent_dirs(action, &path)?;

        FileHandler::write_payload(action, &path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(LICENSE_MODE))
            .map_err(|e| exec_error(action, "chmod", &e))?;
        chown_root(action, &path)
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let license = action.get_str("license").unwrap_or_default();
        let path = plan.image.license_path(plan.fmri, license);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(vec![format!("License file {} does not exist", path.display())]);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut errors = Vec::new();
        if let Some(expected) = action.hash() {
            let found = content_hash(&mut file)?;
            if found != expected {
                errors.push(format!("Hash: {} should be {}", found, expected));
            }
        }
        Ok(errors)
    }

    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let license = action.get_str("license").unwrap_or_default();
        let path = plan.image.license_path(plan.fmri, license);
        check_io(action, ErrnoPolicy::Remove, fs::remove_file(&path), "unlink")
    }
}

/// Hand the file to root; unprivileged installs keep their own ownership
fn chown_root(action: &Action, path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| exec_error(action, "stat", &e))?;
    if meta.uid() == 0 && meta.gid() == 0 {
        return Ok(());
    }
    match std::os::unix::fs::chown(path, Some(0), Some(0)) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
            debug!("Leaving {} owned by the installing user", path.display());
            Ok(())
        }
        Err(e) => Err(exec_error(action, "chown", &e)),
    }
}
