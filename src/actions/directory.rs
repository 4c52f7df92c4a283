// src/actions/directory.rs

//! Directories

use super::handler::{
    ActionHandler, ErrnoPolicy, ObjectType, apply_fsobj_attrs, check_io, exec_error,
    make_parent_dirs, normalize_path, parse_mode, validate_fsobj, verify_fsobj_common,
};
use super::{Action, Attrs, IndexEntry};
use crate::error::Result;
use crate::image::PkgPlan;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use tracing::debug;

pub struct DirectoryHandler;

/// Last component of a path, ignoring trailing slashes
pub(crate) fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

impl ActionHandler for DirectoryHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("path")
    }

    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        normalize_path(attrs)
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        validate_fsobj(action, true)
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let path = action.get_str("path").unwrap_or_default();
        vec![
            IndexEntry::new(action.name(), "basename", basename(path), None),
            IndexEntry::new(action.name(), "path", &format!("/{}", path), None),
        ]
    }

    /// Create the directory if needed, then apply mode and ownership
    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        let mode = action.get_str("mode").and_then(parse_mode).unwrap_or(0o755);

        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                debug!("Directory {} already exists", path.display());
            }
            Ok(_) => {
                fs::remove_file(&path).map_err(|e| exec_error(action, "unlink", &e))?;
                DirBuilder::new()
                    .mode(mode)
                    .create(&path)
                    .map_err(|e| exec_error(action, "mkdir", &e))?;
            }
            Err(_) => {
                make_parent_dirs(action, &path)?;
                DirBuilder::new()
                    .mode(mode)
                    .create(&path)
                    .map_err(|e| exec_error(action, "mkdir", &e))?;
            }
        }

        apply_fsobj_attrs(action, plan.image, &path)
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        Ok(verify_fsobj_common(action, plan.image, ObjectType::Directory)?.errors)
    }

    /// Non-empty or already missing directories are left as they are
    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        check_io(action, ErrnoPolicy::RemoveDir, fs::remove_dir(&path), "rmdir")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_basename() {
        assert_eq!(basename("usr/share/"), "share");
        assert_eq!(basename("usr"), "usr");
    }

    #[test]
    fn test_indices() {
        let a: Action = "dir path=usr/share/ mode=0755".parse().unwrap();
        let entries = a.generate_indices();
        assert_eq!(entries[0].token, "share");
        assert_eq!(entries[1].token, "/usr/share/");
    }

    #[test]
    fn test_install_verify_remove() {
        let dir = tempdir().unwrap();
        let image = Image::new(dir.path());
        let plan = PkgPlan::new(&image, None);

        let a: Action = "dir path=opt/app/etc mode=0750".parse().unwrap();
        assert_eq!(
            a.verify(&plan).unwrap(),
            vec!["Missing: directory does not exist"]
        );

        a.install(&plan, None).unwrap();
        let meta = fs::metadata(dir.path().join("opt/app/etc")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
        assert!(a.verify(&plan).unwrap().is_empty());

        fs::set_permissions(
            dir.path().join("opt/app/etc"),
            fs::Permissions::from_mode(0o700),
        )
        .unwrap();
        assert_eq!(
            a.verify(&plan).unwrap(),
            vec!["Mode: 0700 should be 0750"]
        );

        // a non-empty directory survives removal
        fs::write(dir.path().join("opt/app/etc/local.conf"), "x").unwrap();
        a.remove(&plan).unwrap();
        assert!(dir.path().join("opt/app/etc").exists());

        fs::remove_file(dir.path().join("opt/app/etc/local.conf")).unwrap();
        a.remove(&plan).unwrap();
        assert!(!dir.path().join("opt/app/etc").exists());

        // already gone
        a.remove(&plan).unwrap();
    }

    #[test]
    fn test_verify_wrong_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data"), "not a dir").unwrap();
        let image = Image::new(dir.path());
        let plan = PkgPlan::new(&image, None);

        let a: Action = "dir path=data mode=0755".parse().unwrap();
        assert_eq!(
            a.verify(&plan).unwrap(),
            vec!["File Type: 'regular file' should be 'directory'"]
        );
    }
}
