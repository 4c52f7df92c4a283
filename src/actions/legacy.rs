// src/actions/legacy.rs

//! Legacy SVR4 package registration
//!
//! Installing a legacy action leaves a `pkginfo` file under `var/sadm/pkg`
//! so SVR4 tooling in the image still sees the package.

use super::handler::{ActionHandler, ErrnoPolicy, check_io, exec_error};
use super::{Action, IndexEntry};
use crate::error::{Error, Result};
use crate::image::{Image, PkgPlan};
use std::fs::{self, DirBuilder, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Attributes that describe the legacy package and are never repeated
const SINGLE_ATTRS: &[&str] = &["category", "desc", "hotline", "name", "vendor", "version"];

/// Where SVR4 package directories live, relative to the image root
pub const LEGACY_PKG_DIR: &str = "var/sadm/pkg";

/// Package contents database the SVR4 commands expect to exist
const CONTENTS_FILE: &str = "var/sadm/install/contents";

const PKGINFO_MODE: u32 = 0o644;
const PKG_DIR_MODE: u32 = 0o755;

pub struct LegacyHandler;

fn pkg_attr(action: &Action) -> &str {
    action.get_str("pkg").unwrap_or_default()
}

fn pkg_dir(image: &Image, pkg: &str) -> PathBuf {
    image.path_for(LEGACY_PKG_DIR).join(pkg)
}

/// `pkginfo` lines in SVR4 order; action attributes override the defaults
fn pkginfo_lines(action: &Action, plan: &PkgPlan<'_>) -> Vec<String> {
    let pkg = pkg_attr(action);
    let version = plan
        .fmri
        .and_then(|f| f.version())
        .map(|v| v.to_string());

    let defaults: [(&str, Option<&str>); 12] = [
        ("arch", None),
        ("basedir", Some("/")),
        ("category", Some("system")),
        ("desc", None),
        ("hotline", None),
        ("name", None),
        ("pkg", Some(pkg)),
        ("pkginst", Some(pkg)),
        ("pstamp", None),
        ("sunw_prodvers", None),
        ("vendor", None),
        ("version", version.as_deref()),
    ];

    let mut lines: Vec<String> = defaults
        .iter()
        .filter_map(|(key, default)| {
            let value = action.get_str(key).or(*default)?;
            if value.is_empty() {
                return None;
            }
            // NAME is capped the way pkginfo(4) readers expect
            let value = if *key == "name" {
                value.chars().take(256).collect()
            } else {
                value.to_string()
            };
            Some(format!("{}={}", key.to_uppercase(), value))
        })
        .collect();
    lines.push(format!(
        "INSTDATE={}",
        chrono::Local::now().format("%b %d %Y %H:%M")
    ));
    lines
}

/// Drop `pkginfo.2`, `pkginfo.3`, ... left by reference-counted installs
fn cleanup_numbered_pkginfo(action: &Action, dir: &Path) -> Result<()> {
    for i in 2.. {
        let path = dir.join(format!("pkginfo.{}", i));
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale {}", path.display()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => break,
            Err(e) => return Err(exec_error(action, "unlink", &e)),
        }
    }
    Ok(())
}

impl ActionHandler for LegacyHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("pkg")
    }

    fn check(&self, action: &Action) -> std::result::Result<(), String> {
        let pkg = pkg_attr(action);
        if pkg.contains('/') || pkg == "." || pkg == ".." {
            return Err(format!("'{}' is not a valid legacy package name", pkg));
        }
        Ok(())
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        SINGLE_ATTRS
            .iter()
            .filter(|attr| action.get(attr).is_some_and(|v| v.is_list()))
            .map(|attr| format!("{} may only be specified once", attr))
            .collect()
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let pkg = pkg_attr(action);
        vec![
            IndexEntry::new("legacy", "legacy_pkg", pkg, None),
            IndexEntry::new("legacy", "pkg", pkg, None),
        ]
    }

    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let dir = pkg_dir(plan.image, pkg_attr(action));
        if !dir.is_dir() {
            DirBuilder::new()
                .recursive(true)
                .mode(PKG_DIR_MODE)
                .create(&dir)
                .map_err(|e| exec_error(action, "mkdir", &e))?;
        }

        cleanup_numbered_pkginfo(action, &dir)?;

        let pkginfo = dir.join("pkginfo");
        let mut content = pkginfo_lines(action, plan).join("\n");
        content.push('\n');
        fs::write(&pkginfo, content).map_err(|e| exec_error(action, "write", &e))?;

        // Stays absent until the SVR4 tools deliver its directory
        let contents = plan.image.path_for(CONTENTS_FILE);
        check_io(
            action,
            ErrnoPolicy::Remove,
            OpenOptions::new().create(true).append(true).open(&contents).map(|_| ()),
            "open",
        )?;

        fs::set_permissions(&pkginfo, fs::Permissions::from_mode(PKGINFO_MODE))
            .map_err(|e| exec_error(action, "chmod", &e))?;
        debug!("Registered legacy package {}", pkg_attr(action));
        Ok(())
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let pkg = pkg_attr(action);
        let dir = pkg_dir(plan.image, pkg);
        if !dir.is_dir() {
            return Ok(vec![format!("Missing directory {}/{}", LEGACY_PKG_DIR, pkg)]);
        }
        match fs::metadata(dir.join("pkginfo")) {
            Ok(meta) if meta.is_file() => Ok(Vec::new()),
            Ok(_) => Ok(vec![format!("Missing file {}/{}/pkginfo", LEGACY_PKG_DIR, pkg)]),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                Ok(vec![format!("Missing file {}/{}/pkginfo", LEGACY_PKG_DIR, pkg)])
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// The package directory itself goes with implicit directory removal
    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let dir = pkg_dir(plan.image, pkg_attr(action));
        cleanup_numbered_pkginfo(action, &dir)?;
        check_io(
            action,
            ErrnoPolicy::Remove,
            fs::remove_file(dir.join("pkginfo")),
            "unlink",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmri::Fmri;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    #[test]
    fn test_indices() {
        let a: Action = "legacy pkg=SUNWcsu name=\"Core Solaris\"".parse().unwrap();
        let entries = a.generate_indices();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], IndexEntry::new("legacy", "legacy_pkg", "SUNWcsu", None));
        assert_eq!(entries[1].key, "pkg");
    }

    #[test]
    fn test_validate() {
        let a: Action = "legacy pkg=SUNWcsu version=1 version=2".parse().unwrap();
        assert!(a.validate().is_err());
        let a: Action = "legacy pkg=SUNWcsu version=1 arch=i386 arch=sparc".parse().unwrap();
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_pkg_name_cannot_leave_pkg_dir() {
        assert!("legacy pkg=../../etc".parse::<Action>().is_err());
        assert!("legacy pkg=..".parse::<Action>().is_err());
    }

    #[test]
    fn test_install_verify_remove() {
        let dir = tempdir().unwrap();
        let image = Image::new(dir.path());
        let fmri = Fmri::parse("pkg:/system/core-os@0.5.11,5.11-2024.0.0.1", None).unwrap();
        let plan = PkgPlan::new(&image, Some(&fmri));

        let a: Action = "legacy pkg=SUNWcsu name=\"Core Solaris\" arch=i386 vendor=\"Oracle\""
            .parse()
            .unwrap();
        assert_eq!(
            a.verify(&plan).unwrap(),
            vec!["Missing directory var/sadm/pkg/SUNWcsu"]
        );

        // a numbered leftover from an older install goes away
        let pkgdir = dir.path().join("var/sadm/pkg/SUNWcsu");
        fs::create_dir_all(&pkgdir).unwrap();
        fs::write(pkgdir.join("pkginfo.2"), b"old").unwrap();

        a.install(&plan, None).unwrap();
        assert!(a.verify(&plan).unwrap().is_empty());
        assert!(!pkgdir.join("pkginfo.2").exists());

        let pkginfo = pkgdir.join("pkginfo");
        assert_eq!(fs::metadata(&pkginfo).unwrap().mode() & 0o7777, 0o644);
        let text = fs::read_to_string(&pkginfo).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            &lines[..8],
            &[
                "ARCH=i386",
                "BASEDIR=/",
                "CATEGORY=system",
                "NAME=Core Solaris",
                "PKG=SUNWcsu",
                "PKGINST=SUNWcsu",
                "VENDOR=Oracle",
                "VERSION=0.5.11,5.11-2024.0.0.1",
            ]
        );
        assert!(lines[8].starts_with("INSTDATE="));

        // the contents file is only touched once its directory exists
        assert!(!dir.path().join("var/sadm/install").exists());
        fs::create_dir_all(dir.path().join("var/sadm/install")).unwrap();
        a.install(&plan, None).unwrap();
        assert!(dir.path().join("var/sadm/install/contents").is_file());

        a.remove(&plan).unwrap();
        assert!(!pkginfo.exists());
        assert_eq!(
            a.verify(&plan).unwrap(),
            vec!["Missing file var/sadm/pkg/SUNWcsu/pkginfo"]
        );
        a.remove(&plan).unwrap();
    }
}
