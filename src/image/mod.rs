// src/image/mod.rs

//! Image root abstraction used by action install, verify and remove
//!
//! An image is a directory tree that packages are installed into. Account
//! names are resolved through the image's own `etc/passwd` and `etc/group`
//! first, then through the live system.

pub mod cfgfiles;

pub use cfgfiles::ColonFile;

use crate::error::Result;
use crate::fmri::{Fmri, quote};
use nix::unistd::{Gid, Group, Uid, User};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where license texts are stored, relative to the image root
pub const LICENSE_DIR: &str = "var/pkg/license";

/// An installable directory tree
#[derive(Debug, Clone)]
pub struct Image {
    root: PathBuf,
}

impl Image {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of an image-relative action path
    pub fn path_for(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Like `path_for`, but `.` and `..` components are folded first
    ///
    /// Returns `None` when the path would climb above the image root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut parts: Vec<&str> = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop()?;
                }
                name => parts.push(name),
            }
        }
        Some(parts.iter().fold(self.root.clone(), |acc, part| acc.join(part)))
    }

    pub fn passwd(&self) -> Result<ColonFile> {
        ColonFile::passwd(&self.root)
    }

    pub fn group(&self) -> Result<ColonFile> {
        ColonFile::group(&self.root)
    }

    /// Resolve a user name to a uid, or `None` if nobody knows it
    pub fn get_user_by_name(&self, name: &str) -> Result<Option<u32>> {
        if let Some(uid) = self.passwd()?.get_field(name, "uid") {
            if let Ok(uid) = uid.parse() {
                return Ok(Some(uid));
            }
        }
        let uid = User::from_name(name).ok().flatten().map(|u| u.uid.as_raw());
        if uid.is_some() {
            debug!("Resolved user '{}' from the live system", name);
        }
        Ok(uid)
    }

    /// Resolve a group name to a gid, or `None` if nobody knows it
    pub fn get_group_by_name(&self, name: &str) -> Result<Option<u32>> {
        if let Some(gid) = self.group()?.get_field(name, "gid") {
            if let Ok(gid) = gid.parse() {
                return Ok(Some(gid));
            }
        }
        let gid = Group::from_name(name).ok().flatten().map(|g| g.gid.as_raw());
        if gid.is_some() {
            debug!("Resolved group '{}' from the live system", name);
        }
        Ok(gid)
    }

    /// Name for a uid; falls back to the number itself
    pub fn get_name_by_uid(&self, uid: u32) -> String {
        if let Ok(pw) = self.passwd() {
            if let Some(name) = pw.find_by("uid", &uid.to_string()) {
                return name;
            }
        }
        User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string())
    }

    /// Name for a gid; falls back to the number itself
    pub fn get_name_by_gid(&self, gid: u32) -> String {
        if let Ok(gr) = self.group() {
            if let Some(name) = gr.find_by("gid", &gid.to_string()) {
                return name;
            }
        }
        Group::from_gid(Gid::from_raw(gid))
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| gid.to_string())
    }

    /// Location of an installed license text for a package
    pub fn license_path(&self, fmri: Option<&Fmri>, license: &str) -> PathBuf {
        let stem = fmri
            .and_then(|f| f.get_dir_path(true).ok())
            .unwrap_or_else(|| "unknown".to_string());
        self.root.join(LICENSE_DIR).join(stem).join(quote(license))
    }
}

/// Per-package context handed to action install, verify and remove
#[derive(Debug, Clone, Copy)]
pub struct PkgPlan<'a> {
    pub image: &'a Image,
    pub fmri: Option<&'a Fmri>,
}

impl<'a> PkgPlan<'a> {
    pub fn new(image: &'a Image, fmri: Option<&'a Fmri>) -> Self {
        Self { image, fmri }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_path_for_strips_leading_slash() {
        let img = Image::new("/tmp/img");
        assert_eq!(img.path_for("/usr/bin/ls"), PathBuf::from("/tmp/img/usr/bin/ls"));
        assert_eq!(img.path_for("usr/bin/ls"), PathBuf::from("/tmp/img/usr/bin/ls"));
    }

    #[test]
    fn test_resolve_stays_inside_root() {
        let img = Image::new("/tmp/img");
        assert_eq!(
            img.resolve("usr/bin/../lib/./libz.so"),
            Some(PathBuf::from("/tmp/img/usr/lib/libz.so"))
        );
        assert_eq!(img.resolve("/usr/bin"), Some(PathBuf::from("/tmp/img/usr/bin")));
        assert_eq!(img.resolve("usr/../.."), None);
        assert_eq!(img.resolve("../etc/passwd"), None);
    }

    #[test]
    fn test_image_accounts_take_precedence() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(
            dir.path().join("etc/passwd"),
            "pkgtest:x:4242:4343:Test:/home/pkgtest:/bin/sh\n",
        )
        .unwrap();
        fs::write(dir.path().join("etc/group"), "pkgtest::4343:\n").unwrap();

        let img = Image::new(dir.path());
        assert_eq!(img.get_user_by_name("pkgtest").unwrap(), Some(4242));
        assert_eq!(img.get_group_by_name("pkgtest").unwrap(), Some(4343));
        assert_eq!(img.get_name_by_uid(4242), "pkgtest");
        assert_eq!(img.get_name_by_gid(4343), "pkgtest");
        assert_eq!(img.get_user_by_name("no-such-user-here").unwrap(), None);
    }

    #[test]
    fn test_license_path() {
        let img = Image::new("/img");
        let fmri = Fmri::parse("pkg://example.org/library/zlib@1.3", None).unwrap();
        assert_eq!(
            img.license_path(Some(&fmri), "zlib license"),
            PathBuf::from("/img/var/pkg/license/library%2Fzlib/zlib%20license")
        );
    }
}
