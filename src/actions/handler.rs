// src/actions/handler.rs

//! Per-kind action behavior and the filesystem helpers kinds share

use super::{Action, AttrValue, Attrs, IndexEntry};
use crate::error::{Error, Result};
use crate::image::{Image, PkgPlan};
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

/// Behavior of one action kind
///
/// Every method except `key_attr` has a default that does nothing, so kinds
/// only spell out what they actually touch.
pub trait ActionHandler: Send + Sync {
    /// Attribute whose value identifies the action within a manifest
    fn key_attr(&self) -> Option<&'static str>;

    /// Rewrite attributes at construction time (path stripping, shorthands)
    fn normalize(&self, _attrs: &mut Attrs) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Construction-time checks; the error string becomes the reason
    fn check(&self, _action: &Action) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Publication-time checks, one message per problem
    fn validate(&self, _action: &Action) -> Vec<String> {
        Vec::new()
    }

    fn different(&self, a: &Action, b: &Action) -> bool {
        generic_different(a, b)
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        content_index(action)
    }

    fn install(&self, _action: &Action, _plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        Ok(())
    }

    fn verify(&self, _action: &Action, _plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn remove(&self, _action: &Action, _plan: &PkgPlan<'_>) -> Result<()> {
        Ok(())
    }
}

/// Handler for the `unknown` kind: carries attributes, does nothing
pub struct GenericHandler;

impl ActionHandler for GenericHandler {
    fn key_attr(&self) -> Option<&'static str> {
        None
    }
}

/// Attribute sets and hashes compared, lists order-insensitively
pub(crate) fn generic_different(a: &Action, b: &Action) -> bool {
    if a.attrs().len() != b.attrs().len() {
        return true;
    }
    for (k, v) in a.attrs() {
        match b.attrs().get(k) {
            Some(other) if v.same_values(other) => {}
            _ => return true,
        }
    }
    a.hash() != b.hash()
}

/// The default index: the content hash, when there is one
pub(crate) fn content_index(action: &Action) -> Vec<IndexEntry> {
    match action.hash() {
        Some(hash) => vec![IndexEntry::new(action.name(), "content", hash, Some(hash))],
        None => Vec::new(),
    }
}

/// Which OS errors an operation treats as already done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrnoPolicy {
    /// Every error is fatal
    Strict,
    /// Removing something that is already gone is fine
    Remove,
    /// Directories may also be left behind when still in use
    RemoveDir,
}

impl ErrnoPolicy {
    pub fn tolerable(self, errno: i32) -> bool {
        match self {
            ErrnoPolicy::Strict => false,
            ErrnoPolicy::Remove => errno == libc::ENOENT,
            ErrnoPolicy::RemoveDir => {
                matches!(errno, libc::ENOENT | libc::ENOTEMPTY | libc::EEXIST)
            }
        }
    }
}

/// Wrap an OS error from acting on `action`
///
/// `ignoreerrno` is set when the object vanished underneath the operation.
pub(crate) fn exec_error(action: &Action, message: &str, err: &io::Error) -> Error {
    let errno = err.raw_os_error();
    Error::ActionExecution {
        action: action.to_string(),
        message: format!("{}: {}", message, err),
        errno,
        ignoreerrno: matches!(errno, Some(libc::ENOENT)),
    }
}

/// Apply an errno policy to the outcome of a filesystem call
pub(crate) fn check_io(
    action: &Action,
    policy: ErrnoPolicy,
    result: io::Result<()>,
    what: &str,
) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error().is_some_and(|n| policy.tolerable(n)) => {
            debug!("{} {}: ignoring {}", what, action.distinguished_name(), e);
            Ok(())
        }
        Err(e) => Err(exec_error(action, what, &e)),
    }
}

/// Strip leading slashes from `path`
///
/// An empty result, or one that climbs out of the image with `..`, is an error.
pub(crate) fn normalize_path(attrs: &mut Attrs) -> std::result::Result<(), String> {
    if let Some(AttrValue::Single(path)) = attrs.get_mut("path") {
        let stripped = path.trim_start_matches('/');
        if stripped.is_empty() {
            return Err("Empty path attribute".to_string());
        }
        if stripped.split('/').any(|c| c == "..") {
            return Err(format!("path '{}' may not contain '..' components", stripped));
        }
        if stripped.len() != path.len() {
            *path = stripped.to_string();
        }
    }
    Ok(())
}

/// Parse an octal mode string
pub(crate) fn parse_mode(mode: &str) -> Option<u32> {
    u32::from_str_radix(mode, 8).ok()
}

const MODE_FORM: &str = "value must be of the form '644', '0644', or '04755'.";

/// Mode and ownership checks for filesystem objects
pub(crate) fn validate_fsobj(action: &Action, require_ownership: bool) -> Vec<String> {
    let mut errors = Vec::new();

    match action.get("mode") {
        None => errors.push(format!("mode is required; {}", MODE_FORM)),
        Some(AttrValue::List(_)) => errors.push("mode may only be specified once".to_string()),
        Some(AttrValue::Single(mode)) => {
            let len_ok = matches!(mode.len(), 3..=5) && (mode.len() != 5 || mode.starts_with('0'));
            if !len_ok || parse_mode(mode).is_none() {
                errors.push(format!("'{}' is not a valid mode; {}", mode, MODE_FORM));
            }
        }
    }

    for attr in ["owner", "group"] {
        match action.get(attr) {
            Some(AttrValue::List(_)) => errors.push(format!("{} may only be specified once", attr)),
            Some(AttrValue::Single(v)) if v.trim_end().is_empty() => {
                errors.push(format!("{} is required", attr))
            }
            None if require_ownership => errors.push(format!("{} is required", attr)),
            _ => {}
        }
    }

    errors
}

/// Types a filesystem object can have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectType {
    Regular,
    Directory,
    Symlink,
    Fifo,
    CharDevice,
    BlockDevice,
    Socket,
}

impl ObjectType {
    pub(crate) fn of(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_symlink() {
            ObjectType::Symlink
        } else if ft.is_dir() {
            ObjectType::Directory
        } else if ft.is_fifo() {
            ObjectType::Fifo
        } else if ft.is_char_device() {
            ObjectType::CharDevice
        } else if ft.is_block_device() {
            ObjectType::BlockDevice
        } else if ft.is_socket() {
            ObjectType::Socket
        } else {
            ObjectType::Regular
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            ObjectType::Regular => "regular file",
            ObjectType::Directory => "directory",
            ObjectType::Symlink => "symbolic link",
            ObjectType::Fifo => "fifo",
            ObjectType::CharDevice => "character device",
            ObjectType::BlockDevice => "block device",
            ObjectType::Socket => "socket",
        }
    }
}

/// Outcome of the checks every filesystem object shares
pub(crate) struct FsobjCheck {
    pub meta: Option<Metadata>,
    pub errors: Vec<String>,
    /// Further kind-specific checks are pointless
    pub abort: bool,
}

/// Existence, type, ownership and mode checks
pub(crate) fn verify_fsobj_common(
    action: &Action,
    image: &Image,
    expected: ObjectType,
) -> Result<FsobjCheck> {
    let mut errors = Vec::new();

    let mode = action.get_str("mode").and_then(parse_mode);
    let mut owner = None;
    if let Some(name) = action.get_str("owner") {
        owner = image.get_user_by_name(name)?;
        if owner.is_none() {
            errors.push(format!("Owner: {} is unknown", name));
        }
    }
    let mut group = None;
    if let Some(name) = action.get_str("group") {
        group = image.get_group_by_name(name)?;
        if group.is_none() {
            errors.push(format!("Group: {} is unknown", name));
        }
    }

    let path = image.path_for(action.get_str("path").unwrap_or_default());
    let meta = match fs::symlink_metadata(&path) {
        Ok(meta) => meta,
        Err(e) => {
            match e.raw_os_error() {
                Some(libc::ENOENT) => {
                    if action.get_str("preserve") == Some("legacy") {
                        return Ok(FsobjCheck {
                            meta: None,
                            errors,
                            abort: true,
                        });
                    }
                    errors.push(format!("Missing: {} does not exist", expected.as_str()));
                }
                Some(libc::EACCES) => errors.push("Skipping: Permission denied".to_string()),
                _ => errors.push(format!("Unexpected Error: {}", e)),
            }
            return Ok(FsobjCheck {
                meta: None,
                errors,
                abort: true,
            });
        }
    };

    let found = ObjectType::of(&meta);
    if found != expected {
        errors.push(format!(
            "File Type: '{}' should be '{}'",
            found.as_str(),
            expected.as_str()
        ));
        return Ok(FsobjCheck {
            meta: Some(meta),
            errors,
            abort: true,
        });
    }

    if let Some(uid) = owner {
        if meta.uid() != uid {
            errors.push(format!(
                "Owner: '{} ({})' should be '{} ({})'",
                image.get_name_by_uid(meta.uid()),
                meta.uid(),
                action.get_str("owner").unwrap_or_default(),
                uid
            ));
        }
    }
    if let Some(gid) = group {
        if meta.gid() != gid {
            errors.push(format!(
                "Group: '{} ({})' should be '{} ({})'",
                image.get_name_by_gid(meta.gid()),
                meta.gid(),
                action.get_str("group").unwrap_or_default(),
                gid
            ));
        }
    }
    if let Some(mode) = mode {
        let found = meta.mode() & 0o7777;
        if found != mode {
            errors.push(format!("Mode: 0{:03o} should be 0{:03o}", found, mode));
        }
    }

    Ok(FsobjCheck {
        meta: Some(meta),
        errors,
        abort: false,
    })
}

/// Look up the uid and gid an action asks for
fn resolve_ownership(action: &Action, image: &Image) -> Result<(Option<u32>, Option<u32>)> {
    let unknown = |what: &str, name: &str| Error::ActionExecution {
        action: action.to_string(),
        message: format!("Unknown {} '{}'", what, name),
        errno: None,
        ignoreerrno: false,
    };

    let uid = match action.get_str("owner") {
        Some(name) => Some(image.get_user_by_name(name)?.ok_or_else(|| unknown("user", name))?),
        None => None,
    };
    let gid = match action.get_str("group") {
        Some(name) => Some(image.get_group_by_name(name)?.ok_or_else(|| unknown("group", name))?),
        None => None,
    };
    Ok((uid, gid))
}

/// Apply mode and ownership to an installed object
///
/// Ownership is only changed when it differs from what is on disk.
pub(crate) fn apply_fsobj_attrs(action: &Action, image: &Image, path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| exec_error(action, "stat", &e))?;
    let is_link = meta.file_type().is_symlink();

    if !is_link {
        if let Some(mode) = action.get_str("mode").and_then(parse_mode) {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .map_err(|e| exec_error(action, "chmod", &e))?;
        }
    }

    let (uid, gid) = resolve_ownership(action, image)?;
    let uid = uid.filter(|u| *u != meta.uid());
    let gid = gid.filter(|g| *g != meta.gid());
    if uid.is_some() || gid.is_some() {
        let result = if is_link {
            std::os::unix::fs::lchown(path, uid, gid)
        } else {
            std::os::unix::fs::chown(path, uid, gid)
        };
        result.map_err(|e| exec_error(action, "chown", &e))?;
    }
    Ok(())
}

/// Create the parent directories of an installed object
pub(crate) fn make_parent_dirs(action: &Action, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| exec_error(action, "mkdir", &e))?;
    }
    Ok(())
}

/// Remove a non-directory object; a directory in its place is left alone
pub(crate) fn remove_fsobj(action: &Action, path: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.is_dir() {
            debug!(
                "Not removing directory in place of {}",
                action.distinguished_name()
            );
            return Ok(());
        }
    }
    check_io(action, ErrnoPolicy::Remove, fs::remove_file(path), "unlink")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_policy() {
        assert!(ErrnoPolicy::Remove.tolerable(libc::ENOENT));
        assert!(!ErrnoPolicy::Remove.tolerable(libc::EACCES));
        assert!(ErrnoPolicy::RemoveDir.tolerable(libc::ENOTEMPTY));
        assert!(ErrnoPolicy::RemoveDir.tolerable(libc::EEXIST));
        assert!(!ErrnoPolicy::RemoveDir.tolerable(libc::EPERM));
        assert!(!ErrnoPolicy::Strict.tolerable(libc::ENOENT));
    }

    #[test]
    fn test_check_io_carries_errno() {
        let action: Action = "file path=a".parse().unwrap();
        let denied = io::Error::from_raw_os_error(libc::EACCES);
        let err = check_io(&action, ErrnoPolicy::Remove, Err(denied), "unlink").unwrap_err();
        assert_eq!(err.errno(), Some(libc::EACCES));

        let gone = io::Error::from_raw_os_error(libc::ENOENT);
        assert!(check_io(&action, ErrnoPolicy::Remove, Err(gone), "unlink").is_ok());
    }

    #[test]
    fn test_normalize_path() {
        let mut attrs = Attrs::new();
        attrs.insert("path".to_string(), AttrValue::from("//usr/lib"));
        normalize_path(&mut attrs).unwrap();
        assert_eq!(attrs["path"], AttrValue::from("usr/lib"));

        attrs.insert("path".to_string(), AttrValue::from("///"));
        assert_eq!(normalize_path(&mut attrs).unwrap_err(), "Empty path attribute");

        for bad in ["../escaped", "usr/../../etc/passwd", "/usr/lib/.."] {
            attrs.insert("path".to_string(), AttrValue::from(bad));
            assert!(normalize_path(&mut attrs).unwrap_err().contains("'..'"));
        }

        // dots inside a name are fine
        attrs.insert("path".to_string(), AttrValue::from("usr/lib/..hidden"));
        normalize_path(&mut attrs).unwrap();
    }

    #[test]
    fn test_climbing_path_never_installs() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("image");
        fs::create_dir(&root).unwrap();

        for line in [
            "dir path=../escaped mode=0755",
            "file path=opt/../../escaped mode=0644",
            "link path=../escaped target=x",
            "hardlink path=../escaped target=x",
        ] {
            match line.parse::<Action>() {
                Err(Error::InvalidAction { reason, .. }) => assert!(reason.contains("'..'")),
                other => panic!("{} accepted: {:?}", line, other),
            }
        }
        assert!(!outer.path().join("escaped").exists());
    }

    #[test]
    fn test_validate_fsobj_modes() {
        let check = |line: &str| validate_fsobj(&line.parse::<Action>().unwrap(), true);
        assert!(check("dir path=a mode=755 owner=root group=bin").is_empty());
        assert!(check("dir path=a mode=0755 owner=root group=bin").is_empty());
        assert!(check("dir path=a mode=04755 owner=root group=bin").is_empty());
        assert_eq!(check("dir path=a mode=14755 owner=root group=bin").len(), 1);
        assert_eq!(check("dir path=a mode=75 owner=root group=bin").len(), 1);
        assert_eq!(check("dir path=a mode=0755").len(), 2);
    }
}
