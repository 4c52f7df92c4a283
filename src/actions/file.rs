// src/actions/file.rs

//! Regular files with payloads

use super::directory::basename;
use super::handler::{
    ActionHandler, ObjectType, apply_fsobj_attrs, exec_error, generic_different,
    make_parent_dirs, normalize_path, remove_fsobj, validate_fsobj, verify_fsobj_common,
};
use super::{Action, Attrs, IndexEntry};
use crate::error::{Error, Result};
use crate::image::PkgPlan;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// SHA-256 of everything `reader` yields, as lowercase hex
pub fn content_hash(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_hash(path: &Path) -> io::Result<String> {
    content_hash(&mut File::open(path)?)
}

pub struct FileHandler;

/// What to do with an existing file when `preserve` is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preserve {
    /// Keep the on-disk content
    Keep,
    /// Move the old file aside with this suffix, then install
    RenameOld(&'static str),
    /// Install the new content next to the old with this suffix
    RenameNew,
}

impl FileHandler {
    /// Decide whether an existing, locally modified file must be preserved
    fn preserve_type(action: &Action, path: &Path, orig: Option<&Action>) -> Option<Preserve> {
        let mode = action.get_str("preserve")?;
        if !path.is_file() {
            return None;
        }
        if let Some(orig_hash) = orig.and_then(|o| o.hash()) {
            if file_hash(path).ok().as_deref() == Some(orig_hash) {
                // unmodified since the old version was installed
                return None;
            }
        }
        Some(match mode {
            "renameold" => Preserve::RenameOld(".old"),
            "renameold.update" => Preserve::RenameOld(".update"),
            "legacy" => Preserve::RenameOld(".legacy"),
            "renamenew" => Preserve::RenameNew,
            _ => Preserve::Keep,
        })
    }

    /// Stream the payload into a temp file beside `path` and rename it in place
    pub(crate) fn write_payload(action: &Action, path: &Path) -> Result<()> {
        let parent = path.parent().unwrap_or(Path::new("/"));
        let mut temp =
            NamedTempFile::new_in(parent).map_err(|e| exec_error(action, "create", &e))?;

        let mut reader = action.open_data()?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| exec_error(action, "Error reading payload", &e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            temp.write_all(&buf[..n])
                .map_err(|e| exec_error(action, "write", &e))?;
        }
        let computed = format!("{:x}", hasher.finalize());

        if let Some(expected) = action.hash() {
            if computed != expected {
                return Err(Error::ActionExecution {
                    action: action.to_string(),
                    message: format!(
                        "Action data hash verification failure: expected {} computed {}",
                        expected, computed
                    ),
                    errno: None,
                    ignoreerrno: false,
                });
            }
        }

        temp.persist(path)
            .map_err(|e| exec_error(action, "rename", &e.error))?;
        Ok(())
    }
}

impl ActionHandler for FileHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("path")
    }

    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        normalize_path(attrs)
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        let mut errors = validate_fsobj(action, true);
        if let Some(size) = action.get_str("pkg.size") {
            if size.parse::<u64>().is_err() {
                errors.push("pkg.size must be an integer".to_string());
            }
        }
        errors
    }

    /// ELF files compare by `elfhash`; the content hash is ignored
    fn different(&self, a: &Action, b: &Action) -> bool {
        if a.get("elfhash").is_none() || b.get("elfhash").is_none() {
            return generic_different(a, b);
        }
        a.attrs() != b.attrs()
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let path = action.get_str("path").unwrap_or_default();
        let mut out = Vec::new();
        if let Some(hash) = action.hash() {
            out.push(IndexEntry::new("file", "content", hash, Some(hash)));
        }
        out.push(IndexEntry::new("file", "basename", basename(path), None));
        out.push(IndexEntry::new("file", "path", &format!("/{}", path), None));
        out
    }

    fn install(&self, action: &Action, plan: &PkgPlan<'_>, orig: Option<&Action>) -> Result<()> {
        let mut path: PathBuf = plan.image.path_for(action.get_str("path").unwrap_or_default());
        make_parent_dirs(action, &path)?;

        // an empty directory in the way is replaced
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir(&path).map_err(|e| exec_error(action, "rmdir", &e))?;
        }

        match Self::preserve_type(action, &path, orig) {
            Some(Preserve::Keep) => {
                info!("Preserving locally modified {}", path.display());
                return apply_fsobj_attrs(action, plan.image, &path);
            }
            Some(Preserve::RenameOld(suffix)) => {
                let mut old = path.clone().into_os_string();
                old.push(suffix);
                fs::rename(&path, &old).map_err(|e| exec_error(action, "rename", &e))?;
                debug!("Moved existing file aside to {:?}", old);
            }
            Some(Preserve::RenameNew) => {
                let mut new = path.clone().into_os_string();
                new.push(".new");
                path = PathBuf::from(new);
            }
            None => {}
        }

        Self::write_payload(action, &path)?;
        apply_fsobj_attrs(action, plan.image, &path)
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let check = verify_fsobj_common(action, plan.image, ObjectType::Regular)?;
        let mut errors = check.errors;
        let Some(meta) = check.meta.filter(|_| !check.abort) else {
            return Ok(errors);
        };
        if action.get("preserve").is_some() {
            return Ok(errors);
        }

        if action.get("elfhash").is_none() {
            if let Some(expected) = action.get_str("pkg.size").and_then(|s| s.parse::<u64>().ok()) {
                if meta.len() != expected {
                    errors.push(format!("Size: {} bytes should be {}", meta.len(), expected));
                }
            }
        }

        if let Some(expected) = action.hash() {
            let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
            match file_hash(&path) {
                Ok(found) if found != expected => {
                    errors.push(format!("Hash: {} should be {}", found, expected));
                }
                Ok(_) => {}
                Err(e) if e.raw_os_error() == Some(libc::EACCES) => {
                    errors.push("Skipping: Permission Denied".to_string());
                }
                Err(e) => errors.push(format!("Unexpected Error: {}", e)),
            }
        }
        Ok(errors)
    }

    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        remove_fsobj(action, &path)
    }
}
