// src/actions/link.rs

//! Symbolic and hard links

use super::directory::basename;
use super::handler::{
    ActionHandler, ObjectType, apply_fsobj_attrs, exec_error, make_parent_dirs, normalize_path,
    remove_fsobj, verify_fsobj_common,
};
use super::{Action, AttrValue, Attrs, IndexEntry};
use crate::error::{Error, Result};
use crate::image::{Image, PkgPlan};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Attributes a link may carry only once
const LINK_SINGLE_ATTRS: &[&str] = &[
    "target",
    "mediator",
    "mediator-version",
    "mediator-implementation",
    "mediator-priority",
];

fn link_indices(action: &Action) -> Vec<IndexEntry> {
    let path = action.get_str("path").unwrap_or_default();
    let mut out = vec![
        IndexEntry::new(action.name(), "basename", basename(path), None),
        IndexEntry::new(action.name(), "path", &format!("/{}", path), None),
    ];
    if action.get("mediator").is_some() {
        for (k, v) in action.attrs() {
            if k.starts_with("mediator") {
                for value in v.values() {
                    out.push(IndexEntry::new(action.name(), k, value, None));
                }
            }
        }
    }
    out
}

fn link_validate(action: &Action) -> Vec<String> {
    let mut errors = Vec::new();
    match action.get("target") {
        None => errors.push("target is required".to_string()),
        Some(AttrValue::Single(t)) if t.trim().is_empty() => {
            errors.push("target is required".to_string())
        }
        _ => {}
    }
    for attr in LINK_SINGLE_ATTRS {
        if action.get(attr).is_some_and(|v| v.is_list()) {
            errors.push(format!("{} may only be specified once", attr));
        }
    }
    errors
}

/// Clear whatever non-directory object sits at `path`
fn clear_path(action: &Action, path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            fs::remove_file(path).map_err(|e| exec_error(action, "unlink", &e))
        }
        Ok(_) => fs::remove_dir(path).map_err(|e| exec_error(action, "rmdir", &e)),
        Err(_) => Ok(()),
    }
}

fn target_attr<'a>(action: &'a Action) -> Result<&'a str> {
    action
        .get_str("target")
        .ok_or_else(|| Error::ActionExecution {
            action: action.to_string(),
            message: "link has no target".to_string(),
            errno: None,
            ignoreerrno: false,
        })
}

pub struct LinkHandler;

impl ActionHandler for LinkHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("path")
    }

    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        normalize_path(attrs)
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        link_validate(action)
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        link_indices(action)
    }

    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let target = target_attr(action)?;
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        make_parent_dirs(action, &path)?;
        clear_path(action, &path)?;
        std::os::unix::fs::symlink(target, &path).map_err(|e| exec_error(action, "symlink", &e))?;
        apply_fsobj_attrs(action, plan.image, &path)
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let check = verify_fsobj_common(action, plan.image, ObjectType::Symlink)?;
        let mut errors = check.errors;
        if check.abort {
            return Ok(errors);
        }
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        let expected = action.get_str("target").unwrap_or_default();
        match fs::read_link(&path) {
            Ok(found) => {
                let found = found.to_string_lossy();
                if found != expected {
                    errors.push(format!("Target: '{}' should be '{}'", found, expected));
                }
            }
            Err(e) => errors.push(format!("Unexpected Error: {}", e)),
        }
        Ok(errors)
    }

    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        remove_fsobj(action, &path)
    }
}

pub struct HardlinkHandler;

impl HardlinkHandler {
    /// The link target inside the image; relative targets start at the link's directory
    fn target_path(action: &Action, image: &Image) -> Result<PathBuf> {
        let target = target_attr(action)?;
        let resolved = if target.starts_with('/') {
            image.resolve(target)
        } else {
            let path = action.get_str("path").unwrap_or_default();
            let dir = Path::new(path).parent().unwrap_or(Path::new(""));
            image.resolve(&dir.join(target).to_string_lossy())
        };
        resolved.ok_or_else(|| Error::ActionExecution {
            action: action.to_string(),
            message: format!("hardlink target '{}' is outside the image", target),
            errno: None,
            ignoreerrno: false,
        })
    }
}

impl ActionHandler for HardlinkHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("path")
    }

    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        normalize_path(attrs)
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        link_validate(action)
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        link_indices(action)
    }

    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let target = Self::target_path(action, plan.image)?;
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        make_parent_dirs(action, &path)?;
        clear_path(action, &path)?;
        fs::hard_link(&target, &path).map_err(|e| exec_error(action, "link", &e))
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let check = verify_fsobj_common(action, plan.image, ObjectType::Regular)?;
        let mut errors = check.errors;
        if check.abort {
            return Ok(errors);
        }

        let target = Self::target_path(action, plan.image)?;
        if !target.exists() {
            errors.push(format!(
                "Target '{}' does not exist",
                action.get_str("target").unwrap_or_default()
            ));
        }
        if !errors.is_empty() {
            return Ok(errors);
        }

        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        match (fs::metadata(&path), fs::metadata(&target)) {
            (Ok(p), Ok(t)) if p.ino() != t.ino() || p.dev() != t.dev() => {
                errors.push(format!(
                    "Broken: Path and Target ({}) inodes not the same",
                    action.get_str("target").unwrap_or_default()
                ));
            }
            (Ok(_), Ok(_)) => {}
            (Err(e), _) | (_, Err(e)) => errors.push(format!("Unexpected Error: {}", e)),
        }
        Ok(errors)
    }

    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let path = plan.image.path_for(action.get_str("path").unwrap_or_default());
        remove_fsobj(action, &path)
    }
}
