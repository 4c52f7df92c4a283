// src/actions/driver.rs

//! Device driver registrations
//!
//! Drivers are added to a system by the platform's own tooling, so install
//! and remove only log. Verification reads the binding files under `etc/`.

use super::handler::ActionHandler;
use super::{Action, IndexEntry};
use crate::error::Result;
use crate::image::{Image, PkgPlan};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use tracing::debug;

/// Rows of a whitespace separated binding file with exactly two fields
///
/// Comments start at a field beginning with `#`; quotes around fields are dropped.
fn read_binding_file(image: &Image, path: &str) -> io::Result<Vec<(String, String)>> {
    let text = match fs::read_to_string(image.path_for(path)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut rows = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line
            .split_whitespace()
            .take_while(|f| !f.starts_with('#'))
            .map(|f| f.trim_matches('"'))
            .collect();
        if let [name, value] = fields[..] {
            rows.push((name.to_string(), value.to_string()));
        }
    }
    Ok(rows)
}

/// Values bound to `name` in a binding file
fn bound_values(rows: &[(String, String)], name: &str) -> BTreeSet<String> {
    rows.iter()
        .filter(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .collect()
}

pub struct DriverHandler;

impl ActionHandler for DriverHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("name")
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let mut out = Vec::new();
        if let Some(name) = action.get_str("name") {
            out.push(IndexEntry::new("driver", "driver_name", name, None));
        }
        for alias in action.attrlist("alias") {
            out.push(IndexEntry::new("driver", "alias", alias, None));
        }
        out
    }

    fn install(&self, action: &Action, _plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        debug!("Driver {} left to the platform tooling", action.distinguished_name());
        Ok(())
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let name = action.get_str("name").unwrap_or_default();
        let mut errors = Vec::new();

        let majors = read_binding_file(plan.image, "etc/name_to_major")?;
        match majors.iter().filter(|(n, _)| n == name).count() {
            0 => {
                errors.push(format!("etc/name_to_major: '{}' entry not present", name));
                return Ok(errors);
            }
            1 => {}
            _ => errors.push(format!(
                "etc/name_to_major: more than one entry for '{}' is present",
                name
            )),
        }

        let checks = [
            ("alias", "etc/driver_aliases"),
            ("class", "etc/driver_classes"),
        ];
        for (attr, file) in checks {
            let on_disk = bound_values(&read_binding_file(plan.image, file)?, name);
            for value in action.attrlist(attr) {
                if !on_disk.contains(value) {
                    errors.push(format!("{} '{}' missing from {}", attr, value, file));
                }
            }
        }
        Ok(errors)
    }

    fn remove(&self, action: &Action, _plan: &PkgPlan<'_>) -> Result<()> {
        debug!("Driver {} left to the platform tooling", action.distinguished_name());
        Ok(())
    }
}
