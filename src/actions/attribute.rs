// src/actions/attribute.rs

//! `set` (package metadata) and `signature` actions

use super::handler::ActionHandler;
use super::{Action, AttrValue, Attrs, IndexEntry};
use crate::fmri::Fmri;

/// Metadata names that only ever carry one value
const SINGLE_VALUED: &[&str] = &["pkg.summary", "pkg.obsolete", "pkg.renamed", "pkg.description"];

pub struct AttributeHandler;

impl AttributeHandler {
    /// `(scheme, levels)` pairs of an `info.classification` value
    fn category_info(action: &Action) -> Vec<(&str, &str)> {
        action
            .attrlist("value")
            .into_iter()
            .map(|v| v.split_once(':').unwrap_or(("", v)))
            .collect()
    }

    fn fmri_indices(action: &Action, name: &str, fmri: &Fmri) -> Vec<IndexEntry> {
        let stem = fmri.get_pkg_stem(true, false);
        let mut tokens = vec![stem.clone()];
        if let Some(version) = fmri.version() {
            tokens.push(version.build_release().to_string());
            tokens.push(version.release().to_string());
            if let Some(ts) = version.timestr() {
                tokens.push(ts.to_string());
            }
        }
        tokens.extend(fmri.hierarchical_names());
        tokens
            .iter()
            .map(|t| IndexEntry::new(action.name(), name, t, Some(stem.as_str())))
            .collect()
    }
}

impl ActionHandler for AttributeHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("name")
    }

    /// `set pkg.summary=foo` is shorthand for `set name=pkg.summary value=foo`
    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        if attrs.len() == 1 && !attrs.contains_key("name") {
            if let Some((name, value)) = attrs.pop_first() {
                attrs.insert("name".to_string(), AttrValue::Single(name));
                attrs.insert("value".to_string(), value);
            }
        }
        Ok(())
    }

    fn check(&self, action: &Action) -> std::result::Result<(), String> {
        if action.get("name").is_none() || action.get("value").is_none() {
            return Err("Missing \"name\" or \"value\" attribute".to_string());
        }
        Ok(())
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        let mut errors = Vec::new();
        let name = action.get_str("name").unwrap_or_default();
        if SINGLE_VALUED.contains(&name) && action.get("value").is_some_and(AttrValue::is_list) {
            errors.push("value may only be specified once".to_string());
        }
        if name == "pkg.fmri" || name == "fmri" {
            if let Some(value) = action.get_str("value") {
                if let Err(e) = Fmri::parse(value, None) {
                    errors.push(e.to_string());
                }
            }
        }
        errors
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let kind = action.name();
        let name = action.get_str("name").unwrap_or_default();

        if name == "info.classification" {
            let mut out = Vec::new();
            for (_scheme, levels) in Self::category_info(action) {
                out.push(IndexEntry::new(kind, name, levels, Some(levels)));
                for level in levels.split('/') {
                    for word in level.split_whitespace() {
                        out.push(IndexEntry::new(kind, name, word, Some(levels)));
                    }
                }
            }
            return out;
        }

        match action.get("value") {
            Some(AttrValue::List(values)) => values
                .iter()
                .flat_map(|v| {
                    if v.contains(' ') {
                        v.split_whitespace()
                            .map(|w| IndexEntry::new(kind, name, w, Some(v.as_str())))
                            .collect::<Vec<_>>()
                    } else {
                        vec![IndexEntry::new(kind, name, v, None)]
                    }
                })
                .collect(),
            Some(AttrValue::Single(value)) => {
                if name == "fmri" || name == "pkg.fmri" {
                    if let Ok(fmri) = Fmri::parse(value, None) {
                        return Self::fmri_indices(action, name, &fmri);
                    }
                }
                if value.contains(' ') {
                    value
                        .split_whitespace()
                        .map(|w| IndexEntry::new(kind, name, w, Some(value.as_str())))
                        .collect()
                } else {
                    vec![IndexEntry::new(kind, name, value, None)]
                }
            }
            None => Vec::new(),
        }
    }
}

/// Signature actions; verification of the signature itself is not done here
pub struct SignatureHandler;

impl ActionHandler for SignatureHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("value")
    }

    fn normalize(&self, attrs: &mut Attrs) -> std::result::Result<(), String> {
        attrs
            .entry("value".to_string())
            .or_insert_with(|| AttrValue::Single(String::new()));
        attrs
            .entry("version".to_string())
            .or_insert_with(|| AttrValue::Single("0".to_string()));
        Ok(())
    }

    fn check(&self, action: &Action) -> std::result::Result<(), String> {
        if action.get("algorithm").is_none() {
            return Err("Missing algorithm attribute".to_string());
        }
        Ok(())
    }
}
