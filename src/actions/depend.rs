// src/actions/depend.rs

//! Package dependencies

use super::handler::ActionHandler;
use super::{Action, IndexEntry};

/// Dependency types a `depend` action may declare
pub const KNOWN_TYPES: &[&str] = &[
    "conditional",
    "exclude",
    "group",
    "incorporate",
    "optional",
    "origin",
    "parent",
    "require",
    "require-any",
];

pub struct DependHandler;

impl ActionHandler for DependHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("fmri")
    }

    fn check(&self, action: &Action) -> std::result::Result<(), String> {
        let dtype = match action.get("type") {
            None => return Err("Missing type attribute".to_string()),
            Some(value) => value.to_string(),
        };
        if !KNOWN_TYPES.contains(&dtype.as_str()) {
            return Err(format!("Unknown type ({}) in depend action", dtype));
        }
        Ok(())
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        let mut errors = Vec::new();
        let dtype = action.get_str("type").unwrap_or_default();
        if dtype == "conditional" && action.get("predicate").is_none() {
            errors.push("predicate is required".to_string());
        }
        if action.get("predicate").is_some() && dtype != "conditional" {
            errors.push("a predicate may only be specified for conditional dependencies".to_string());
        }
        for attr in ["predicate", "root-image"] {
            if action.get(attr).is_some_and(|v| v.is_list()) {
                errors.push(format!("{} may only be specified once", attr));
            }
        }
        errors
    }

    /// One entry per target, plus one for its stem when a version is given
    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        let Some(dtype) = action.get_str("type") else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for target in action.attrlist("fmri") {
            let target = target.strip_prefix("pkg:/").unwrap_or(target);
            out.push(IndexEntry::new("depend", dtype, target, None));
            if let Some((stem, _)) = target.split_once('@') {
                out.push(IndexEntry::new("depend", dtype, stem, None));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_type_required_and_known() {
        let err = "depend fmri=foo".parse::<Action>().unwrap_err();
        assert!(err.to_string().contains("Missing type attribute"));

        let err = "depend fmri=foo type=bogus".parse::<Action>().unwrap_err();
        assert!(matches!(err, Error::InvalidAction { .. }));
        assert!(err.to_string().contains("Unknown type (bogus)"));

        assert!("depend fmri=foo type=require".parse::<Action>().is_ok());
    }

    #[test]
    fn test_require_any_allows_fmri_list() {
        assert!("depend fmri=a fmri=b type=require-any".parse::<Action>().is_ok());
        assert!("depend fmri=a fmri=b type=require".parse::<Action>().is_err());
    }

    #[test]
    fn test_indices() {
        let a: Action = "depend fmri=pkg:/library/zlib@1.3-0.1 type=require"
            .parse()
            .unwrap();
        let tokens: Vec<String> = a.generate_indices().into_iter().map(|e| e.token).collect();
        assert_eq!(tokens, vec!["library/zlib@1.3-0.1", "library/zlib"]);
        assert!(a.generate_indices().iter().all(|e| e.key == "require"));
    }

    #[test]
    fn test_validate_predicate() {
        let a: Action = "depend fmri=a type=conditional".parse().unwrap();
        assert!(a.validate().is_err());
        let a: Action = "depend fmri=a type=conditional predicate=b".parse().unwrap();
        assert!(a.validate().is_ok());
        let a: Action = "depend fmri=a type=require predicate=b".parse().unwrap();
        assert!(a.validate().is_err());
    }
}
