// src/variant.rs

//! Variants and facets of an image
//!
//! Variants (`variant.arch=i386`) pick one of several mutually exclusive
//! builds. Facets (`facet.doc.man=true`) switch optional content on and off
//! and may be given as fnmatch patterns such as `facet.locale.*`.

use crate::actions::{Action, AttrValue};
use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Variant values of an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variants {
    values: BTreeMap<String, String>,
}

impl Variants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variant; the name must start with `variant.`
    pub fn insert(&mut self, name: &str, value: &str) -> Result<()> {
        if !name.starts_with("variant.") {
            return Err(Error::InvalidVariant(format!(
                "'{}': name must start with 'variant.'",
                name
            )));
        }
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the image's variants permit this action
    ///
    /// Variants the image does not define are permissive, except debug
    /// variants, which only admit the non-debug (`false`) build.
    pub fn allow_action(&self, action: &Action) -> bool {
        for (name, value) in action.attrs() {
            if !name.starts_with("variant.") {
                continue;
            }
            let AttrValue::Single(value) = value else {
                return false;
            };
            match self.values.get(name) {
                Some(sys) if sys != value => return false,
                Some(_) => {}
                None if name.starts_with("variant.debug.") && value != "false" => return false,
                None => {}
            }
        }
        true
    }
}

/// Facet settings of an image
///
/// Lookup tries the exact name first, then patterns longest first. Facets
/// nobody set are on, except `facet.debug.*` and `facet.optional.*`.
#[derive(Debug, Clone, Default)]
pub struct Facets {
    values: BTreeMap<String, bool>,
    // (name, compiled pattern), longest name first
    patterns: Vec<(String, Pattern)>,
}

impl Facets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a facet or facet pattern; the name must start with `facet.`
    pub fn insert(&mut self, name: &str, value: bool) -> Result<()> {
        if !name.starts_with("facet.") {
            return Err(Error::InvalidFacet(format!(
                "'{}': name must start with 'facet.'",
                name
            )));
        }
        let pattern = Pattern::new(name)
            .map_err(|e| Error::InvalidFacet(format!("'{}': {}", name, e)))?;
        if self.values.insert(name.to_string(), value).is_none() {
            self.patterns.push((name.to_string(), pattern));
            self.patterns
                .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<bool> {
        let removed = self.values.remove(name);
        if removed.is_some() {
            self.patterns.retain(|(n, _)| n != name);
        }
        removed
    }

    /// Effective value of a facet
    pub fn get(&self, name: &str) -> bool {
        if let Some(value) = self.values.get(name) {
            return *value;
        }
        for (key, pattern) in &self.patterns {
            if pattern.matches(name) {
                return self.values.get(key).copied().unwrap_or(true);
            }
        }
        !(name.starts_with("facet.debug.") || name.starts_with("facet.optional."))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the image's facets permit this action
    ///
    /// Every facet tagged `all` must be on; of the remaining facet tags, at
    /// least one must be on.
    pub fn allow_action(&self, action: &Action) -> bool {
        let mut any = None;
        for (name, value) in action.attrs() {
            if !name.starts_with("facet.") {
                continue;
            }
            let enabled = self.get(name);
            if value.as_single() == Some("all") {
                if !enabled {
                    return false;
                }
            } else if enabled {
                any = Some(true);
            } else if any.is_none() {
                any = Some(false);
            }
        }
        any != Some(false)
    }
}

impl PartialEq for Facets {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Facets {}

impl Serialize for Facets {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Facets {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let values = BTreeMap::<String, bool>::deserialize(deserializer)?;
        let mut facets = Facets::new();
        for (name, value) in values {
            facets.insert(&name, value).map_err(serde::de::Error::custom)?;
        }
        Ok(facets)
    }
}

/// Result of [`VariantCombinationTemplate::difference`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDifference {
    /// Variant names present only on the left
    pub type_diffs: Vec<String>,
    /// `(name, value)` pairs present only on the left
    pub value_diffs: Vec<(String, String)>,
}

/// The variant names an action set uses, with every value seen for each
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCombinationTemplate {
    values: BTreeMap<String, BTreeSet<String>>,
}

impl VariantCombinationTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the values recorded for `name`
    pub fn insert<'a>(&mut self, name: &str, values: impl IntoIterator<Item = &'a str>) {
        self.values.insert(
            name.to_string(),
            values.into_iter().map(str::to_string).collect(),
        );
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add values for `name`, keeping what is already recorded
    pub fn merge_values<'a>(&mut self, name: &str, values: impl IntoIterator<Item = &'a str>) {
        self.values
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(str::to_string));
    }

    /// Add every value of every variant in `other`
    pub fn merge(&mut self, other: &VariantCombinationTemplate) {
        for (name, values) in &other.values {
            self.merge_values(name, values.iter().map(String::as_str));
        }
    }

    /// Take variants from `other` that are not recorded here at all
    pub fn merge_unknown(&mut self, other: &VariantCombinationTemplate) {
        for (name, values) in &other.values {
            self.values
                .entry(name.clone())
                .or_insert_with(|| values.clone());
        }
    }

    /// Variant names and values recorded here but missing from `other`
    pub fn difference(&self, other: &VariantCombinationTemplate) -> VariantDifference {
        let mut diff = VariantDifference::default();
        for (name, values) in &self.values {
            match other.values.get(name) {
                None => diff.type_diffs.push(name.clone()),
                Some(theirs) => diff.value_diffs.extend(
                    values
                        .difference(theirs)
                        .map(|v| (name.clone(), v.clone())),
                ),
            }
        }
        diff
    }

    pub fn issubset(&self, other: &VariantCombinationTemplate) -> bool {
        let diff = self.difference(other);
        diff.type_diffs.is_empty() && diff.value_diffs.is_empty()
    }
}

impl fmt::Display for VariantCombinationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str(" <none>");
        }
        for (name, values) in &self.values {
            let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
            write!(f, " {}={}", name, quoted.join(","))?;
        }
        Ok(())
    }
}
