// src/manifest/mod.rs

//! Package manifests
//!
//! A manifest is the set of actions that make up one package version, one
//! action per line:
//!
//! ```text
//! set name=pkg.fmri value=pkg:/web/server/nginx@1.24,5.11-0.1
//! dir path=etc/nginx mode=0755 owner=root group=sys
//! file 0acf1107 path=etc/nginx/nginx.conf mode=0644 owner=root group=sys \
//!     preserve=true
//! ```
//!
//! Manifests are compared by grouping actions on their kind and key
//! attribute value; see [`Manifest::difference`].

mod difference;

pub use difference::ManifestDifference;

use crate::actions::{Action, ActionKind, AttrValue, IndexEntry};
use crate::error::{Error, Result};
use crate::filter::{Filter, apply_filters};
use crate::fmri::Fmri;
use crate::image::PkgPlan;
use crate::variant::{Facets, VariantCombinationTemplate, Variants};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Identity of an action within a manifest: its kind and key value
///
/// Actions without a key attribute are identified by their full text.
pub type ActionKey = (ActionKind, String);

fn action_key(action: &Action) -> ActionKey {
    let key = match action.key_value() {
        Some(value) => value.to_string(),
        None => action.to_string(),
    };
    (action.kind(), key)
}

/// An ordered collection of actions for one package version
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    fmri: Option<Fmri>,
    actions: Vec<Action>,
    by_type: HashMap<ActionKind, Vec<usize>>,
    attributes: BTreeMap<String, AttrValue>,
    variants: BTreeMap<String, BTreeSet<String>>,
    facets: BTreeMap<String, BTreeSet<String>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty manifest for a known package; parse errors will name it
    pub fn with_fmri(fmri: Fmri) -> Self {
        Self {
            fmri: Some(fmri),
            ..Self::default()
        }
    }

    pub fn fmri(&self) -> Option<&Fmri> {
        self.fmri.as_ref()
    }

    pub fn set_fmri(&mut self, fmri: Fmri) {
        self.fmri = Some(fmri);
    }

    /// Parse manifest text
    pub fn parse(content: &str) -> Result<Self> {
        let mut manifest = Manifest::new();
        manifest.set_content(content)?;
        Ok(manifest)
    }

    /// Read a manifest file; gzip-compressed files are accepted
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let content = if bytes.starts_with(&[0x1f, 0x8b]) {
            let mut text = String::new();
            GzDecoder::new(bytes.as_slice()).read_to_string(&mut text)?;
            text
        } else {
            String::from_utf8(bytes).map_err(|e| {
                Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?
        };
        let manifest = Self::parse(&content)?;
        debug!("Loaded manifest {}", path.display());
        Ok(manifest)
    }

    /// Build a manifest from already constructed actions
    pub fn from_actions(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut manifest = Manifest::new();
        for action in actions {
            manifest.add_action(action);
        }
        manifest
    }

    /// Replace the contents with parsed manifest text
    ///
    /// Leading whitespace is ignored, a trailing backslash joins the next
    /// line, and blank lines and `#` comments are skipped. Errors carry the
    /// package and line number.
    pub fn set_content(&mut self, content: &str) -> Result<()> {
        self.actions.clear();
        self.by_type.clear();
        self.attributes.clear();
        self.variants.clear();
        self.facets.clear();

        let fmri = self.fmri.as_ref().map(|f| f.to_string());
        let mut accumulate = String::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim_start();
            if let Some(partial) = line.strip_suffix('\\') {
                accumulate.push_str(partial);
                continue;
            }
            let text = if accumulate.is_empty() {
                line.to_string()
            } else {
                let mut joined = std::mem::take(&mut accumulate);
                joined.push_str(line);
                joined
            };

            if text.is_empty() || text.starts_with('#') {
                continue;
            }

            let action = Action::from_str(&text)
                .map_err(|e| e.with_action_context(fmri.as_deref(), Some(idx + 1)))?;
            self.add_action(action);
        }

        if let Some(AttrValue::Single(value)) = self.attributes.get("pkg.fmri") {
            if self.fmri.is_none() {
                self.fmri = Fmri::parse(value, None).ok();
            }
        }
        debug!(
            "Parsed {} actions for {}",
            self.actions.len(),
            self.fmri
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "<unnamed>".to_string())
        );
        Ok(())
    }

    /// Append an action, recording package attributes, variants and facets
    pub fn add_action(&mut self, action: Action) {
        if action.kind() == ActionKind::Set {
            self.fill_attributes(&action);
        }
        let (variants, facets) = action.get_varcet_keys();
        for name in variants {
            self.variants
                .entry(name.to_string())
                .or_default()
                .extend(action.attrlist(name).into_iter().map(str::to_string));
        }
        for name in facets {
            self.facets
                .entry(name.to_string())
                .or_default()
                .extend(action.attrlist(name).into_iter().map(str::to_string));
        }

        self.by_type
            .entry(action.kind())
            .or_default()
            .push(self.actions.len());
        self.actions.push(action);
    }

    /// First `set` action for a name wins; `fmri` is stored as `pkg.fmri`
    fn fill_attributes(&mut self, action: &Action) {
        let (Some(name), Some(value)) = (action.get_str("name"), action.get("value")) else {
            return;
        };
        let name = if name == "fmri" { "pkg.fmri" } else { name };
        self.attributes
            .entry(name.to_string())
            .or_insert_with(|| value.clone());
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn gen_actions_by_type(&self, kind: ActionKind) -> impl Iterator<Item = &Action> {
        self.by_type
            .get(&kind)
            .into_iter()
            .flatten()
            .map(|&idx| &self.actions[idx])
    }

    /// Key attribute value of every action of a kind
    pub fn gen_key_attribute_value_by_type(
        &self,
        kind: ActionKind,
    ) -> impl Iterator<Item = Option<&AttrValue>> {
        self.gen_actions_by_type(kind).map(Action::key_value)
    }

    /// Package attributes from `set` actions
    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// A package attribute, or `default` when unset
    pub fn get(&self, key: &str, default: &str) -> String {
        self.attributes
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_string())
    }

    /// A boolean package attribute
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let Some(value) = self.attributes.get(key) else {
            return Ok(default);
        };
        match value.as_single().map(str::to_lowercase).as_deref() {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            _ => Err(Error::InvalidAttribute {
                name: key.to_string(),
                value: value.to_string(),
                reason: "not 'true' or 'false'".to_string(),
            }),
        }
    }

    /// Total payload size declared by the actions
    pub fn get_size(&self) -> u64 {
        self.actions.iter().map(Action::get_size).sum()
    }

    /// Variant values declared on actions
    pub fn get_variants(&self) -> VariantCombinationTemplate {
        let mut template = VariantCombinationTemplate::new();
        for (name, values) in &self.variants {
            template.merge_values(name, values.iter().map(String::as_str));
        }
        template
    }

    /// Facet values declared on actions
    pub fn get_facets(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.facets
    }

    /// Variants the package says it supports (`set name=variant.arch ...`)
    pub fn get_all_variants(&self) -> VariantCombinationTemplate {
        let mut template = VariantCombinationTemplate::new();
        for (name, value) in &self.attributes {
            if name.starts_with("variant.") {
                template.merge_values(name, value.values());
            }
        }
        template
    }

    /// What changes going from `old` to `new`
    ///
    /// Actions present on both sides are compared with
    /// [`Action::different`].
    pub fn difference(old: &Manifest, new: &Manifest) -> ManifestDifference {
        let old_map: HashMap<ActionKey, &Action> =
            old.actions.iter().map(|a| (action_key(a), a)).collect();
        let new_map: HashMap<ActionKey, &Action> =
            new.actions.iter().map(|a| (action_key(a), a)).collect();

        let mut added: Vec<Action> = new_map
            .iter()
            .filter(|(k, _)| !old_map.contains_key(*k))
            .map(|(_, a)| (*a).clone())
            .collect();
        let mut removed: Vec<Action> = old_map
            .iter()
            .filter(|(k, _)| !new_map.contains_key(*k))
            .map(|(_, a)| (*a).clone())
            .collect();
        let mut changed: Vec<(Action, Action)> = new_map
            .iter()
            .filter_map(|(k, n)| {
                let o = old_map.get(k)?;
                o.different(n).then(|| ((*o).clone(), (*n).clone()))
            })
            .collect();

        added.sort();
        changed.sort_by(|a, b| a.1.cmp(&b.1));
        removed.sort_by(|a, b| b.cmp(a));

        info!(
            "Manifest difference: {} added, {} changed, {} removed",
            added.len(),
            changed.len(),
            removed.len()
        );
        ManifestDifference {
            added,
            changed,
            removed,
        }
    }

    /// Actions sharing a kind and key that are not identical to each other
    pub fn duplicates(&self) -> Vec<(ActionKey, Vec<&Action>)> {
        let mut groups: BTreeMap<ActionKey, Vec<&Action>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action_key(action)).or_default().push(action);
        }

        let mut out = Vec::new();
        for (key, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort();
            let conflicting = group.windows(2).any(|w| w[0].different(w[1]));
            if conflicting {
                group.dedup_by(|a, b| !a.different(*b));
                out.push((key, group));
            }
        }
        out
    }

    /// Like comm(1) over any number of manifests
    ///
    /// Returns, per manifest, the actions not shared by all of them, and the
    /// actions that every manifest has identically (taken from the first).
    pub fn comm<'a>(manifests: &[&'a Manifest]) -> (Vec<Vec<&'a Action>>, Vec<&'a Action>) {
        let maps: Vec<HashMap<ActionKey, &'a Action>> = manifests
            .iter()
            .map(|m| m.actions.iter().map(|a| (action_key(a), a)).collect())
            .collect();
        let Some(first) = maps.first() else {
            return (Vec::new(), Vec::new());
        };

        let common: HashSet<&ActionKey> = first
            .keys()
            .filter(|k| maps.iter().all(|m| m.contains_key(*k)))
            .filter(|k| maps.windows(2).all(|w| !w[0][*k].different(w[1][*k])))
            .collect();

        let mut unique: Vec<Vec<&'a Action>> = maps
            .iter()
            .map(|m| {
                m.iter()
                    .filter(|(k, _)| !common.contains(k))
                    .map(|(_, a)| *a)
                    .collect()
            })
            .collect();
        for list in &mut unique {
            list.sort();
        }
        let mut shared: Vec<&'a Action> = common.iter().map(|k| first[*k]).collect();
        shared.sort();
        (unique, shared)
    }

    /// A copy holding only the actions every filter lets through
    pub fn filter(&self, filters: &[Filter]) -> Manifest {
        self.retain_copy(|a| apply_filters(a, filters))
    }

    /// A copy holding only the actions an image's variants and facets allow
    pub fn filter_variants(&self, variants: &Variants, facets: &Facets) -> Manifest {
        self.retain_copy(|a| variants.allow_action(a) && facets.allow_action(a))
    }

    fn retain_copy(&self, keep: impl Fn(&Action) -> bool) -> Manifest {
        let mut out = Manifest {
            fmri: self.fmri.clone(),
            ..Manifest::default()
        };
        for action in self.actions.iter().filter(|&a| keep(a)) {
            out.add_action(action.clone());
        }
        debug!("Filtered manifest: kept {} of {}", out.len(), self.len());
        out
    }

    /// Publication-time validation of every action
    pub fn validate(&self) -> Result<()> {
        let fmri = self.fmri.as_ref().map(|f| f.to_string());
        for action in &self.actions {
            action
                .validate()
                .map_err(|e| e.with_action_context(fmri.as_deref(), None))?;
        }
        Ok(())
    }

    /// SHA-256 of the sorted manifest text
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Search index tuples of all actions
    pub fn search_index(&self) -> Vec<IndexEntry> {
        self.actions
            .par_iter()
            .flat_map_iter(|a| a.generate_indices())
            .collect()
    }

    /// Attach payloads named by content hash from a directory
    ///
    /// Actions whose payload is missing are left without one.
    pub fn attach_payloads(mut self, dir: &Path) -> Result<Self> {
        for action in &mut self.actions {
            let Some(hash) = action.hash().map(str::to_string) else {
                continue;
            };
            if !matches!(action.kind(), ActionKind::File | ActionKind::License) {
                continue;
            }
            let path = dir.join(&hash);
            if path.is_file() {
                *action = action.clone().with_data_file(path)?;
            }
        }
        Ok(self)
    }

    /// Verify every action against an image, in parallel
    ///
    /// Only actions with findings are returned, in manifest order.
    pub fn verify(&self, plan: &PkgPlan<'_>) -> Result<Vec<(&Action, Vec<String>)>> {
        let results: Vec<(&Action, Vec<String>)> = self
            .actions
            .par_iter()
            .map(|a| a.verify(plan).map(|errors| (a, errors)))
            .collect::<Result<_>>()?;
        Ok(results
            .into_iter()
            .filter(|(_, errors)| !errors.is_empty())
            .collect())
    }

    /// Move an image from `origin` (or nothing) to this manifest
    ///
    /// Removals run first, then additions, then updates.
    pub fn install(&self, plan: &PkgPlan<'_>, origin: Option<&Manifest>) -> Result<ManifestDifference> {
        let empty = Manifest::new();
        let diff = Manifest::difference(origin.unwrap_or(&empty), self);

        for action in &diff.removed {
            action.remove(plan)?;
        }
        for action in &diff.added {
            action.install(plan, None)?;
        }
        for (old, new) in &diff.changed {
            new.install(plan, Some(old))?;
        }
        info!(
            "Installed {} into {}",
            self.fmri
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "package".to_string()),
            plan.image.root().display()
        );
        Ok(diff)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fmri) = &self.fmri {
            if !self.attributes.contains_key("pkg.fmri") {
                writeln!(f, "set name=pkg.fmri value={}", fmri)?;
            }
        }
        let mut sorted: Vec<&Action> = self.actions.iter().collect();
        sorted.sort();
        for action in sorted {
            writeln!(f, "{}", action)?;
        }
        Ok(())
    }
}

impl FromStr for Manifest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Manifest::parse(s)
    }
}
