// src/actions/mod.rs

//! Typed packaging actions
//!
//! An action is one line of a manifest: a kind (`file`, `dir`, `depend`, ...),
//! an optional content hash and a bag of attributes. Kinds are a closed enum;
//! each kind's behavior lives in an [`ActionHandler`] looked up through
//! [`ActionKind::handler`].
//!
//! ```text
//! file 0acf1107 path=usr/bin/ls mode=0555 owner=root group=bin
//! depend fmri=pkg:/system/library@0.5.11 type=require
//! set name=pkg.summary value="core utilities"
//! ```

mod attribute;
mod depend;
mod directory;
mod driver;
mod file;
mod handler;
mod legacy;
mod license;
mod link;
pub mod parser;
mod user;

pub use handler::{ActionHandler, ErrnoPolicy};
pub use parser::{ParsedAction, parse_action};

use crate::error::{ActionContext, Error, Result};
use crate::image::PkgPlan;
use crate::variant::VariantCombinationTemplate;
use flate2::bufread::GzDecoder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// An attribute value: repeated keys collapse into a list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Single(String),
    List(Vec<String>),
}

impl AttrValue {
    /// The value when it is a plain string
    pub fn as_single(&self) -> Option<&str> {
        match self {
            AttrValue::Single(v) => Some(v),
            AttrValue::List(_) => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, AttrValue::List(_))
    }

    /// All values in stored order
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttrValue::Single(v) => vec![v.as_str()],
            AttrValue::List(list) => list.iter().map(String::as_str).collect(),
        }
    }

    /// Order-insensitive equality for lists, exact for strings
    pub fn same_values(&self, other: &AttrValue) -> bool {
        match (self, other) {
            (AttrValue::List(a), AttrValue::List(b)) => {
                let mut a: Vec<&String> = a.iter().collect();
                let mut b: Vec<&String> = b.iter().collect();
                a.sort();
                b.sort();
                a == b
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Single(v) => f.write_str(v),
            AttrValue::List(list) => write!(f, "[{}]", list.join(", ")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Single(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Single(s)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(list: Vec<String>) -> Self {
        AttrValue::List(list)
    }
}

pub type Attrs = BTreeMap<String, AttrValue>;

/// Lazily opens an action's payload
pub type DataOpener = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Registered action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Set,
    Depend,
    Dir,
    File,
    Hardlink,
    Link,
    License,
    Legacy,
    Driver,
    User,
    Group,
    Signature,
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Set => "set",
            ActionKind::Depend => "depend",
            ActionKind::Dir => "dir",
            ActionKind::File => "file",
            ActionKind::Hardlink => "hardlink",
            ActionKind::Link => "link",
            ActionKind::License => "license",
            ActionKind::Legacy => "legacy",
            ActionKind::Driver => "driver",
            ActionKind::User => "user",
            ActionKind::Group => "group",
            ActionKind::Signature => "signature",
            ActionKind::Unknown => "unknown",
        }
    }

    pub fn all() -> [ActionKind; 13] {
        [
            ActionKind::Set,
            ActionKind::Depend,
            ActionKind::Dir,
            ActionKind::File,
            ActionKind::Hardlink,
            ActionKind::Link,
            ActionKind::License,
            ActionKind::Legacy,
            ActionKind::Driver,
            ActionKind::User,
            ActionKind::Group,
            ActionKind::Signature,
            ActionKind::Unknown,
        ]
    }

    /// Position of this kind when sorting a manifest
    ///
    /// Kinds without a slot of their own share the `unknown` slot.
    pub fn sort_order(&self) -> u8 {
        match self {
            ActionKind::Set => 0,
            ActionKind::Depend => 1,
            ActionKind::Group => 2,
            ActionKind::User => 3,
            ActionKind::Dir => 4,
            ActionKind::File => 5,
            ActionKind::Hardlink => 6,
            ActionKind::Link => 7,
            ActionKind::Driver => 8,
            ActionKind::Unknown | ActionKind::License => 9,
            ActionKind::Legacy => 10,
            ActionKind::Signature => 11,
        }
    }

    /// Behavior for this kind
    pub fn handler(&self) -> &'static dyn ActionHandler {
        match self {
            ActionKind::Set => &attribute::AttributeHandler,
            ActionKind::Signature => &attribute::SignatureHandler,
            ActionKind::Depend => &depend::DependHandler,
            ActionKind::Dir => &directory::DirectoryHandler,
            ActionKind::File => &file::FileHandler,
            ActionKind::Hardlink => &link::HardlinkHandler,
            ActionKind::Link => &link::LinkHandler,
            ActionKind::License => &license::LicenseHandler,
            ActionKind::Legacy => &legacy::LegacyHandler,
            ActionKind::Driver => &driver::DriverHandler,
            ActionKind::User => &user::UserHandler,
            ActionKind::Group => &user::GroupHandler,
            ActionKind::Unknown => &handler::GenericHandler,
        }
    }

    /// Attribute that identifies an action of this kind within a manifest
    pub fn key_attr(&self) -> Option<&'static str> {
        self.handler().key_attr()
    }

    /// Kinds whose `path` attribute names a filesystem object
    pub fn has_path(&self) -> bool {
        matches!(
            self,
            ActionKind::Dir | ActionKind::File | ActionKind::Link | ActionKind::Hardlink
        )
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ActionKind::all()
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown action type: {}", s))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search index tuple: (action type, index key, token, full value)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexEntry {
    pub action_type: String,
    pub key: String,
    pub token: String,
    pub full_value: Option<String>,
}

impl IndexEntry {
    pub fn new(action_type: &str, key: &str, token: &str, full_value: Option<&str>) -> Self {
        Self {
            action_type: action_type.to_string(),
            key: key.to_string(),
            token: token.to_string(),
            full_value: full_value.map(str::to_string),
        }
    }
}

/// Quote an attribute value for the action text format
pub fn quote_attr_value(s: &str) -> Cow<'_, str> {
    let needs_quotes = s.is_empty() || s.contains([' ', '\t', '\'', '"']);
    if !needs_quotes {
        return Cow::Borrowed(s);
    }
    if !s.contains('\\') {
        if !s.contains('"') {
            return Cow::Owned(format!("\"{}\"", s));
        }
        if !s.contains('\'') {
            return Cow::Owned(format!("'{}'", s));
        }
    }
    Cow::Owned(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
}

/// A single packaging action
#[derive(Clone)]
pub struct Action {
    kind: ActionKind,
    hash: Option<String>,
    attrs: Attrs,
    data: Option<DataOpener>,
}

impl Action {
    /// Build and validate an action
    ///
    /// Kind-specific normalization runs first (path stripping, the `set`
    /// shorthand), then the key attribute and kind-specific checks.
    pub fn new(kind: ActionKind, hash: Option<String>, attrs: Attrs) -> Result<Self> {
        let handler = kind.handler();
        let mut action = Action {
            kind,
            hash,
            attrs,
            data: None,
        };

        if let Err(reason) = handler.normalize(&mut action.attrs) {
            return Err(action.invalid(reason));
        }
        action.check_key_attr()?;
        handler.check(&action).map_err(|reason| action.invalid(reason))?;
        Ok(action)
    }

    /// Build an action from tokenized text
    pub fn from_parsed(text: &str, parsed: ParsedAction) -> Result<Self> {
        let kind = ActionKind::from_str(&parsed.kind).map_err(|_| Error::UnknownAction {
            action: text.to_string(),
            kind: parsed.kind.clone(),
            context: ActionContext::default(),
        })?;
        Action::new(kind, parsed.hash, parsed.attrs)
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidAction {
            action: self.to_string(),
            reason: reason.into(),
            context: ActionContext::default(),
        }
    }

    fn check_key_attr(&self) -> Result<()> {
        let Some(key) = self.kind.key_attr() else {
            return Ok(());
        };
        match self.attrs.get(key) {
            None => Err(self.invalid(format!("no value specified for key attribute '{}'", key))),
            Some(AttrValue::List(_)) => {
                let require_any = self.kind == ActionKind::Depend
                    && self.get_str("type") == Some("require-any");
                if require_any {
                    Ok(())
                } else {
                    Err(self.invalid(format!("{} attribute may only be specified once", key)))
                }
            }
            Some(AttrValue::Single(v)) if v.is_empty() && self.kind != ActionKind::Signature => {
                Err(self.invalid(format!("no value specified for key attribute '{}'", key)))
            }
            Some(AttrValue::Single(_)) => Ok(()),
        }
    }

    /// Publication-time checks that construction does not enforce
    ///
    /// Covers things like file modes and required ownership.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, value) in &self.attrs {
            let single_only =
                name.starts_with("variant.") || name.starts_with("facet.") || name == "reboot-needed";
            if single_only && value.is_list() {
                errors.push(format!("{} may only be specified once", name));
            }
        }
        errors.extend(self.kind.handler().validate(self));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(errors.join("; ")))
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Kind name as it appears in text form
    pub fn name(&self) -> &str {
        self.kind.as_str()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }

    /// A single-valued attribute
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_single)
    }

    /// Values of an attribute as a list; empty when absent
    pub fn attrlist(&self, name: &str) -> Vec<&str> {
        self.attrs.get(name).map(AttrValue::values).unwrap_or_default()
    }

    pub fn key_attr(&self) -> Option<&'static str> {
        self.kind.key_attr()
    }

    /// Value of the key attribute
    pub fn key_value(&self) -> Option<&AttrValue> {
        self.key_attr().and_then(|k| self.attrs.get(k))
    }

    /// Human label such as `path: usr/bin/ls`
    pub fn distinguished_name(&self) -> String {
        match (self.key_attr(), self.key_value()) {
            (Some(key), Some(value)) => format!("{}: {}", key, value),
            _ => self.to_string(),
        }
    }

    /// Names of the variant and facet tags on this action
    pub fn get_varcet_keys(&self) -> (Vec<&str>, Vec<&str>) {
        let variants = self
            .attrs
            .keys()
            .filter(|k| k.starts_with("variant."))
            .map(String::as_str)
            .collect();
        let facets = self
            .attrs
            .keys()
            .filter(|k| k.starts_with("facet."))
            .map(String::as_str)
            .collect();
        (variants, facets)
    }

    /// Variant combinations this action is tagged for
    pub fn get_variant_template(&self) -> VariantCombinationTemplate {
        let mut template = VariantCombinationTemplate::new();
        for name in self.get_varcet_keys().0 {
            template.merge_values(name, self.attrlist(name));
        }
        template
    }

    /// Copy with only the preserved attributes (the key attribute always stays)
    pub fn strip(&self, preserve: &[&str]) -> Action {
        let key = self.key_attr();
        let attrs = self
            .attrs
            .iter()
            .filter(|(k, _)| preserve.contains(&k.as_str()) || Some(k.as_str()) == key)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Action {
            kind: self.kind,
            hash: self.hash.clone(),
            attrs,
            data: self.data.clone(),
        }
    }

    /// Copy without any variant tags
    pub fn strip_variants(&self) -> Action {
        let mut stripped = self.clone();
        stripped.attrs.retain(|k, _| !k.starts_with("variant."));
        stripped
    }

    /// Drop repeated values from list attributes, keeping first occurrences
    pub fn consolidate_attrs(mut self) -> Self {
        for value in self.attrs.values_mut() {
            if let AttrValue::List(list) = value {
                let mut seen = std::collections::HashSet::new();
                list.retain(|v| seen.insert(v.clone()));
            }
        }
        self
    }

    /// Declared payload size (`pkg.size`), zero when absent
    pub fn get_size(&self) -> u64 {
        self.get_str("pkg.size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Attach a payload opener
    pub fn with_data(mut self, opener: DataOpener) -> Self {
        self.data = Some(opener);
        self
    }

    /// Attach a payload read from a file; records `pkg.size` if unset
    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path)?;
        if meta.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a file", path.display()),
            )));
        }
        self.attrs
            .entry("pkg.size".to_string())
            .or_insert_with(|| AttrValue::Single(meta.len().to_string()));
        let opener: DataOpener = Arc::new(move || {
            File::open(&path).map(|f| Box::new(f) as Box<dyn Read + Send>)
        });
        Ok(self.with_data(opener))
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Open the payload, transparently decompressing gzip streams
    pub fn open_data(&self) -> Result<Box<dyn Read + Send>> {
        let opener = self.data.as_ref().ok_or_else(|| Error::ActionExecution {
            action: self.to_string(),
            message: "no payload available".to_string(),
            errno: None,
            ignoreerrno: false,
        })?;
        let mut reader = BufReader::new(opener()?);
        let gzipped = reader.fill_buf()?.starts_with(&[0x1f, 0x8b]);
        if gzipped {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }

    /// Whether `other` is a change that matters when replacing this action
    pub fn different(&self, other: &Action) -> bool {
        self.kind.handler().different(self, other)
    }

    /// Attribute names whose values differ, sorted
    ///
    /// `mode` values are compared numerically so `755` and `0755` agree.
    pub fn differences(&self, other: &Action) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for (k, v) in &self.attrs {
            let differs = match other.attrs.get(k) {
                None => true,
                Some(ov) if k == "mode" => {
                    let parse = |v: &AttrValue| {
                        v.as_single().and_then(|m| u32::from_str_radix(m, 8).ok())
                    };
                    match (parse(v), parse(ov)) {
                        (Some(a), Some(b)) => a != b,
                        _ => !v.same_values(ov),
                    }
                }
                Some(ov) => !v.same_values(ov),
            };
            if differs {
                keys.push(k.clone());
            }
        }
        keys.extend(
            other
                .attrs
                .keys()
                .filter(|k| !self.attrs.contains_key(*k))
                .cloned(),
        );
        keys.sort();
        keys
    }

    /// Search index tuples for this action
    pub fn generate_indices(&self) -> Vec<IndexEntry> {
        self.kind.handler().generate_indices(self)
    }

    /// Apply this action to an image
    pub fn install(&self, plan: &PkgPlan<'_>, orig: Option<&Action>) -> Result<()> {
        debug!("Installing {}", self.distinguished_name());
        self.kind.handler().install(self, plan, orig)?;
        info!("Installed {} {}", self.name(), self.distinguished_name());
        Ok(())
    }

    /// Discrepancies between this action and the image; empty means correct
    pub fn verify(&self, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        self.kind.handler().verify(self, plan)
    }

    /// Undo this action in an image
    pub fn remove(&self, plan: &PkgPlan<'_>) -> Result<()> {
        self.kind.handler().remove(self, plan)?;
        info!("Removed {} {}", self.name(), self.distinguished_name());
        Ok(())
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("hash", &self.hash)
            .field("attrs", &self.attrs)
            .field("data", &self.data.is_some())
            .finish()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        let mut hash_attr = None;
        if let Some(hash) = &self.hash {
            // anything the tokenizer would split or unquote goes out as hash=
            let positional = !hash.is_empty()
                && !hash.contains(|c: char| c == '=' || c == '"' || c == '\'' || c.is_whitespace());
            if !positional {
                hash_attr = Some(hash.as_str());
            } else {
                write!(f, " {}", hash)?;
            }
        }

        let mut emitted_hash = hash_attr.is_none();
        for (k, v) in &self.attrs {
            if !emitted_hash && k.as_str() > "hash" {
                write!(f, " hash={}", quote_attr_value(hash_attr.unwrap_or_default()))?;
                emitted_hash = true;
            }
            for value in v.values() {
                write!(f, " {}={}", k, quote_attr_value(value))?;
            }
        }
        if !emitted_hash {
            write!(f, " hash={}", quote_attr_value(hash_attr.unwrap_or_default()))?;
        }
        Ok(())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = parse_action(s)?;
        Action::from_parsed(s, parsed)
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.hash == other.hash && self.attrs == other.attrs
    }
}

impl Eq for Action {}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .sort_order()
            .cmp(&other.kind.sort_order())
            .then_with(|| self.kind.as_str().cmp(other.kind.as_str()))
            .then_with(|| self.key_value().cmp(&other.key_value()))
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
