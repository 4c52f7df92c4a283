// src/fmri/mod.rs

//! Fault Management Resource Identifiers for packages
//!
//! An FMRI names one package, optionally pinned to a publisher and a version:
//!
//! - `pkg://publisher/web/server/nginx@1.24,5.11-0.1:20240315T101500Z`
//! - `pkg:/web/server/nginx@1.24`
//! - `nginx`
//!
//! Equality covers publisher, name and version; hashing covers name and
//! version only, so FMRIs that differ just in publisher land in the same
//! bucket.

mod matching;

pub use matching::{
    MatchingFmri, exact_name_match, expand_matching_fmris, fmri_match, glob_match, regex_match,
};

use crate::error::{Error, FmriErrorKind, Result};
use crate::version::{Constraint, Version};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::LazyLock;

/// Prefix marking the image's preferred publisher in legacy catalogs
pub const PREF_PUB_PFX: &str = "_PRE";

static VALID_PKG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-\.\+]*(/[A-Za-z0-9][A-Za-z0-9_\-\.\+]*)*$")
        .expect("package name pattern is valid")
});

/// Components of an FMRI string before validation
pub(crate) struct FmriParts<'a> {
    pub publisher: Option<&'a str>,
    pub name: &'a str,
    pub version: Option<&'a str>,
}

/// Split an FMRI string into publisher, name and version text
pub(crate) fn split_fmri(fmri: &str) -> Result<FmriParts<'_>> {
    let syntax = |detail: &str| Error::IllegalFmri {
        fmri: fmri.to_string(),
        reason: FmriErrorKind::SyntaxError,
        detail: detail.to_string(),
    };

    let (body, version) = match fmri.rfind('@') {
        Some(idx) => (&fmri[..idx], Some(&fmri[idx + 1..])),
        None => (fmri, None),
    };

    let (publisher, name) = if let Some(rest) = body
        .strip_prefix("pkg://")
        .or_else(|| body.strip_prefix("//"))
    {
        let slash = rest
            .find('/')
            .ok_or_else(|| syntax("Missing '/' after publisher name"))?;
        (Some(&rest[..slash]), &rest[slash + 1..])
    } else if let Some(rest) = body.strip_prefix("pkg:/") {
        (None, rest)
    } else if let Some(rest) = body.strip_prefix('/') {
        (None, rest)
    } else {
        (None, body)
    };

    if name.is_empty() {
        return Err(syntax("Missing package name"));
    }

    Ok(FmriParts {
        publisher: publisher.filter(|p| !p.is_empty()),
        name,
        version,
    })
}

/// Percent-encode everything except ASCII alphanumerics and `_.-`
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// True when two publisher names refer to the same publisher,
/// treating the preferred-publisher prefix as transparent
pub fn is_same_publisher(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.unwrap_or("");
    let b = b.unwrap_or("");
    if a == b {
        return true;
    }
    fn strip(p: &str) -> Option<&str> {
        p.strip_prefix(PREF_PUB_PFX).map(|s| s.trim_start_matches('_'))
    }
    strip(a) == Some(b) || strip(b) == Some(a)
}

/// A concrete package identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fmri {
    publisher: Option<String>,
    name: String,
    version: Option<Version>,
}

impl Fmri {
    /// Parse an FMRI string
    ///
    /// `build_release` is handed to version parsing for versions that carry
    /// no build release of their own.
    pub fn parse(fmri: &str, build_release: Option<&str>) -> Result<Self> {
        let fmri = fmri.trim_end();
        let parts = split_fmri(fmri)?;

        let version = match parts.version {
            Some(text) => Some(Version::parse(text, build_release).map_err(|e| {
                Error::IllegalFmri {
                    fmri: fmri.to_string(),
                    reason: FmriErrorKind::BadVersion,
                    detail: e.to_string(),
                }
            })?),
            None => None,
        };

        if !VALID_PKG_NAME.is_match(parts.name) {
            return Err(Error::IllegalFmri {
                fmri: fmri.to_string(),
                reason: FmriErrorKind::BadPackageName,
                detail: parts.name.to_string(),
            });
        }

        Ok(Self {
            publisher: parts.publisher.map(str::to_string),
            name: parts.name.to_string(),
            version,
        })
    }

    /// Build an FMRI from already validated parts
    pub fn new(publisher: Option<&str>, name: &str, version: Option<Version>) -> Result<Self> {
        if !VALID_PKG_NAME.is_match(name) {
            return Err(Error::IllegalFmri {
                fmri: name.to_string(),
                reason: FmriErrorKind::BadPackageName,
                detail: name.to_string(),
            });
        }
        Ok(Self {
            publisher: publisher.filter(|p| !p.is_empty()).map(str::to_string),
            name: name.to_string(),
            version,
        })
    }

    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// Older name for [`Fmri::has_publisher`]
    pub fn has_authority(&self) -> bool {
        self.has_publisher()
    }

    pub fn has_version(&self) -> bool {
        self.version.is_some()
    }

    pub fn with_publisher(&self, publisher: Option<&str>) -> Self {
        Self {
            publisher: publisher.filter(|p| !p.is_empty()).map(str::to_string),
            ..self.clone()
        }
    }

    pub fn with_version(&self, version: Option<Version>) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Short version (`release[-branch]`), if versioned
    pub fn get_version(&self) -> Option<String> {
        self.version.as_ref().map(Version::get_short_version)
    }

    pub fn get_timestamp(&self) -> Option<chrono::NaiveDateTime> {
        self.version.as_ref().and_then(Version::get_timestamp)
    }

    fn scheme_prefix(publisher: Option<&str>, anarchy: bool) -> Option<&str> {
        match publisher {
            Some(p) if !p.starts_with(PREF_PUB_PFX) && !anarchy => Some(p),
            _ => None,
        }
    }

    /// The package stem, with or without publisher and scheme
    pub fn get_pkg_stem(&self, anarchy: bool, include_scheme: bool) -> String {
        match Self::scheme_prefix(self.publisher(), anarchy) {
            Some(publisher) if include_scheme => format!("pkg://{}/{}", publisher, self.name),
            Some(publisher) => format!("{}/{}", publisher, self.name),
            None if include_scheme => format!("pkg:/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// FMRI with the short version (no build release, no timestamp)
    pub fn get_short_fmri(
        &self,
        default_publisher: Option<&str>,
        anarchy: bool,
        include_scheme: bool,
    ) -> String {
        let version = self
            .version
            .as_ref()
            .map(|v| format!("@{}", v.get_short_version()))
            .unwrap_or_default();
        let publisher = self.publisher().or(default_publisher);
        let stem = match Self::scheme_prefix(publisher, anarchy) {
            Some(p) if include_scheme => format!("pkg://{}/{}", p, self.name),
            Some(p) => format!("{}/{}", p, self.name),
            None if include_scheme => format!("pkg:/{}", self.name),
            None => self.name.clone(),
        };
        format!("{}{}", stem, version)
    }

    /// Full FMRI string
    pub fn get_fmri(
        &self,
        default_publisher: Option<&str>,
        anarchy: bool,
        include_scheme: bool,
        include_build: bool,
    ) -> String {
        let publisher = self.publisher().or(default_publisher);
        let stem = match Self::scheme_prefix(publisher, anarchy) {
            Some(p) if include_scheme => format!("pkg://{}/{}", p, self.name),
            Some(p) => format!("{}/{}", p, self.name),
            None if include_scheme => format!("pkg:/{}", self.name),
            None => self.name.clone(),
        };
        match &self.version {
            Some(v) => format!("{}@{}", stem, v.get_version(include_build)),
            None => stem,
        }
    }

    /// Quoted `name/version` path used for on-disk package directories
    pub fn get_dir_path(&self, stemonly: bool) -> Result<String> {
        if stemonly {
            return Ok(quote(&self.name));
        }
        let version = self.require_version()?;
        Ok(format!("{}/{}", quote(&self.name), quote(&version.to_string())))
    }

    /// Quoted `name@version` used for links
    pub fn get_link_path(&self, stemonly: bool) -> Result<String> {
        if stemonly {
            return Ok(quote(&self.name));
        }
        let version = self.require_version()?;
        Ok(format!("{}@{}", quote(&self.name), quote(&version.to_string())))
    }

    /// Quoted `name@version` used in repository URLs
    pub fn get_url_path(&self) -> Result<String> {
        let version = self.require_version()?;
        Ok(format!("{}@{}", quote(&self.name), quote(&version.to_string())))
    }

    fn require_version(&self) -> Result<&Version> {
        self.version
            .as_ref()
            .ok_or_else(|| Error::MissingVersion(self.to_string()))
    }

    /// Every trailing sub-path of the name, shortest first
    ///
    /// `web/server/nginx` yields `nginx`, `server/nginx`, `web/server/nginx`.
    pub fn hierarchical_names(&self) -> Vec<String> {
        let segments: Vec<&str> = self.name.split('/').collect();
        (0..segments.len())
            .rev()
            .map(|start| segments[start..].join("/"))
            .collect()
    }

    /// Does the name match a regular expression anchored at its start
    pub fn is_name_match(&self, pattern: &str) -> Result<bool> {
        regex_match(&self.name, pattern)
    }

    pub fn is_same_pkg(&self, other: &Fmri) -> bool {
        self.name == other.name
    }

    /// Same package regardless of publisher and version
    pub fn is_similar(&self, other: &Fmri) -> bool {
        self.name == other.name
    }

    /// True when `self` is `other` or a later version of it under `constraint`
    ///
    /// Publishers are not compared.
    pub fn is_successor(&self, other: &Fmri, constraint: Constraint) -> bool {
        if self.name != other.name {
            return false;
        }
        match (&self.version, &other.version) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(ours), Some(theirs)) => ours.is_successor(theirs, constraint),
        }
    }

    /// `(publisher, name, version)`
    pub fn tuple(&self) -> (Option<&str>, &str, Option<&Version>) {
        (self.publisher(), &self.name, self.version.as_ref())
    }
}

impl PartialEq for Fmri {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.publisher == other.publisher
    }
}

impl Eq for Fmri {}

impl Hash for Fmri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl Ord for Fmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.publisher
            .cmp(&other.publisher)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for Fmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_fmri(None, false, true, true))
    }
}

impl FromStr for Fmri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

impl From<Fmri> for String {
    fn from(fmri: Fmri) -> Self {
        fmri.to_string()
    }
}

impl TryFrom<String> for Fmri {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s, None)
    }
}
