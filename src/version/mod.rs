// src/version/mod.rs

//! Package version algebra
//!
//! A version string has the shape `RELEASE[,BUILD-RELEASE][-BRANCH][:TIMESTAMP]`,
//! for example `5.11,5.11-0.151:20240315T101500Z`. Every component after the
//! release may be omitted.
//!
//! Ordering and equality look at release, branch and timestamp. The build
//! release only takes part in explicit build-compatibility checks.

mod dotseq;

pub use dotseq::{DotSequence, MatchingDotSequence, SeqElement};

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Build release assumed when neither the version string nor the caller names one
pub const DEFAULT_BUILD_RELEASE: &str = "5.11";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// How strictly one version must relate to another to count as its successor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    None,
    Auto,
    Release,
    ReleaseMajor,
    ReleaseMinor,
    Branch,
    BranchMajor,
    BranchMinor,
}

impl Constraint {
    pub fn as_str(&self) -> &str {
        match self {
            Constraint::None => "none",
            Constraint::Auto => "auto",
            Constraint::Release => "release",
            Constraint::ReleaseMajor => "release-major",
            Constraint::ReleaseMinor => "release-minor",
            Constraint::Branch => "branch",
            Constraint::BranchMajor => "branch-major",
            Constraint::BranchMinor => "branch-minor",
        }
    }

    /// Numeric code used by catalog and policy files
    pub fn code(&self) -> u32 {
        match self {
            Constraint::None => 0,
            Constraint::Auto => 50,
            Constraint::Release => 100,
            Constraint::ReleaseMajor => 101,
            Constraint::ReleaseMinor => 102,
            Constraint::Branch => 200,
            Constraint::BranchMajor => 201,
            Constraint::BranchMinor => 202,
        }
    }

    pub fn all() -> [Constraint; 8] {
        [
            Constraint::None,
            Constraint::Auto,
            Constraint::Release,
            Constraint::ReleaseMajor,
            Constraint::ReleaseMinor,
            Constraint::Branch,
            Constraint::BranchMajor,
            Constraint::BranchMinor,
        ]
    }
}

impl FromStr for Constraint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Constraint::all()
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Invalid constraint: {}", s))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw textual components of a version string
struct VersionParts<'a> {
    release: &'a str,
    build: Option<&'a str>,
    branch: Option<&'a str>,
    timestr: Option<&'a str>,
}

/// Split on the separators, timestamp first, then branch, then build release
fn split_version(s: &str) -> VersionParts<'_> {
    let (head, timestr) = match s.find(':') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    };
    let (head, branch) = match head.find('-') {
        Some(idx) => (&head[..idx], Some(&head[idx + 1..])),
        None => (head, None),
    };
    let (release, build) = match head.find(',') {
        Some(idx) => (&head[..idx], Some(&head[idx + 1..])),
        None => (head, None),
    };
    VersionParts {
        release,
        build,
        branch,
        timestr,
    }
}

/// Validate a `YYYYMMDDTHHMMSSZ` timestamp and convert it
fn parse_timestamp(timestr: &str) -> Option<NaiveDateTime> {
    let bytes = timestr.as_bytes();
    if bytes.len() != 16 || bytes[8] != b'T' || bytes[15] != b'Z' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &timestr[range];
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };
    let date = digits(0..8)?;
    let time = digits(9..15)?;
    NaiveDate::from_ymd_opt((date / 10000) as i32, (date / 100) % 100, date % 100)?.and_hms_opt(
        time / 10000,
        (time / 100) % 100,
        time % 100,
    )
}

/// A concrete package version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    release: DotSequence,
    build_release: DotSequence,
    branch: Option<DotSequence>,
    timestr: Option<String>,
}

impl Version {
    /// Parse a version string
    ///
    /// `build_release` supplies the build release when the string carries
    /// none; it defaults to `5.11`.
    ///
    /// Examples:
    /// - "5.11" → release=5.11, build=5.11
    /// - "1.0,5.11-0.1" → release=1.0, build=5.11, branch=0.1
    /// - "1.0-0.1:20240315T101500Z" → adds a timestamp
    pub fn parse(version: &str, build_release: Option<&str>) -> Result<Self> {
        let illegal = |reason: String| Error::IllegalVersion {
            version: version.to_string(),
            reason,
        };

        if version.is_empty() {
            return Err(illegal("Version cannot be empty".to_string()));
        }

        let parts = split_version(version);
        if parts.release.is_empty() && parts.build.is_some() {
            return Err(illegal("Versions must have a release value".to_string()));
        }

        let bad = |e: Error| illegal(format!("Bad Version: {}", e));
        let release = DotSequence::parse(parts.release).map_err(bad)?;
        let branch = parts
            .branch
            .map(DotSequence::parse)
            .transpose()
            .map_err(bad)?;
        let build_release = match parts.build {
            Some(build) => DotSequence::parse(build),
            None => DotSequence::parse(build_release.unwrap_or(DEFAULT_BUILD_RELEASE)),
        }
        .map_err(bad)?;

        let timestr = match parts.timestr {
            Some(ts) => {
                if parse_timestamp(ts).is_none() {
                    return Err(illegal("Time must be ISO8601 format.".to_string()));
                }
                Some(ts.to_string())
            }
            None => None,
        };

        Ok(Self {
            release,
            build_release,
            branch,
            timestr,
        })
    }

    pub fn release(&self) -> &DotSequence {
        &self.release
    }

    pub fn build_release(&self) -> &DotSequence {
        &self.build_release
    }

    pub fn branch(&self) -> Option<&DotSequence> {
        self.branch.as_ref()
    }

    /// Raw `YYYYMMDDTHHMMSSZ` timestamp string
    pub fn timestr(&self) -> Option<&str> {
        self.timestr.as_deref()
    }

    pub fn get_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestr.as_deref().and_then(parse_timestamp)
    }

    /// Copy of this version stamped with `timestamp` (sub-second precision is dropped)
    pub fn with_timestamp(&self, timestamp: NaiveDateTime) -> Self {
        Self {
            timestr: Some(timestamp.format(TIMESTAMP_FORMAT).to_string()),
            ..self.clone()
        }
    }

    /// Render the version, optionally leaving out the build release
    pub fn get_version(&self, include_build: bool) -> String {
        let mut out = self.release.to_string();
        if include_build {
            out.push(',');
            out.push_str(&self.build_release.to_string());
        }
        if let Some(branch) = &self.branch {
            out.push('-');
            out.push_str(&branch.to_string());
        }
        if let Some(ts) = &self.timestr {
            out.push(':');
            out.push_str(ts);
        }
        out
    }

    /// `release[-branch]`
    pub fn get_short_version(&self) -> String {
        match &self.branch {
            Some(branch) => format!("{}-{}", self.release, branch),
            None => self.release.to_string(),
        }
    }

    /// True iff this version was built for a release older than `target`
    pub fn compatible_with_build(&self, target: &DotSequence) -> bool {
        self.build_release < *target
    }

    /// Evaluate whether `self` succeeds `other` under `constraint`
    ///
    /// Every mode is reflexive: a version is always its own successor.
    pub fn is_successor(&self, other: &Version, constraint: Constraint) -> bool {
        match constraint {
            Constraint::None => self >= other,
            Constraint::Auto => {
                if !other.release.is_subsequence(&self.release) {
                    return false;
                }
                match (&other.branch, &self.branch) {
                    (Some(theirs), Some(ours)) if !theirs.is_subsequence(ours) => return false,
                    (Some(_), None) => return false,
                    _ => {}
                }
                match (&other.timestr, &self.timestr) {
                    (Some(theirs), Some(ours)) => theirs == ours,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            }
            Constraint::Release => other.release.is_subsequence(&self.release),
            Constraint::ReleaseMajor => other.release.is_same_major(&self.release),
            Constraint::ReleaseMinor => other.release.is_same_minor(&self.release),
            Constraint::Branch => {
                if self.release != other.release {
                    return false;
                }
                match (&other.branch, &self.branch) {
                    (Some(theirs), Some(ours)) if !theirs.is_subsequence(ours) => return false,
                    (Some(_), None) => return false,
                    _ => {}
                }
                match (&other.timestr, &self.timestr) {
                    (Some(theirs), Some(ours)) => ours >= theirs,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            }
            Constraint::BranchMajor => match (&other.branch, &self.branch) {
                (Some(theirs), Some(ours)) => theirs.is_same_major(ours),
                (Some(_), None) => false,
                (None, _) => true,
            },
            Constraint::BranchMinor => match (&other.branch, &self.branch) {
                (Some(theirs), Some(ours)) => theirs.is_same_minor(ours),
                (Some(_), None) => false,
                (None, _) => true,
            },
        }
    }

    /// Successor test against a wildcard pattern (AUTO semantics)
    pub fn is_successor_of_pattern(&self, other: &MatchingVersion) -> bool {
        if !other.release.is_subsequence(&self.release) {
            return false;
        }
        if !other.branch.is_any() {
            match &self.branch {
                Some(ours) if other.branch.is_subsequence(ours) => {}
                _ => return false,
            }
        }
        match (&other.timestr, &self.timestr) {
            (None, _) => true,
            (Some(theirs), Some(ours)) => theirs == ours,
            (Some(_), None) => false,
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release
            && self.branch == other.branch
            && self.timestr == other.timestr
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.release.hash(state);
        self.branch.hash(state);
        self.timestr.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Option orders None first, so a missing component sorts before a present one
        self.release
            .cmp(&other.release)
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestr.cmp(&other.timestr))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_version(true))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s, None)
    }
}

/// A version pattern whose components may be `*`
///
/// Omitted components are wildcards, and the literal `latest` means `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingVersion {
    release: MatchingDotSequence,
    build_release: MatchingDotSequence,
    branch: MatchingDotSequence,
    /// `None` is the `*` wildcard
    timestr: Option<String>,
    match_latest: bool,
    original: String,
}

impl MatchingVersion {
    pub fn parse(version: &str, build_release: Option<&str>) -> Result<Self> {
        let illegal = |reason: String| Error::IllegalVersion {
            version: version.to_string(),
            reason,
        };
        if version.is_empty() {
            return Err(illegal("Version cannot be empty".to_string()));
        }

        let match_latest = version == "latest";
        let text = if match_latest { "*" } else { version };
        let parts = split_version(text);
        if parts.release.is_empty() {
            return Err(illegal("Versions must have a release value".to_string()));
        }

        let bad = |e: Error| illegal(format!("Bad Version: {}", e));
        let wildcard_or = |part: Option<&str>| -> Result<MatchingDotSequence> {
            match part {
                Some(p) if !p.is_empty() => MatchingDotSequence::parse(p),
                _ => Ok(MatchingDotSequence::any()),
            }
        };
        let release = MatchingDotSequence::parse(parts.release).map_err(bad)?;
        let build = parts.build.filter(|b| !b.is_empty()).or(build_release);
        let build_release = wildcard_or(build).map_err(bad)?;
        let branch = wildcard_or(parts.branch).map_err(bad)?;
        let timestr = match parts.timestr {
            None | Some("") | Some("*") => None,
            Some(ts) => {
                if parse_timestamp(ts).is_none() {
                    return Err(illegal("Time must be ISO8601 format.".to_string()));
                }
                Some(ts.to_string())
            }
        };

        let mut original = parts.release.to_string();
        if let Some(build) = build {
            original.push(',');
            original.push_str(build);
        }
        if let Some(branch) = parts.branch {
            original.push('-');
            original.push_str(branch);
        }
        if let Some(ts) = parts.timestr {
            original.push(':');
            original.push_str(ts);
        }

        Ok(Self {
            release,
            build_release,
            branch,
            timestr,
            match_latest,
            original,
        })
    }

    pub fn release(&self) -> &MatchingDotSequence {
        &self.release
    }

    pub fn build_release(&self) -> &MatchingDotSequence {
        &self.build_release
    }

    pub fn branch(&self) -> &MatchingDotSequence {
        &self.branch
    }

    pub fn timestr(&self) -> Option<&str> {
        self.timestr.as_deref()
    }

    /// True for the literal `latest`
    pub fn is_latest(&self) -> bool {
        self.match_latest
    }

    /// Wildcard-aware equality against a concrete version
    pub fn matches(&self, version: &Version) -> bool {
        if !self.release.matches(version.release())
            || !self.build_release.matches(version.build_release())
        {
            return false;
        }
        let branch_ok = match version.branch() {
            Some(branch) => self.branch.matches(branch),
            None => self.branch.is_any(),
        };
        let time_ok = match &self.timestr {
            None => true,
            Some(ts) => version.timestr() == Some(ts.as_str()),
        };
        branch_ok && time_ok
    }
}

impl fmt::Display for MatchingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.match_latest {
            f.write_str("latest")
        } else {
            f.write_str(&self.original)
        }
    }
}

impl FromStr for MatchingVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s, None).unwrap()
    }

    #[test]
    fn test_parse_components() {
        let ver = Version::parse("1.0,5.11-0.151:20240315T101500Z", None).unwrap();
        assert_eq!(ver.release().to_string(), "1.0");
        assert_eq!(ver.build_release().to_string(), "5.11");
        assert_eq!(ver.branch().unwrap().to_string(), "0.151");
        assert_eq!(ver.timestr(), Some("20240315T101500Z"));
        assert_eq!(ver.to_string(), "1.0,5.11-0.151:20240315T101500Z");
        assert_eq!(ver.get_short_version(), "1.0-0.151");
        assert_eq!(ver.get_version(false), "1.0-0.151:20240315T101500Z");
    }

    #[test]
    fn test_elided_forms() {
        let ver = v("1.0");
        assert_eq!(ver.build_release().to_string(), DEFAULT_BUILD_RELEASE);
        assert!(ver.branch().is_none());
        assert!(ver.timestr().is_none());

        let ver = Version::parse("1.0-3", Some("5.10")).unwrap();
        assert_eq!(ver.build_release().to_string(), "5.10");
        assert_eq!(ver.branch().unwrap().to_string(), "3");

        let ver = v("1.0:20240315T101500Z");
        assert!(ver.branch().is_none());
        assert!(ver.timestr().is_some());
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            ",5.11",
            "1.0-",
            "1.0,",
            "1.0:",
            "1.a",
            "1.0:2024031T101500Z",
            "1.0:20240315X101500Z",
            "1.0:20240230T101500Z",
            "1.0:20240315T256000Z",
        ] {
            assert!(
                matches!(Version::parse(bad, None), Err(Error::IllegalVersion { .. })),
                "{} should be rejected",
                bad
            );
        }
        let err = Version::parse(",5.11", None).unwrap_err();
        assert!(err.to_string().contains("Versions must have a release value"));
        let err = Version::parse("1.0:20241315T101500Z", None).unwrap_err();
        assert!(err.to_string().contains("ISO8601"));
    }

    #[test]
    fn test_ordering() {
        assert!(v("5.5.1-10:20240101T000006Z") < v("5.5.1-10:20240101T000008Z"));
        assert!(v("5.5.1-6") < v("5.5.1-10:20240101T000008Z"));
        assert!(v("5.5.1-6") < v("5.6,1"));
        assert!(v("5.7") > v("5.6,1"));
        assert!(v("5.10") < v("5.10.1"));
        assert!(v("5.11") > v("5.10.1"));
        assert!(v("1.0") < v("1.0-1"));
        assert!(v("1.0-1") < v("1.0-1:20240101T000000Z"));
    }

    #[test]
    fn test_equality_ignores_build_release() {
        let a = Version::parse("1.0-1", Some("5.10")).unwrap();
        let b = Version::parse("1.0-1", Some("5.11")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_total_order() {
        let versions: Vec<Version> = [
            "1.0",
            "1.0-1",
            "1.0-1.1",
            "1.0-2:20240101T000000Z",
            "1.0.0",
            "1.1,5.10",
            "0.9-9",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &versions {
            for b in &versions {
                let outcomes = [a < b, a == b, a > b];
                assert_eq!(outcomes.iter().filter(|x| **x).count(), 1);
                for c in &versions {
                    if a < b && b < c {
                        assert!(a < c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_successor_modes() {
        let v1 = v("5.5.1-10:20240101T000006Z");
        let v2 = v("5.5.1-10:20240101T000008Z");
        let v4 = v("5.5.1-6");
        let v5 = v("5.6,1");
        let v6 = v("5.7");
        let v7 = v("5.10");
        let v8 = v("5.10.1");

        assert!(v2.is_successor(&v1, Constraint::Branch));
        assert!(!v1.is_successor(&v2, Constraint::Branch));
        assert!(v4.is_successor(&v2, Constraint::Release));
        assert!(v6.is_successor(&v5, Constraint::ReleaseMajor));
        assert!(v8.is_successor(&v7, Constraint::ReleaseMajor));
        assert!(v8.is_successor(&v7, Constraint::Auto));
        assert!(!v7.is_successor(&v8, Constraint::Auto));
        assert!(!v6.is_successor(&v5, Constraint::ReleaseMinor));
        assert!(v8.is_successor(&v7, Constraint::None));
    }

    #[test]
    fn test_successor_reflexive() {
        for s in ["5.11", "1.0-3", "1.0,5.10-0.1.2:20240101T000000Z", "7"] {
            let ver = v(s);
            for c in Constraint::all() {
                assert!(ver.is_successor(&ver, c), "{} under {}", s, c);
            }
        }
    }

    #[test]
    fn test_compatible_with_build() {
        let ver = Version::parse("5.11", Some("5.5.1")).unwrap();
        assert!(!ver.compatible_with_build(&DotSequence::parse("5.4").unwrap()));
        assert!(ver.compatible_with_build(&DotSequence::parse("5.6").unwrap()));
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ver = v("1.0-1:20240315T101500Z");
        let ts = ver.get_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-03-15 10:15:00");
        let restamped = v("1.0-1").with_timestamp(ts);
        assert_eq!(restamped, ver);
    }

    #[test]
    fn test_matching_version() {
        let pat = MatchingVersion::parse("1.*", None).unwrap();
        assert!(pat.matches(&v("1.0-3")));
        assert!(pat.matches(&v("1.4.2")));
        assert!(!pat.matches(&v("2.0")));

        let latest = MatchingVersion::parse("latest", None).unwrap();
        assert!(latest.is_latest());
        assert_eq!(latest.to_string(), "latest");
        assert!(latest.matches(&v("9.9-9:20240101T000000Z")));

        let pat = MatchingVersion::parse("1.0-2", None).unwrap();
        assert!(v("1.0-2.1").is_successor_of_pattern(&pat));
        assert!(!v("1.0-3").is_successor_of_pattern(&pat));
        assert!(!v("1.0").is_successor_of_pattern(&pat));
        assert_eq!(pat.to_string(), "1.0-2");
    }

    #[test]
    fn test_constraint_names() {
        for c in Constraint::all() {
            assert_eq!(c.as_str().parse::<Constraint>().unwrap(), c);
        }
        assert_eq!(Constraint::Auto.code(), 50);
        assert!("sideways".parse::<Constraint>().is_err());
    }
}
