// src/fmri/matching.rs

//! Pattern FMRIs and name matchers used to search catalogs

use super::{Fmri, is_same_publisher, split_fmri};
use crate::error::{Error, FmriErrorKind, Result};
use crate::version::MatchingVersion;
use glob::Pattern;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static VALID_PATTERN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/\-\.\+\*\?]*$").expect("pattern name regex is valid"));

/// `/`-anchored suffix match: `nginx` and `server/nginx` both match `web/server/nginx`
pub fn fmri_match(pkg_name: &str, pattern: &str) -> bool {
    pkg_name == pattern || pkg_name.ends_with(&format!("/{}", pattern))
}

/// Shell-glob match over the whole name
pub fn glob_match(pkg_name: &str, pattern: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(pkg_name))
        .unwrap_or(false)
}

pub fn exact_name_match(pkg_name: &str, pattern: &str) -> bool {
    pkg_name == pattern
}

/// Regular expression match anchored at the start of the name
pub fn regex_match(pkg_name: &str, pattern: &str) -> Result<bool> {
    let re = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| Error::IllegalFmri {
        fmri: pattern.to_string(),
        reason: FmriErrorKind::BadPackageName,
        detail: e.to_string(),
    })?;
    Ok(re.is_match(pkg_name))
}

/// An FMRI whose name may contain `*`/`?` and whose version may contain `*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingFmri {
    publisher: Option<String>,
    name: String,
    version: Option<MatchingVersion>,
}

impl MatchingFmri {
    pub fn parse(pattern: &str, build_release: Option<&str>) -> Result<Self> {
        let pattern = pattern.trim_end();
        let parts = split_fmri(pattern)?;

        let version = match parts.version {
            Some(text) => Some(MatchingVersion::parse(text, build_release).map_err(|e| {
                Error::IllegalFmri {
                    fmri: pattern.to_string(),
                    reason: FmriErrorKind::BadVersion,
                    detail: e.to_string(),
                }
            })?),
            None => None,
        };

        if !VALID_PATTERN_NAME.is_match(parts.name) {
            return Err(Error::IllegalFmri {
                fmri: pattern.to_string(),
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

    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&MatchingVersion> {
        self.version.as_ref()
    }

    fn is_glob(&self) -> bool {
        self.name.contains(['*', '?'])
    }

    /// Does `candidate` satisfy this pattern
    ///
    /// Glob names match the whole package name; plain names use the
    /// `/`-anchored suffix rule. A version pattern must be satisfied under
    /// AUTO semantics.
    pub fn matches(&self, candidate: &Fmri) -> bool {
        if self.publisher.is_some() && !is_same_publisher(self.publisher(), candidate.publisher()) {
            return false;
        }

        let name_ok = if self.is_glob() {
            glob_match(candidate.get_name(), &self.name)
        } else {
            fmri_match(candidate.get_name(), &self.name)
        };
        if !name_ok {
            return false;
        }

        match (&self.version, candidate.version()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(pattern), Some(version)) => version.is_successor_of_pattern(pattern),
        }
    }
}

impl fmt::Display for MatchingFmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.publisher {
            Some(p) => write!(f, "pkg://{}/{}", p, self.name)?,
            None => write!(f, "pkg:/{}", self.name)?,
        }
        if let Some(v) = &self.version {
            write!(f, "@{}", v)?;
        }
        Ok(())
    }
}

/// Lazily yield the catalog entries matched by any of `patterns`
pub fn expand_matching_fmris<'a, I>(
    catalog: I,
    patterns: &'a [MatchingFmri],
) -> impl Iterator<Item = &'a Fmri> + 'a
where
    I: IntoIterator<Item = &'a Fmri>,
    I::IntoIter: 'a,
{
    catalog
        .into_iter()
        .filter(move |fmri| patterns.iter().any(|p| p.matches(fmri)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(s: &str) -> Fmri {
        Fmri::parse(s, None).unwrap()
    }

    fn catalog() -> Vec<Fmri> {
        vec![
            f("pkg://example.org/web/server/nginx@1.24-0.1"),
            f("pkg://example.org/web/server/nginx@1.25-0.1"),
            f("pkg://example.org/web/server/apache-22@2.2.34"),
            f("pkg://other.org/library/zlib@1.3"),
            f("pkg://example.org/system/library/zlib@1.2.13"),
        ]
    }

    #[test]
    fn test_name_matchers() {
        assert!(fmri_match("web/server/nginx", "nginx"));
        assert!(fmri_match("web/server/nginx", "server/nginx"));
        assert!(!fmri_match("web/server/nginx", "ginx"));
        assert!(glob_match("web/server/nginx", "web/*"));
        assert!(glob_match("web/server/nginx", "*ngin?"));
        assert!(exact_name_match("a/b", "a/b"));
        assert!(regex_match("web/server/nginx", "web/.*/ng").unwrap());
        assert!(!regex_match("web/server/nginx", "server").unwrap());
        assert!(regex_match("x", "(").is_err());
    }

    #[test]
    fn test_pattern_parse() {
        let pat = MatchingFmri::parse("pkg://example.org/web/*@1.*", None).unwrap();
        assert_eq!(pat.publisher(), Some("example.org"));
        assert_eq!(pat.get_name(), "web/*");
        assert_eq!(pat.to_string(), "pkg://example.org/web/*@1.*");
        assert!(MatchingFmri::parse("pkg:/bad name", None).is_err());
    }

    #[test]
    fn test_expand_by_stem() {
        let cat = catalog();
        let patterns = vec![MatchingFmri::parse("zlib", None).unwrap()];
        let found: Vec<String> = expand_matching_fmris(&cat, &patterns)
            .map(|f| f.get_name().to_string())
            .collect();
        assert_eq!(found, vec!["library/zlib", "system/library/zlib"]);
    }

    #[test]
    fn test_expand_by_glob_and_version() {
        let cat = catalog();
        let patterns = vec![MatchingFmri::parse("web/server/*@1.25", None).unwrap()];
        let found: Vec<&Fmri> = expand_matching_fmris(&cat, &patterns).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_version().unwrap(), "1.25-0.1");

        let patterns = vec![MatchingFmri::parse("nginx@latest", None).unwrap()];
        assert_eq!(expand_matching_fmris(&cat, &patterns).count(), 2);
    }

    #[test]
    fn test_expand_by_publisher() {
        let cat = catalog();
        let patterns = vec![MatchingFmri::parse("pkg://other.org/*", None).unwrap()];
        let found: Vec<&Fmri> = expand_matching_fmris(&cat, &patterns).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].publisher(), Some("other.org"));
    }
}
