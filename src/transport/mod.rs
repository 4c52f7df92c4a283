// src/transport/mod.rs

//! Mirror selection for package transport
//!
//! The transport itself (HTTP, file) lives outside this crate. What lives
//! here is the bookkeeping it reports into: per-mirror statistics and the
//! chooser that orders mirrors by how they have behaved so far.

mod stats;

pub use stats::{RepoChooser, RepoStats, SharedRepoStats};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository location with an optional priority
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoUri {
    pub uri: String,
    pub priority: Option<u32>,
}

impl RepoUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// The URI without trailing slashes; statistics are keyed on this
    pub fn normalized(&self) -> &str {
        self.uri.trim_end_matches('/')
    }

    /// URI scheme such as `http` or `file`; empty when there is none
    pub fn scheme(&self) -> &str {
        match self.uri.split_once(':') {
            Some((scheme, _))
                if !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) =>
            {
                scheme
            }
            _ => "",
        }
    }
}

impl fmt::Display for RepoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl From<&str> for RepoUri {
    fn from(uri: &str) -> Self {
        RepoUri::new(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized() {
        assert_eq!(RepoUri::new("http://pkg.example.com/").normalized(), "http://pkg.example.com");
        assert_eq!(RepoUri::new("file:///repo//").normalized(), "file:///repo");
    }

    #[test]
    fn test_scheme() {
        assert_eq!(RepoUri::new("https://mirror/").scheme(), "https");
        assert_eq!(RepoUri::new("file:///var/repo").scheme(), "file");
        assert_eq!(RepoUri::new("/var/repo").scheme(), "");
    }
}
