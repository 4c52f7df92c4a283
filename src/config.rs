// src/config.rs

//! Configuration file
//!
//! A small JSON document; every field is optional.
//!
//! ```json
//! {
//!   "default_publisher": "openindiana.org",
//!   "build_release": "5.11",
//!   "variants": { "variant.arch": "i386" },
//!   "facets": { "facet.doc.*": false },
//!   "filters": ["locale=en | locale=sv"]
//! }
//! ```

use crate::error::{Error, Result};
use crate::filter::{Filter, compile_filter};
use crate::variant::{Facets, Variants};
use crate::version::DEFAULT_BUILD_RELEASE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Publisher assumed when rendering FMRIs that carry none
    pub default_publisher: Option<String>,
    pub build_release: String,
    /// Image variants, `variant.*` name to value
    pub variants: BTreeMap<String, String>,
    /// Image facets, `facet.*` name or pattern to value
    pub facets: BTreeMap<String, bool>,
    /// Filter expressions applied to manifest contents
    pub filters: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_publisher: None,
            build_release: DEFAULT_BUILD_RELEASE.to_string(),
            variants: BTreeMap::new(),
            facets: BTreeMap::new(),
            filters: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.check()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load the file when given and present, otherwise use the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.build_release.is_empty() {
            return Err(Error::Config("build_release cannot be empty".to_string()));
        }
        self.variants()?;
        self.facets()?;
        self.compiled_filters()?;
        Ok(())
    }

    pub fn variants(&self) -> Result<Variants> {
        let mut variants = Variants::new();
        for (name, value) in &self.variants {
            variants.insert(name, value)?;
        }
        Ok(variants)
    }

    pub fn facets(&self) -> Result<Facets> {
        let mut facets = Facets::new();
        for (name, value) in &self.facets {
            facets.insert(name, *value)?;
        }
        Ok(facets)
    }

    pub fn compiled_filters(&self) -> Result<Vec<Filter>> {
        self.filters.iter().map(|f| compile_filter(f)).collect()
    }
}
