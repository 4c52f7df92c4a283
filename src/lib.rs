// src/lib.rs

//! pkgcore: package identity, actions and manifests
//!
//! The core model of an image packaging system: packages named by FMRIs,
//! their contents described as typed actions, and the manifest engine that
//! compares package versions to drive install, update, verify and search.
//!
//! # Architecture
//!
//! - Versions: dot-sequence releases with branch and timestamp, successor checks
//! - FMRIs: `pkg://publisher/name@version` parsing, rendering and matching
//! - Actions: one typed line each, with per-kind install/verify/remove
//! - Manifests: action sets keyed by (kind, key attribute) for diffing
//! - Variants, facets and filters: which actions apply to an image
//! - Transport statistics: mirror ranking from observed behavior

pub mod actions;
pub mod config;
mod error;
pub mod filter;
pub mod fmri;
pub mod image;
pub mod manifest;
pub mod transport;
pub mod variant;
pub mod version;

pub use actions::{Action, ActionKind, AttrValue};
pub use config::Config;
pub use error::{ActionContext, Error, FmriErrorKind, Result};
pub use filter::{Filter, apply_filters, compile_filter};
pub use fmri::Fmri;
pub use image::{Image, PkgPlan};
pub use manifest::{Manifest, ManifestDifference};
pub use transport::{RepoChooser, RepoStats, RepoUri};
pub use variant::{Facets, VariantCombinationTemplate, Variants};
pub use version::{Constraint, DotSequence, Version};
