// src/manifest/difference.rs

//! The result of comparing two manifests

use crate::actions::Action;
use serde::Serialize;
use std::fmt::Write;

/// Actions to add, change and remove to get from one manifest to another
///
/// `added` and `changed` are sorted by their new action; `removed` is sorted
/// in reverse so that children go before their parent directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestDifference {
    pub added: Vec<Action>,
    pub changed: Vec<(Action, Action)>,
    pub removed: Vec<Action>,
}

impl ManifestDifference {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }

    /// `(old, new)` pairs: additions, then changes, then removals
    pub fn pairs(&self) -> Vec<(Option<&Action>, Option<&Action>)> {
        let mut out: Vec<(Option<&Action>, Option<&Action>)> = Vec::with_capacity(self.len());
        out.extend(self.added.iter().map(|a| (None, Some(a))));
        out.extend(self.changed.iter().map(|(o, n)| (Some(o), Some(n))));
        out.extend(self.removed.iter().map(|a| (Some(a), None)));
        out
    }

    /// Every action involved, new side preferred
    pub fn combined(&self) -> Vec<&Action> {
        self.pairs()
            .into_iter()
            .filter_map(|(old, new)| new.or(old))
            .collect()
    }

    /// Readable description, one line per action plus one per changed attribute
    pub fn humanized(&self) -> String {
        let mut out = String::new();
        for action in &self.added {
            let _ = writeln!(out, "+ {}", action);
        }
        for (old, new) in &self.changed {
            let _ = writeln!(out, "~ {} {}", new.name(), new.distinguished_name());
            if old.hash() != new.hash() {
                let _ = writeln!(
                    out,
                    "    hash: {} -> {}",
                    old.hash().unwrap_or("<none>"),
                    new.hash().unwrap_or("<none>")
                );
            }
            for attr in old.differences(new) {
                let show = |a: &Action| {
                    a.get(&attr)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "<none>".to_string())
                };
                let _ = writeln!(out, "    {}: {} -> {}", attr, show(old), show(new));
            }
        }
        for action in &self.removed {
            let _ = writeln!(out, "- {}", action);
        }
        out
    }
}
