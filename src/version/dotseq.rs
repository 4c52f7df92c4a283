// src/version/dotseq.rs

//! Dot-delimited integer sequences
//!
//! `DotSequence` is the building block of every version component. Ordering
//! is lexicographic over the integers, and a sequence that is a strict prefix
//! of another sorts first, so `5.10 < 5.10.1` and `1.2 < 1.2.0`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A non-empty sequence of non-negative integers such as `5.11.0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DotSequence(Vec<u64>);

/// Parse one element: digits only, no sign, no zero padding
fn parse_element(elem: &str) -> Option<u64> {
    if elem.is_empty() || !elem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if elem.len() > 1 && elem.starts_with('0') {
        return None;
    }
    elem.parse().ok()
}

impl DotSequence {
    /// Parse a dotted string such as `"5.11.1"`
    pub fn parse(s: &str) -> Result<Self> {
        let parts = s
            .split('.')
            .map(parse_element)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::IllegalDotSequence(s.to_string()))?;
        Ok(Self(parts))
    }

    /// Build from integers; the sequence must not be empty
    pub fn from_parts(parts: Vec<u64>) -> Result<Self> {
        if parts.is_empty() {
            return Err(Error::IllegalDotSequence("Empty DotSequence".to_string()));
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn major(&self) -> u64 {
        self.0[0]
    }

    pub fn minor(&self) -> Option<u64> {
        self.0.get(1).copied()
    }

    /// True when `self` is a leading prefix of `other` (or equal to it)
    pub fn is_subsequence(&self, other: &DotSequence) -> bool {
        self.0.len() <= other.0.len() && other.0.starts_with(&self.0)
    }

    pub fn is_same_major(&self, other: &DotSequence) -> bool {
        self.major() == other.major()
    }

    pub fn is_same_minor(&self, other: &DotSequence) -> bool {
        self.major() == other.major() && self.minor() == other.minor()
    }
}

impl FromStr for DotSequence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

impl From<DotSequence> for String {
    fn from(seq: DotSequence) -> Self {
        seq.to_string()
    }
}

impl TryFrom<String> for DotSequence {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

/// One element of a matching sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqElement {
    Num(u64),
    Any,
}

impl SeqElement {
    fn matches(&self, value: u64) -> bool {
        match self {
            SeqElement::Any => true,
            SeqElement::Num(n) => *n == value,
        }
    }
}

/// A dot sequence whose elements may be `*`
///
/// Used for user-supplied patterns. A trailing `*` absorbs any number of
/// further elements, so `5.*` matches both `5.11` and `5.11.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchingDotSequence(Vec<SeqElement>);

impl MatchingDotSequence {
    pub fn parse(s: &str) -> Result<Self> {
        let parts = s
            .split('.')
            .map(|elem| {
                if elem == "*" {
                    Some(SeqElement::Any)
                } else {
                    parse_element(elem).map(SeqElement::Num)
                }
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::IllegalDotSequence(s.to_string()))?;
        Ok(Self(parts))
    }

    /// The pattern that matches everything
    pub fn any() -> Self {
        Self(vec![SeqElement::Any])
    }

    pub fn is_any(&self) -> bool {
        self.0 == [SeqElement::Any]
    }

    pub fn elements(&self) -> &[SeqElement] {
        &self.0
    }

    /// Wildcard-aware equality against a concrete sequence
    pub fn matches(&self, other: &DotSequence) -> bool {
        let ours = &self.0;
        let theirs = other.parts();
        let last = ours[ours.len() - 1];
        for i in 0..ours.len().max(theirs.len()) {
            match (ours.get(i), theirs.get(i)) {
                (Some(elem), Some(value)) => {
                    if !elem.matches(*value) {
                        return false;
                    }
                }
                // pattern exhausted: only a trailing `*` keeps matching
                (None, Some(_)) => {
                    if last != SeqElement::Any {
                        return false;
                    }
                }
                (Some(elem), None) => {
                    if *elem != SeqElement::Any {
                        return false;
                    }
                }
                (None, None) => break,
            }
        }
        true
    }

    /// True when the pattern is a prefix of `other`, with `*` matching any element
    pub fn is_subsequence(&self, other: &DotSequence) -> bool {
        if self.is_any() {
            return true;
        }
        if self.0.len() > other.len() {
            return false;
        }
        self.0
            .iter()
            .zip(other.parts())
            .all(|(elem, value)| elem.matches(*value))
    }

    pub fn is_same_major(&self, other: &DotSequence) -> bool {
        self.0[0].matches(other.major())
    }

    pub fn is_same_minor(&self, other: &DotSequence) -> bool {
        if !self.is_same_major(other) {
            return false;
        }
        match (self.0.get(1), other.minor()) {
            (Some(SeqElement::Any), _) => true,
            (Some(SeqElement::Num(a)), Some(b)) => *a == b,
            (None, None) => true,
            _ => false,
        }
    }
}

impl FromStr for MatchingDotSequence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MatchingDotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match elem {
                SeqElement::Num(n) => write!(f, "{}", n)?,
                SeqElement::Any => f.write_str("*")?,
            }
        }
        Ok(())
    }
}
