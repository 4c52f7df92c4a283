// src/error.rs

use std::fmt;
use thiserror::Error;

/// Reason an FMRI string was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmriErrorKind {
    BadVersion,
    BadPackageName,
    SyntaxError,
}

impl FmriErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            FmriErrorKind::BadVersion => "invalid version",
            FmriErrorKind::BadPackageName => "invalid package name",
            FmriErrorKind::SyntaxError => "syntax error",
        }
    }
}

impl fmt::Display for FmriErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an action line came from, when known
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionContext {
    pub fmri: Option<String>,
    pub lineno: Option<usize>,
}

impl fmt::Display for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fmri) = &self.fmri {
            write!(f, " in package '{}'", fmri)?;
        }
        if let Some(lineno) = self.lineno {
            write!(f, " at line {}", lineno)?;
        }
        Ok(())
    }
}

/// Core error types for pkgcore
#[derive(Error, Debug)]
pub enum Error {
    #[error("Illegal dot sequence: '{0}'")]
    IllegalDotSequence(String),

    #[error("Illegal version '{version}': {reason}")]
    IllegalVersion { version: String, reason: String },

    #[error("Illegal FMRI '{fmri}': {reason}: {detail}")]
    IllegalFmri {
        fmri: String,
        reason: FmriErrorKind,
        detail: String,
    },

    #[error("FMRI '{0}' has no version")]
    MissingVersion(String),

    #[error("Malformed action{context}: {reason}\n    {action}\n{}", caret(.position))]
    MalformedAction {
        action: String,
        position: usize,
        reason: String,
        context: ActionContext,
    },

    #[error("Unknown action type '{kind}'{context}: {action}")]
    UnknownAction {
        action: String,
        kind: String,
        context: ActionContext,
    },

    #[error("Invalid action{context}: {reason}\n    {action}")]
    InvalidAction {
        action: String,
        reason: String,
        context: ActionContext,
    },

    #[error("Action execution failed for '{action}': {message}")]
    ActionExecution {
        action: String,
        message: String,
        errno: Option<i32>,
        ignoreerrno: bool,
    },

    #[error("Filter syntax error at '{token}', expected one of: {}", .expected.join(", "))]
    FilterSyntax { token: String, expected: Vec<String> },

    #[error("Invalid variant: {0}")]
    InvalidVariant(String),

    #[error("Invalid facet: {0}")]
    InvalidFacet(String),

    #[error("Attribute '{name}' has invalid value '{value}': {reason}")]
    InvalidAttribute {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Marker line pointing at the offending column of an action string
fn caret(position: &usize) -> String {
    format!("{}^", " ".repeat(4 + *position))
}

impl Error {
    /// Attach package and line information to an action parse error
    ///
    /// Errors that are not about action text are returned unchanged.
    pub fn with_action_context(mut self, fmri: Option<&str>, lineno: Option<usize>) -> Self {
        if let Error::MalformedAction { context, .. }
        | Error::UnknownAction { context, .. }
        | Error::InvalidAction { context, .. } = &mut self
        {
            if context.fmri.is_none() {
                context.fmri = fmri.map(str::to_string);
            }
            if context.lineno.is_none() {
                context.lineno = lineno;
            }
        }
        self
    }

    /// OS error code behind an execution failure, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::ActionExecution { errno, .. } => *errno,
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
