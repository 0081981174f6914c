//! Error and diagnostic types.
//!
//! Fatal conditions are [`AnalyzeError`]s and abort the translation unit
//! (or, for lexical errors, the affected line). Non-fatal findings are
//! [`Diagnostic`]s collected on the translation unit and logged at WARN.

use std::fmt;

use thiserror::Error;

use crate::token::Loc;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The tokenizer could not classify the next characters.
    #[error("unknown token at {loc}: `{found}'")]
    Lexical { loc: Loc, found: String },

    /// Unexpected scope state on finalize. Programming-error class.
    #[error("structural error: {0}")]
    Structural(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A non-fatal finding: conflicting symbols, approximated conditions,
/// branch dead-ends. Parsing continues past these.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub loc: Option<Loc>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(loc: impl Into<Option<Loc>>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, loc: loc.into(), message: message.into() }
    }

    pub fn error(loc: impl Into<Option<Loc>>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, loc: loc.into(), message: message.into() }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {} at {}", self.severity, self.message, loc),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}
