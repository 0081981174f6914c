//! Translation units: tying the tokenizer, the branch tree, and the
//! symbol index together.
//!
//! An [`Analyzer`] carries the condition table and any assumptions; each
//! call to one of its `analyze_*` methods parses one translation unit
//! under every preprocessor configuration at once and returns the
//! condition-qualified result.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::rc::Rc;

use log::{info, warn};

use crate::cond::{Cond, Conditions};
use crate::diag::{AnalyzeError, Diagnostic, Severity};
use crate::expr::parse_condition_str;
use crate::lexer::Lexer;
use crate::parser::{Captured, Parser};
use crate::symbol::SymbolIndex;
use crate::track::Track;

/// Analysis entry point: owns the condition table and the assumptions
/// applied to every translation unit it parses.
pub struct Analyzer {
    conds: Rc<Conditions>,
    assume: Cond,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self { conds: Rc::new(Conditions::new()), assume: Cond::TOP }
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conds
    }

    /// Conjoins a condition-string assumption (the `--assume` option)
    /// onto the root branch of every subsequent parse.
    pub fn assume(&mut self, text: &str) -> Result<(), AnalyzeError> {
        let parsed = parse_condition_str(&self.conds, text)?;
        if let Some(raw) = parsed.approximated {
            warn!("assumption approximated by opaque atom: `{}'", raw);
        }
        self.assume = self.conds.conjunction(self.assume, parsed.cond);
        Ok(())
    }

    /// Shorthand for assuming `defined(NAME)`.
    pub fn assume_defined(&mut self, name: &str) {
        let defined = self.conds.defined(name);
        self.assume = self.conds.conjunction(self.assume, defined);
    }

    pub fn analyze_file(&self, path: &Path) -> Result<TranslationUnit, AnalyzeError> {
        info!("analyzing {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        self.analyze_lines(&path.display().to_string(), lines.iter().map(String::as_str))
    }

    pub fn analyze_source(
        &self,
        name: &str,
        source: &str,
    ) -> Result<TranslationUnit, AnalyzeError> {
        self.analyze_lines(name, source.lines())
    }

    fn analyze_lines<'a>(
        &self,
        name: &str,
        lines: impl Iterator<Item = &'a str>,
    ) -> Result<TranslationUnit, AnalyzeError> {
        let mut lexer = Lexer::new();
        let mut parser = Parser::new(self.conds.clone(), self.assume);
        let mut diagnostics = Vec::new();

        for line in lines {
            match lexer.feed(line) {
                Ok(Some(logical)) => parser.pursue_line(&logical)?,
                Ok(None) => {}
                Err(err @ AnalyzeError::Lexical { .. }) => {
                    // The affected line is abandoned; parsing continues.
                    let d = Diagnostic::error(None, err.to_string());
                    warn!("{}", d);
                    diagnostics.push(d);
                }
                Err(err) => return Err(err),
            }
        }
        match lexer.finish() {
            Ok(Some(logical)) => parser.pursue_line(&logical)?,
            Ok(None) => {}
            Err(err) => {
                let d = Diagnostic::error(None, err.to_string());
                warn!("{}", d);
                diagnostics.push(d);
            }
        }
        parser.finish()?;

        diagnostics.extend(parser.diagnostics);
        info!(
            "{}: {} symbols, {} diagnostics",
            name,
            parser.index.len(),
            diagnostics.len()
        );

        Ok(TranslationUnit {
            conds: self.conds.clone(),
            main_file: name.to_string(),
            includes: parser.includes,
            index: parser.index,
            diagnostics,
            literals: parser.literals,
            comments: parser.comments,
            track: parser.track,
        })
    }
}

/// The result of analyzing one top-level source file.
pub struct TranslationUnit {
    conds: Rc<Conditions>,
    pub main_file: String,
    /// Files named by `#include` directives, in order of appearance.
    pub includes: Vec<String>,
    pub index: SymbolIndex,
    pub diagnostics: Vec<Diagnostic>,
    pub literals: Vec<Captured>,
    pub comments: Vec<Captured>,
    pub track: Track,
}

impl TranslationUnit {
    pub fn conditions(&self) -> &Conditions {
        &self.conds
    }

    /// Renders a condition against this unit's atom table.
    pub fn display_cond(&self, cond: Cond) -> String {
        self.conds.display(cond)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}
