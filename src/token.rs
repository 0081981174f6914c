//! Tokens and logical lines.
//!
//! A [`LogicalLine`] is the unit the parser driver consumes: one or more
//! physical lines spliced by `\` continuations, tokenized into [`Token`]s.
//! Tokens are immutable after creation and shared freely between branches.

use std::fmt;

/// Source position of a token: 1-based physical line and column.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Classification assigned by the tokenizer's pickers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TokenKind {
    Identifier,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,
    Operator,
    Punctuator,
    /// The `#name` head of a preprocessor directive line.
    Directive,
    LineComment,
    /// `complete` is false while the comment is still open at end of line.
    BlockComment { complete: bool },
}

impl TokenKind {
    pub fn is_comment(self) -> bool {
        matches!(self, TokenKind::LineComment | TokenKind::BlockComment { .. })
    }
}

/// `(kind, text, whitespace_after, source_location)`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub whitespace_after: String,
    pub loc: Loc,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, loc: Loc) -> Self {
        Self { kind, text: text.into(), whitespace_after: String::new(), loc }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Identifier
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// One or more `\`-spliced physical lines, tokenized.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    /// 1-based number of the first physical line.
    pub number: u32,
    /// Leading whitespace stripped from the first physical line.
    pub indent: String,
    /// Spliced source text (continuations removed), without the indent.
    pub text: String,
    pub tokens: Vec<Token>,
}

impl LogicalLine {
    /// True iff the line is a preprocessor directive.
    pub fn directive(&self) -> Option<&Token> {
        self.tokens.first().filter(|t| t.kind == TokenKind::Directive)
    }

    /// The tokens after the directive head.
    pub fn directive_body(&self) -> &[Token] {
        match self.directive() {
            Some(_) => &self.tokens[1..],
            None => &self.tokens,
        }
    }
}

impl fmt::Display for LogicalLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.indent, self.text)
    }
}
