//! Translation of `#if`-style expressions into conditions.
//!
//! The analyzer does not evaluate preprocessor expressions — it has no
//! macro values to evaluate them against. It maps them into the
//! condition algebra instead: `defined(X)` becomes a defined-atom, a
//! bare identifier a value atom, `X == 3` a comparison atom, and the
//! boolean connectives `!`, `&&`, `||` become algebra operations. A
//! subexpression outside this grammar is interned whole as one opaque
//! value atom, which keeps the algebra sound (structural equality still
//! decides atom identity) at the cost of completeness.

use crate::cond::{Atom, Cond, Conditions};
use crate::diag::AnalyzeError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Result of translating a directive expression.
#[derive(Debug)]
pub struct ParsedCondition {
    pub cond: Cond,
    /// Set when the expression fell outside the supported grammar and
    /// was approximated by an opaque atom.
    pub approximated: Option<String>,
}

/// Translates the token sequence of a `#if`/`#elif` body.
pub fn parse_condition(conds: &Conditions, tokens: &[Token]) -> ParsedCondition {
    let tokens: Vec<&Token> = tokens.iter().filter(|t| !t.kind.is_comment()).collect();
    let mut cursor = Cursor { tokens: &tokens, pos: 0 };
    match cursor.parse_or(conds) {
        Some(cond) if cursor.at_end() => ParsedCondition { cond, approximated: None },
        _ => {
            let raw = render(&tokens);
            let cond = conds.atom(Atom::Value(raw.clone()));
            ParsedCondition { cond, approximated: Some(raw) }
        }
    }
}

/// Translates a condition string (the `--assume` option).
pub fn parse_condition_str(conds: &Conditions, text: &str) -> Result<ParsedCondition, AnalyzeError> {
    let mut lexer = Lexer::new();
    let line = match lexer.feed(text)? {
        Some(line) => line,
        None => lexer.finish()?.ok_or_else(|| {
            AnalyzeError::Structural(format!("empty condition `{}'", text))
        })?,
    };
    Ok(parse_condition(conds, &line.tokens))
}

fn render(tokens: &[&Token]) -> String {
    let mut out = String::new();
    for (i, t) in tokens.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&t.text);
    }
    out
}

struct Cursor<'a> {
    tokens: &'a [&'a Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos).copied();
        self.pos += 1;
        t
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.peek().is_some_and(|t| t.is(text)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self, conds: &Conditions) -> Option<Cond> {
        let mut acc = self.parse_and(conds)?;
        while self.eat("||") {
            let rhs = self.parse_and(conds)?;
            acc = conds.disjunction(acc, rhs);
        }
        Some(acc)
    }

    fn parse_and(&mut self, conds: &Conditions) -> Option<Cond> {
        let mut acc = self.parse_unary(conds)?;
        while self.eat("&&") {
            let rhs = self.parse_unary(conds)?;
            acc = conds.conjunction(acc, rhs);
        }
        Some(acc)
    }

    fn parse_unary(&mut self, conds: &Conditions) -> Option<Cond> {
        if self.eat("!") {
            return self.parse_unary(conds).map(|c| -c);
        }
        self.parse_primary(conds)
    }

    fn parse_primary(&mut self, conds: &Conditions) -> Option<Cond> {
        let token = self.peek()?.clone();
        match token.kind {
            TokenKind::Punctuator if token.is("(") => {
                self.bump();
                let inner = self.parse_or(conds)?;
                self.eat(")").then_some(inner)
            }
            TokenKind::Identifier if token.is("defined") => {
                self.bump();
                let name = if self.eat("(") {
                    let name = self.ident()?;
                    self.eat(")").then_some(name)?
                } else {
                    self.ident()?
                };
                Some(conds.defined(&name))
            }
            TokenKind::Identifier => {
                self.bump();
                // NAME == k / NAME != k, otherwise a bare value atom.
                if self.peek().is_some_and(|t| t.is("==") || t.is("!=")) {
                    let negated = self.bump().expect("peeked").is("!=");
                    let k = self.int()?;
                    let atom = conds.cmp(&token.text, k);
                    return Some(if negated { -atom } else { atom });
                }
                Some(conds.value(&token.text))
            }
            TokenKind::IntLiteral => {
                self.bump();
                let k = parse_int(&token.text)?;
                Some(if k != 0 { conds.top() } else { conds.bottom() })
            }
            _ => None,
        }
    }

    fn ident(&mut self) -> Option<String> {
        let t = self.peek()?;
        if t.is_identifier() {
            let name = t.text.clone();
            self.pos += 1;
            Some(name)
        } else {
            None
        }
    }

    fn int(&mut self) -> Option<i64> {
        let t = self.peek()?;
        if t.kind == TokenKind::IntLiteral {
            let value = parse_int(&t.text)?;
            self.pos += 1;
            Some(value)
        } else {
            None
        }
    }
}

/// Parses a C integer literal, tolerating `u`/`l` suffixes.
pub fn parse_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if trimmed.len() > 1 && trimmed.starts_with('0') {
        return i64::from_str_radix(&trimmed[1..], 8).ok();
    }
    trimmed.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(conds: &Conditions, text: &str) -> ParsedCondition {
        parse_condition_str(conds, text).unwrap()
    }

    #[test]
    fn test_defined_forms_are_one_atom() {
        let conds = Conditions::new();
        let paren = parse(&conds, "defined(FOO)");
        let bare = parse(&conds, "defined FOO");
        assert!(paren.approximated.is_none());
        assert_eq!(paren.cond, bare.cond);
        assert_eq!(conds.num_atoms(), 1);
    }

    #[test]
    fn test_value_atom_is_distinct_from_defined() {
        let conds = Conditions::new();
        let value = parse(&conds, "FOO");
        let defined = parse(&conds, "defined(FOO)");
        assert_ne!(value.cond, defined.cond);
    }

    #[test]
    fn test_connectives() {
        let conds = Conditions::new();
        let c = parse(&conds, "defined(A) && !defined(B) || C");
        assert!(c.approximated.is_none());

        let a = conds.defined("A");
        let b = conds.defined("B");
        let v = conds.value("C");
        let expected = conds.disjunction(conds.conjunction(a, -b), v);
        assert!(conds.equivalent(c.cond, expected));
    }

    #[test]
    fn test_comparison_atoms() {
        let conds = Conditions::new();
        let eq = parse(&conds, "VERSION == 3");
        let ne = parse(&conds, "VERSION != 3");
        assert!(eq.approximated.is_none());
        assert_eq!(eq.cond, -ne.cond);
        assert_ne!(eq.cond, parse(&conds, "VERSION == 4").cond);
    }

    #[test]
    fn test_integer_constants() {
        let conds = Conditions::new();
        assert!(conds.is_top(parse(&conds, "1").cond));
        assert!(conds.is_bottom(parse(&conds, "0").cond));
        assert!(conds.is_top(parse(&conds, "0x10").cond));
        assert!(conds.is_top(parse(&conds, "(1)").cond));
    }

    #[test]
    fn test_parenthesized_grouping() {
        let conds = Conditions::new();
        let c = parse(&conds, "!(defined(A) || defined(B))");
        let a = conds.defined("A");
        let b = conds.defined("B");
        assert!(conds.equivalent(c.cond, conds.conjunction(-a, -b)));
    }

    #[test]
    fn test_unsupported_expression_is_approximated() {
        let conds = Conditions::new();
        let c = parse(&conds, "FOO + BAR > 2");
        assert!(c.approximated.is_some());
        // The same text maps to the same opaque atom.
        let again = parse(&conds, "FOO + BAR > 2");
        assert_eq!(c.cond, again.cond);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("0x1f"), Some(31));
        assert_eq!(parse_int("010"), Some(8));
        assert_eq!(parse_int("1UL"), Some(1));
        assert_eq!(parse_int("abc"), None);
    }
}
