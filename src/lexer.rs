//! The tokenizer: physical lines in, logical lines out.
//!
//! Responsibilities per line: splice `\` continuations, carry an open
//! block comment across lines, strip and record indentation, then run the
//! ordered token pickers over the unconsumed rest. Picking order encodes
//! precedence: directive head, string/char literal, numeric literal,
//! identifier, comments, multi-character operator, single-character
//! operator or punctuator.

use log::debug;

use crate::diag::AnalyzeError;
use crate::token::{Loc, LogicalLine, Token, TokenKind};

const MULTI_CHAR_OPERATORS: &[&str] = &[
    "<<=", ">>=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "##",
];

const SINGLE_CHAR_OPERATORS: &str = "+-*/%<>=!&|^~?";
const PUNCTUATORS: &str = "()[]{},;:.#";

/// Across-lines tokenizer state.
pub struct Lexer {
    line_no: u32,
    /// Text spliced from `\`-terminated lines, with its start line number.
    splice: Option<(u32, String)>,
    /// Open multi-line block comment: start location and accumulated text.
    comment: Option<(Loc, String)>,
    /// A block comment closed on this line, waiting to lead the next
    /// logical line (held while a splice is still open).
    lead: Option<Token>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Self { line_no: 0, splice: None, comment: None, lead: None }
    }

    /// Feeds one physical line (without its trailing newline). Returns a
    /// completed [`LogicalLine`], or `None` while a splice or block
    /// comment is still open.
    pub fn feed(&mut self, physical: &str) -> Result<Option<LogicalLine>, AnalyzeError> {
        self.line_no += 1;
        let mut rest = physical;

        // Consume an open block comment first.
        if let Some((loc, mut text)) = self.comment.take() {
            match rest.find("*/") {
                None => {
                    text.push('\n');
                    text.push_str(rest);
                    self.comment = Some((loc, text));
                    return Ok(None);
                }
                Some(i) => {
                    text.push('\n');
                    text.push_str(&rest[..i + 2]);
                    let mut token = Token::new(TokenKind::BlockComment { complete: true }, text, loc);
                    token.whitespace_after = " ".to_string();
                    self.lead = Some(token);
                    rest = &rest[i + 2..];
                }
            }
        }

        // Splice continuation lines.
        if let Some(stripped) = rest.strip_suffix('\\') {
            let (start, mut text) = self
                .splice
                .take()
                .unwrap_or_else(|| (self.line_no, String::new()));
            text.push_str(stripped);
            self.splice = Some((start, text));
            return Ok(None);
        }

        let (start, mut text) = self
            .splice
            .take()
            .unwrap_or_else(|| (self.line_no, String::new()));
        text.push_str(rest);

        self.assemble(start, text).map(Some)
    }

    /// Flushes state at end of input: an unterminated splice is assembled
    /// as-is, an open block comment becomes an incomplete token.
    pub fn finish(&mut self) -> Result<Option<LogicalLine>, AnalyzeError> {
        if let Some((start, text)) = self.splice.take() {
            return self.assemble(start, text).map(Some);
        }
        if let Some((loc, text)) = self.comment.take() {
            let token = Token::new(TokenKind::BlockComment { complete: false }, text, loc);
            return Ok(Some(LogicalLine {
                number: loc.line,
                indent: String::new(),
                text: String::new(),
                tokens: vec![token],
            }));
        }
        if let Some(token) = self.lead.take() {
            return Ok(Some(LogicalLine {
                number: token.loc.line,
                indent: String::new(),
                text: String::new(),
                tokens: vec![token],
            }));
        }
        Ok(None)
    }

    fn assemble(&mut self, start: u32, text: String) -> Result<LogicalLine, AnalyzeError> {
        let indent: String = text.chars().take_while(|c| c.is_whitespace()).collect();
        let body = text[indent.len()..].to_string();

        let mut tokens = match self.lead.take() {
            Some(token) => vec![token],
            None => Vec::new(),
        };
        self.pick_tokens(&body, start, &mut tokens)?;

        debug!("line {}: {} tokens", start, tokens.len());
        Ok(LogicalLine { number: start, indent, text: body, tokens })
    }

    /// Runs the pickers over `body` until it is exhausted or a block
    /// comment stays open. `out` may already hold tokens carried onto
    /// this logical line (a closing multi-line comment).
    fn pick_tokens(
        &mut self,
        body: &str,
        line: u32,
        out: &mut Vec<Token>,
    ) -> Result<(), AnalyzeError> {
        let chars: Vec<char> = body.chars().collect();
        let mut pos = 0usize;

        while pos < chars.len() {
            // Whitespace attaches to the previous token.
            if chars[pos].is_whitespace() {
                let ws_start = pos;
                while pos < chars.len() && chars[pos].is_whitespace() {
                    pos += 1;
                }
                if let Some(last) = out.last_mut() {
                    last.whitespace_after = chars[ws_start..pos].iter().collect();
                }
                continue;
            }

            let loc = Loc::new(line, pos as u32 + 1);
            let c = chars[pos];

            // Preprocessor directive head: `#` first on the line
            // (comments may precede it).
            if c == '#' && out.iter().all(|t| t.kind.is_comment()) {
                let mut end = pos + 1;
                while end < chars.len() && chars[end].is_whitespace() {
                    end += 1;
                }
                let name_start = end;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[name_start..end].iter().collect();
                out.push(Token::new(TokenKind::Directive, format!("#{}", name), loc));
                pos = end;
                continue;
            }

            // String and char literals.
            if c == '"' || c == '\'' {
                let kind = if c == '"' { TokenKind::StringLiteral } else { TokenKind::CharLiteral };
                let mut end = pos + 1;
                let mut closed = false;
                while end < chars.len() {
                    if chars[end] == '\\' && end + 1 < chars.len() {
                        end += 2;
                        continue;
                    }
                    if chars[end] == c {
                        end += 1;
                        closed = true;
                        break;
                    }
                    end += 1;
                }
                if !closed {
                    return Err(AnalyzeError::Lexical {
                        loc,
                        found: chars[pos..].iter().collect(),
                    });
                }
                out.push(Token::new(kind, chars[pos..end].iter().collect::<String>(), loc));
                pos = end;
                continue;
            }

            // Numeric literal (pp-number shape).
            if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(|d| d.is_ascii_digit())) {
                let mut end = pos;
                while end < chars.len() {
                    let d = chars[end];
                    if d.is_ascii_alphanumeric() || d == '.' || d == '_' {
                        end += 1;
                    } else if (d == '+' || d == '-')
                        && end > pos
                        && matches!(chars[end - 1], 'e' | 'E' | 'p' | 'P')
                    {
                        end += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[pos..end].iter().collect();
                let hex = text.starts_with("0x") || text.starts_with("0X");
                let float = text.contains('.')
                    || (!hex && (text.contains('e') || text.contains('E')))
                    || (hex && (text.contains('p') || text.contains('P')));
                let kind = if float { TokenKind::FloatLiteral } else { TokenKind::IntLiteral };
                out.push(Token::new(kind, text, loc));
                pos = end;
                continue;
            }

            // Identifier or keyword.
            if c.is_alphabetic() || c == '_' {
                let mut end = pos;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                out.push(Token::new(
                    TokenKind::Identifier,
                    chars[pos..end].iter().collect::<String>(),
                    loc,
                ));
                pos = end;
                continue;
            }

            // Comments bind tighter than operators.
            if c == '/' && chars.get(pos + 1) == Some(&'/') {
                out.push(Token::new(
                    TokenKind::LineComment,
                    chars[pos..].iter().collect::<String>(),
                    loc,
                ));
                pos = chars.len();
                continue;
            }
            if c == '/' && chars.get(pos + 1) == Some(&'*') {
                let rest: String = chars[pos..].iter().collect();
                match rest.find("*/") {
                    Some(i) => {
                        let text: String = rest[..i + 2].to_string();
                        let len = text.chars().count();
                        out.push(Token::new(TokenKind::BlockComment { complete: true }, text, loc));
                        pos += len;
                        continue;
                    }
                    None => {
                        // Stays open across lines; the token is emitted
                        // where the comment closes.
                        self.comment = Some((loc, rest));
                        return Ok(());
                    }
                }
            }

            // Multi-character operators, longest first.
            let rest: String = chars[pos..].iter().collect();
            if let Some(op) = MULTI_CHAR_OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                out.push(Token::new(TokenKind::Operator, *op, loc));
                pos += op.chars().count();
                continue;
            }

            // Single-character operator or punctuator.
            if SINGLE_CHAR_OPERATORS.contains(c) {
                out.push(Token::new(TokenKind::Operator, c, loc));
                pos += 1;
                continue;
            }
            if PUNCTUATORS.contains(c) {
                out.push(Token::new(TokenKind::Punctuator, c, loc));
                pos += 1;
                continue;
            }

            return Err(AnalyzeError::Lexical { loc, found: c.to_string() });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(lines: &[&str]) -> Vec<LogicalLine> {
        let mut lexer = Lexer::new();
        let mut out = Vec::new();
        for line in lines {
            if let Some(ll) = lexer.feed(line).unwrap() {
                out.push(ll);
            }
        }
        if let Some(ll) = lexer.finish().unwrap() {
            out.push(ll);
        }
        out
    }

    fn texts(line: &LogicalLine) -> Vec<&str> {
        line.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_simple_declaration() {
        let lines = lex_all(&["int x = 42;"]);
        assert_eq!(lines.len(), 1);
        assert_eq!(texts(&lines[0]), vec!["int", "x", "=", "42", ";"]);
        assert_eq!(lines[0].tokens[0].kind, TokenKind::Identifier);
        assert_eq!(lines[0].tokens[3].kind, TokenKind::IntLiteral);
    }

    #[test]
    fn test_directive_head() {
        let lines = lex_all(&["  #  ifdef FOO"]);
        assert_eq!(texts(&lines[0]), vec!["#ifdef", "FOO"]);
        assert_eq!(lines[0].tokens[0].kind, TokenKind::Directive);
        assert_eq!(lines[0].indent, "  ");
    }

    #[test]
    fn test_stringize_hash_is_not_directive() {
        let lines = lex_all(&["a # b"]);
        assert_eq!(texts(&lines[0]), vec!["a", "#", "b"]);
        assert_eq!(lines[0].tokens[1].kind, TokenKind::Punctuator);
    }

    #[test]
    fn test_line_splicing() {
        let lines = lex_all(&["#define FOO \\", "  1 + \\", "  2"]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].number, 1);
        assert_eq!(texts(&lines[0]), vec!["#define", "FOO", "1", "+", "2"]);
    }

    #[test]
    fn test_multiline_block_comment_single_token() {
        // The line that opens the comment yields an (empty) logical line;
        // the single comment token spans all three lines and lands where
        // the comment closes.
        let lines = lex_all(&["/* one", "two", "three */ int x;"]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].tokens.is_empty());
        let tokens = texts(&lines[1]);
        assert_eq!(tokens, vec!["/* one\ntwo\nthree */", "int", "x", ";"]);
        assert_eq!(lines[1].tokens[0].kind, TokenKind::BlockComment { complete: true });
        assert_eq!(lines[1].tokens[0].loc, Loc::new(1, 1));
    }

    #[test]
    fn test_unterminated_block_comment_at_eof() {
        let lines = lex_all(&["int x;", "/* still open", "more"]);
        assert_eq!(lines.len(), 3);
        let last = lines.last().unwrap();
        assert_eq!(last.tokens.len(), 1);
        assert_eq!(last.tokens[0].kind, TokenKind::BlockComment { complete: false });
        assert_eq!(last.tokens[0].text, "/* still open\nmore");
    }

    #[test]
    fn test_operators_longest_match() {
        let lines = lex_all(&["a <<= b >> c != d;"]);
        assert_eq!(texts(&lines[0]), vec!["a", "<<=", "b", ">>", "c", "!=", "d", ";"]);
    }

    #[test]
    fn test_string_with_escapes() {
        let lines = lex_all(&[r#"char *s = "a \"quote\" b";"#]);
        assert_eq!(
            texts(&lines[0]),
            vec!["char", "*", "s", "=", r#""a \"quote\" b""#, ";"]
        );
        assert_eq!(lines[0].tokens[4].kind, TokenKind::StringLiteral);
    }

    #[test]
    fn test_float_classification() {
        let lines = lex_all(&["1.5 2e10 0x1p3 42 0xff"]);
        let kinds: Vec<TokenKind> = lines[0].tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::IntLiteral,
                TokenKind::IntLiteral,
            ]
        );
    }

    #[test]
    fn test_unknown_token() {
        let mut lexer = Lexer::new();
        let err = lexer.feed("int x @ y;").unwrap_err();
        match err {
            AnalyzeError::Lexical { loc, found } => {
                assert_eq!(found, "@");
                assert_eq!(loc.line, 1);
            }
            other => panic!("expected lexical error, got {:?}", other),
        }
    }
}
