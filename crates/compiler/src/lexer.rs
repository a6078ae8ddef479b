//! Two-stage tokenizer (spec §4.1).
//!
//! Stage one walks the raw source and splits it into alternating literal
//! ("inline HTML") and code chunks on the `<?ql` / `?>` delimiter pair.
//! Stage two tokenizes each code chunk. The tokenizer is reentrant: all
//! state lives in the `Lexer` value, nothing global.

use crate::diagnostics::DiagnosticSink;
use crate::token::{Keyword, Token, TokenKind};
use quill_core::ErrorKind;
use std::rc::Rc;

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    in_code: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        // A script with no opening tag at all is treated as starting in code
        // mode, the convenience every embedding host wants for a
        // `quillc run` script that is pure logic with no template chunks.
        let in_code = !src.contains("<?ql");
        Lexer { src: src.as_bytes(), pos: 0, line: 1, in_code }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn starts_with(&self, needle: &str) -> bool {
        self.src[self.pos..].starts_with(needle.as_bytes())
    }

    /// Tokenize the whole input, interleaving `InlineHtml` tokens for
    /// literal chunks with the tokens of each enclosed code chunk.
    pub fn tokenize(mut self, diagnostics: &mut DiagnosticSink) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            if !self.in_code {
                let start = self.pos;
                let start_line = self.line;
                while self.pos < self.src.len() && !self.starts_with("<?ql") {
                    self.bump();
                }
                if self.pos > start {
                    let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                    tokens.push(Token::new(TokenKind::InlineHtml(Rc::from(text.as_str())), start_line));
                }
                if self.pos >= self.src.len() {
                    break;
                }
                self.pos += "<?ql".len();
                self.in_code = true;
                continue;
            }

            self.skip_trivia(&mut tokens, diagnostics);
            if self.pos >= self.src.len() {
                break;
            }
            if self.starts_with("?>") {
                self.pos += 2;
                // a newline right after the closing tag is swallowed, PHP-style
                if self.peek() == Some(b'\n') {
                    self.bump();
                }
                self.in_code = false;
                continue;
            }
            let tok = self.next_code_token(diagnostics);
            tokens.push(tok);
        }
        tokens.push(Token::new(TokenKind::Eof, self.line));
        tokens
    }

    fn skip_trivia(&mut self, _tokens: &mut [Token], diagnostics: &mut DiagnosticSink) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'#') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') && !self.starts_with("?>") {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') && !self.starts_with("?>") {
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let line = self.line;
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while self.pos < self.src.len() {
                        if self.starts_with("*/") {
                            self.pos += 2;
                            closed = true;
                            break;
                        }
                        self.bump();
                    }
                    if !closed {
                        diagnostics.emit(ErrorKind::Parse, line, "unterminated block comment");
                    }
                }
                _ => break,
            }
        }
    }

    fn next_code_token(&mut self, diagnostics: &mut DiagnosticSink) -> Token {
        let line = self.line;
        let b = self.peek().unwrap();

        if b == b'$' {
            self.bump();
            let name = self.read_identifier_bytes();
            if name.is_empty() {
                diagnostics.emit(ErrorKind::Parse, line, "expected a variable name after '$'");
                return Token::new(TokenKind::Variable(Rc::from("")), line);
            }
            return Token::new(TokenKind::Variable(Rc::from(name.as_str())), line);
        }

        if b.is_ascii_digit() || (b == b'.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
            return self.read_number(line);
        }

        if is_ident_start(b) {
            let ident = self.read_identifier_bytes();
            if let Some(kw) = Keyword::lookup(&ident) {
                return Token::new(TokenKind::Keyword(kw), line);
            }
            return Token::new(TokenKind::Ident(Rc::from(ident.as_str())), line);
        }

        if b == b'"' {
            return self.read_quoted(line, b'"', true);
        }
        if b == b'\'' {
            return self.read_quoted(line, b'\'', false);
        }
        if b == b'`' {
            self.bump();
            while self.peek().is_some() && self.peek() != Some(b'`') {
                self.bump();
            }
            self.bump();
            diagnostics.emit(ErrorKind::Notice, line, "shell-execution backtick strings are disabled; evaluates to null");
            return Token::new(TokenKind::Backtick, line);
        }

        self.read_operator(line, diagnostics)
    }

    fn read_identifier_bytes(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn read_number(&mut self, line: u32) -> Token {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.bump();
            self.bump();
            let digit_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap_or("0");
            let n = i64::from_str_radix(text, 16).unwrap_or(0);
            return Token::new(TokenKind::Int(n), line);
        }
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b') | Some(b'B')) {
            self.bump();
            self.bump();
            let digit_start = self.pos;
            while matches!(self.peek(), Some(b'0') | Some(b'1')) {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap_or("0");
            let n = i64::from_str_radix(text, 2).unwrap_or(0);
            return Token::new(TokenKind::Int(n), line);
        }
        if self.peek() == Some(b'0') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            let digit_start = self.pos;
            while self.peek().is_some_and(|c| (b'0'..=b'7').contains(&c)) {
                self.bump();
            }
            let text = std::str::from_utf8(&self.src[digit_start..self.pos]).unwrap_or("0");
            let n = i64::from_str_radix(text, 8).unwrap_or(0);
            return Token::new(TokenKind::Int(n), line);
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_real = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit() || c == b'e' || c == b'E') {
            is_real = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.bump();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                self.pos = save;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0");
        if is_real {
            Token::new(TokenKind::Real(text.parse().unwrap_or(0.0)), line)
        } else {
            Token::new(TokenKind::Int(text.parse().unwrap_or(0)), line)
        }
    }

    /// Double-quoted strings keep their escapes un-interpreted beyond the
    /// handful the parser needs to find the closing quote (spec §4.1:
    /// "contents are not interpreted here"); `interpolate` distinguishes the
    /// `Str` token (still containing literal `$name` markers for the parser
    /// to split) from `RawStr` (single-quoted, no interpolation at all).
    fn read_quoted(&mut self, line: u32, quote: u8, interpolate: bool) -> Token {
        self.bump();
        let mut out = String::new();
        loop {
            match self.peek() {
                None => break,
                Some(c) if c == quote => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    match self.bump() {
                        Some(b'n') if interpolate => out.push('\n'),
                        Some(b't') if interpolate => out.push('\t'),
                        Some(b'r') if interpolate => out.push('\r'),
                        Some(b'$') if interpolate => out.push('$'),
                        Some(b'"') if interpolate => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(c) if !interpolate && (c == quote) => out.push(c as char),
                        Some(c) => {
                            out.push('\\');
                            out.push(c as char);
                        }
                        None => {}
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    self.bump();
                    out.push_str(&String::from_utf8_lossy(&self.src[start..self.pos]));
                }
            }
        }
        if interpolate {
            Token::new(TokenKind::Str(Rc::from(out.as_str())), line)
        } else {
            Token::new(TokenKind::RawStr(Rc::from(out.as_str())), line)
        }
    }

    fn read_operator(&mut self, line: u32, diagnostics: &mut DiagnosticSink) -> Token {
        macro_rules! two {
            ($a:expr, $b:expr, $kind:expr, $fallback:expr) => {{
                self.bump();
                if self.peek() == Some($b) {
                    self.bump();
                    $kind
                } else {
                    $fallback
                }
            }};
        }
        let b = self.bump().unwrap();
        let kind = match b {
            b'+' => {
                if self.peek() == Some(b'+') {
                    self.bump();
                    TokenKind::Incr
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            b'-' => {
                if self.peek() == Some(b'-') {
                    self.bump();
                    TokenKind::Decr
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::MinusEq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            b'/' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            b'%' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            b'.' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::DotEq
                } else {
                    TokenKind::Dot
                }
            }
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.bump();
                    TokenKind::AndAnd
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::AmpEq
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.bump();
                    TokenKind::OrOr
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::PipeEq
                } else {
                    TokenKind::Pipe
                }
            }
            b'^' => two!('^', b'=', TokenKind::CaretEq, TokenKind::Caret),
            b'~' => TokenKind::Tilde,
            b'!' => {
                if self.starts_with("==") {
                    self.pos += 2;
                    TokenKind::NotIdentical
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                if self.starts_with("==") {
                    self.pos += 2;
                    TokenKind::Identical
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::Eq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::DoubleArrow
                } else {
                    TokenKind::Assign
                }
            }
            b'<' => {
                if self.starts_with("<=") {
                    self.pos += 2;
                    TokenKind::ShlEq
                } else if self.peek() == Some(b'<') {
                    self.bump();
                    TokenKind::Shl
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.starts_with(">=") {
                    self.pos += 2;
                    TokenKind::ShrEq
                } else if self.peek() == Some(b'>') {
                    self.bump();
                    TokenKind::Shr
                } else if self.peek() == Some(b'=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'?' => {
                if self.peek() == Some(b'?') {
                    self.bump();
                    TokenKind::QuestionQuestion
                } else {
                    TokenKind::Question
                }
            }
            b':' => {
                if self.peek() == Some(b':') {
                    self.bump();
                    TokenKind::DoubleColon
                } else {
                    TokenKind::Colon
                }
            }
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'@' => TokenKind::At,
            b'\\' => TokenKind::Backslash,
            other => {
                diagnostics.emit(ErrorKind::Parse, line, format!("unexpected byte 0x{other:02x}"));
                TokenKind::Semicolon
            }
        };
        Token::new(kind, line)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<TokenKind> {
        let mut diags = DiagnosticSink::new(15);
        Lexer::new(src).tokenize(&mut diags).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn bare_code_needs_no_open_tag() {
        let kinds = toks("$x = 1 + 2;");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Variable(Rc::from("x")),
                TokenKind::Assign,
                TokenKind::Int(1),
                TokenKind::Plus,
                TokenKind::Int(2),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn inline_html_surrounds_code_blocks() {
        let kinds = toks("hello <?ql echo 1; ?> world");
        assert_eq!(kinds[0], TokenKind::InlineHtml(Rc::from("hello ")));
        assert!(matches!(kinds.last().unwrap(), TokenKind::Eof));
        assert!(kinds.iter().any(|k| *k == TokenKind::InlineHtml(Rc::from(" world"))));
    }

    #[test]
    fn hex_octal_binary_integer_forms() {
        assert_eq!(toks("0xFF;")[0], TokenKind::Int(255));
        assert_eq!(toks("0b101;")[0], TokenKind::Int(5));
        assert_eq!(toks("017;")[0], TokenKind::Int(15));
    }

    #[test]
    fn backtick_strings_emit_a_notice_and_tokenize_as_backtick() {
        let mut diags = DiagnosticSink::new(15);
        let kinds: Vec<_> = Lexer::new("`ls -la`;").tokenize(&mut diags).into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds[0], TokenKind::Backtick);
        assert_eq!(diags.diagnostics().len(), 1);
        assert_eq!(diags.diagnostics()[0].kind, ErrorKind::Notice);
    }
}
