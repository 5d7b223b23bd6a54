//! Lexer for the tea language (§4.3).
//!
//! Struct fields, ASCII fast-path char access, and line/column tracking
//! follow a conventional hand-rolled `Lexer<'a>` shape. The token grammar
//! itself — keyword table, unconditional `-digit` numeric-literal
//! attachment, hex integers, mandatory-dot floats, octal/hex string
//! escapes — matches the source language's reference lexer exactly, since
//! diagnostics and literal parsing need to be byte-identical to it.
//!
//! Every identifier here is ASCII (`isalpha`/`isalnum` in the reference
//! lexer); there is no Unicode identifier support to preserve.

use crate::token::{Keyword, Token, TokenKind, TokenUtils};
use tea_common::{panic as tea_panic, Position, Span};

pub struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    current: Position,
    file_id: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, file_id: u32) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            current: Position::start(),
            file_id,
        }
    }

    /// Tokenize the entire input, ending with `EndOfFile`.
    ///
    /// Lexical errors are fatal (§7): malformed input calls
    /// the panic sink and never returns a token for it.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.value == TokenKind::EndOfFile;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start = self.current;
        if self.is_at_end() {
            return TokenUtils::new(TokenKind::EndOfFile, Span::single(start, self.file_id));
        }

        let c = self.current_char();
        let kind = if c.is_ascii_alphabetic() || c == '_' {
            self.scan_identifier_or_keyword()
        } else if c.is_ascii_digit() || (c == '-' && self.peek_char().is_some_and(|n| n.is_ascii_digit())) {
            self.scan_number()
        } else {
            match c {
                '(' => { self.advance(); TokenKind::LParen }
                ')' => { self.advance(); TokenKind::RParen }
                '[' => { self.advance(); TokenKind::LBrack }
                ']' => { self.advance(); TokenKind::RBrack }
                ';' => { self.advance(); TokenKind::Semicolon }
                ',' => { self.advance(); TokenKind::Comma }
                '~' => { self.advance(); TokenKind::Tilde }
                '^' => { self.advance(); TokenKind::Caret }
                '@' => { self.advance(); TokenKind::At }
                '&' => self.scan_two('&', TokenKind::AmpAmp, TokenKind::Amp),
                '|' => self.scan_two('|', TokenKind::PipePipe, TokenKind::Pipe),
                '=' => self.scan_two('=', TokenKind::EqEq, TokenKind::Assign),
                '!' => self.scan_two('=', TokenKind::BangEq, TokenKind::Bang),
                '<' => self.scan_lt(),
                '>' => self.scan_gt(),
                ':' => self.scan_two(':', TokenKind::ColonColon, TokenKind::Colon),
                '.' => {
                    self.advance();
                    if !self.is_at_end() && self.current_char() == '.' && self.peek_char() == Some('.') {
                        self.advance();
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Dot
                    }
                }
                '+' => { self.advance(); TokenKind::Plus }
                '*' => { self.advance(); TokenKind::Star }
                '-' => self.scan_minus(),
                '/' => self.scan_slash(),
                '"' => self.scan_string(),
                '\'' => self.scan_char(),
                other => tea_panic::panic(format!(
                    "unexpected character '{other}'. line {}, column {}",
                    start.line, start.column
                )),
            }
        };

        let span = Span::new(start, self.current, self.file_id);
        TokenUtils::new(kind, span)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            if self.is_at_end() {
                return;
            }
            match self.current_char() {
                '\n' => self.advance_line(),
                c if c.is_ascii_whitespace() => self.advance(),
                '/' if self.peek_char() == Some('/') => {
                    match memchr::memchr(b'\n', &self.bytes[self.pos..]) {
                        Some(offset) => {
                            for _ in 0..offset {
                                self.advance();
                            }
                        }
                        None => {
                            while !self.is_at_end() {
                                self.advance();
                            }
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn scan_identifier_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while !self.is_at_end() && (self.current_char().is_ascii_alphanumeric() || self.current_char() == '_') {
            self.advance();
        }
        let text = &self.input[start..self.pos];
        match Keyword::from_text(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Identifier(text.to_string()),
        }
    }

    /// Numeric literal scanning (§4.3): a leading `-` attaches
    /// unconditionally whenever it's immediately followed by a digit,
    /// decimal integers, `0x`/`0X` hex integers (no octal-via-leading-zero),
    /// and floats with a mandatory `.digit` and optional trailing `f`/`F`.
    fn scan_number(&mut self) -> TokenKind {
        let start = self.pos;
        let start_pos = self.current;
        if self.current_char() == '-' {
            self.advance();
        }

        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            self.advance();
        }

        if self.bytes[start] == b'0'
            && self.pos == start + 1
            && !self.is_at_end()
            && matches!(self.current_char(), 'x' | 'X')
        {
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_hexdigit() {
                self.advance();
            }
            let text = &self.input[start..self.pos];
            let digits = &text[text.find(['x', 'X']).unwrap() + 1..];
            let magnitude = i64::from_str_radix(digits, 16).unwrap_or_else(|_| {
                tea_panic::panic(format!(
                    "invalid hex literal '{text}'. line {}, column {}",
                    start_pos.line, start_pos.column
                ))
            });
            return TokenKind::Int(magnitude);
        }

        let mut has_dot = false;
        if !self.is_at_end() && self.current_char() == '.' && self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            has_dot = true;
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_digit() {
                self.advance();
            }
        }

        let mut is_float = false;
        if has_dot && !self.is_at_end() && matches!(self.current_char(), 'f' | 'F') {
            is_float = true;
            self.advance();
        }

        let digits_end = if is_float { self.pos - 1 } else { self.pos };
        let text = &self.input[start..digits_end];

        if has_dot {
            if is_float {
                TokenKind::Float(text.to_string())
            } else {
                TokenKind::Double(text.to_string())
            }
        } else {
            let value = text.parse::<i64>().unwrap_or_else(|_| {
                tea_panic::panic(format!(
                    "invalid integer literal '{text}'. line {}, column {}",
                    start_pos.line, start_pos.column
                ))
            });
            TokenKind::Int(value)
        }
    }

    fn scan_string(&mut self) -> TokenKind {
        let start_pos = self.current;
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() {
                tea_panic::panic(format!(
                    "unterminated string. line {}, column {}",
                    start_pos.line, start_pos.column
                ));
            }
            let c = self.current_char();
            if c == '"' {
                break;
            }
            if c == '\\' {
                value.push(self.unescape(start_pos) as char);
                continue;
            }
            if c == '\n' {
                self.advance_line();
            } else {
                self.advance();
            }
            value.push(c);
        }
        self.advance();
        TokenKind::StringLit(value)
    }

    fn scan_char(&mut self) -> TokenKind {
        let start_pos = self.current;
        self.advance();
        if self.is_at_end() {
            tea_panic::panic(format!(
                "unterminated char. line {}, column {}",
                start_pos.line, start_pos.column
            ));
        }
        let value = if self.current_char() == '\\' {
            self.unescape(start_pos)
        } else {
            let c = self.current_char();
            self.advance();
            c as u8
        };
        if self.is_at_end() || self.current_char() != '\'' {
            tea_panic::panic(format!(
                "bad char literal. line {}, column {}",
                start_pos.line, start_pos.column
            ));
        }
        self.advance();
        TokenKind::CharLit(value)
    }

    /// C-style escape: single-char escapes, `\NNN` octal (up to 3 digits),
    /// `\xHH…` hex. Called with the cursor on the backslash.
    fn unescape(&mut self, start_pos: Position) -> u8 {
        self.advance(); // consume '\\'
        if self.is_at_end() {
            tea_panic::panic(format!(
                "unterminated escape. line {}, column {}",
                start_pos.line, start_pos.column
            ));
        }
        let c = self.current_char();
        match c {
            'n' => { self.advance(); b'\n' }
            'r' => { self.advance(); b'\r' }
            't' => { self.advance(); b'\t' }
            'v' => { self.advance(); 0x0b }
            'f' => { self.advance(); 0x0c }
            'b' => { self.advance(); 0x08 }
            'a' => { self.advance(); 0x07 }
            '\\' => { self.advance(); b'\\' }
            '\'' => { self.advance(); b'\'' }
            '"' => { self.advance(); b'"' }
            '0'..='7' => {
                let mut value: u32 = 0;
                let mut count = 0;
                while count < 3 && !self.is_at_end() && matches!(self.current_char(), '0'..='7') {
                    value = (value << 3) | (self.current_char() as u32 - '0' as u32);
                    self.advance();
                    count += 1;
                }
                value as u8
            }
            'x' => {
                self.advance();
                let mut value: u32 = 0;
                if self.is_at_end() || !self.current_char().is_ascii_hexdigit() {
                    tea_panic::panic(format!(
                        "bad hex escape. line {}, column {}",
                        start_pos.line, start_pos.column
                    ));
                }
                while !self.is_at_end() && self.current_char().is_ascii_hexdigit() {
                    value = (value << 4) | self.current_char().to_digit(16).unwrap();
                    self.advance();
                }
                value as u8
            }
            other => {
                self.advance();
                other as u8
            }
        }
    }

    fn scan_two(&mut self, second: char, two: TokenKind, one: TokenKind) -> TokenKind {
        self.advance();
        if !self.is_at_end() && self.current_char() == second {
            self.advance();
            two
        } else {
            one
        }
    }

    fn scan_lt(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('=') => { self.advance(); TokenKind::LtEq }
            Some('<') => { self.advance(); TokenKind::LtLt }
            _ => TokenKind::Lt,
        }
    }

    fn scan_gt(&mut self) -> TokenKind {
        self.advance();
        match self.current_char_opt() {
            Some('=') => { self.advance(); TokenKind::GtEq }
            Some('>') => { self.advance(); TokenKind::GtGt }
            _ => TokenKind::Gt,
        }
    }

    fn scan_minus(&mut self) -> TokenKind {
        self.advance();
        if !self.is_at_end() && self.current_char() == '>' {
            self.advance();
            TokenKind::Arrow
        } else {
            TokenKind::Minus
        }
    }

    fn scan_slash(&mut self) -> TokenKind {
        // `//` comments are stripped in `skip_whitespace_and_comments`; a
        // bare `/` reaching here is always division.
        self.advance();
        TokenKind::Slash
    }

    fn current_char_opt(&self) -> Option<char> {
        if self.is_at_end() {
            None
        } else {
            Some(self.current_char())
        }
    }

    fn current_char(&self) -> char {
        self.bytes[self.pos] as char
    }

    fn peek_char(&self) -> Option<char> {
        self.bytes.get(self.pos + 1).map(|&b| b as char)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
            self.current.column += 1;
            self.current.offset = self.pos as u32;
        }
    }

    fn advance_line(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
            self.current.line += 1;
            self.current.column = 1;
            self.current.offset = self.pos as u32;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, 0).tokenize().into_iter().map(|t| t.value).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("public func end"),
            vec![
                TokenKind::Keyword(Keyword::Public),
                TokenKind::Keyword(Keyword::Func),
                TokenKind::Keyword(Keyword::End),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn for_break_continue_are_plain_identifiers() {
        assert_eq!(
            kinds("for"),
            vec![TokenKind::Identifier("for".to_string()), TokenKind::EndOfFile]
        );
        assert_eq!(
            kinds("break"),
            vec![TokenKind::Identifier("break".to_string()), TokenKind::EndOfFile]
        );
    }

    #[test]
    fn negative_digit_attaches_unconditionally() {
        assert_eq!(
            kinds("a-1"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Int(-1),
                TokenKind::EndOfFile,
            ]
        );
        assert_eq!(
            kinds("a - 1"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Minus,
                TokenKind::Int(1),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn hex_integer_literal() {
        assert_eq!(kinds("0xFF"), vec![TokenKind::Int(255), TokenKind::EndOfFile]);
    }

    #[test]
    fn float_and_double_literals() {
        assert_eq!(
            kinds("1.5f 1.5"),
            vec![
                TokenKind::Float("1.5".to_string()),
                TokenKind::Double("1.5".to_string()),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\x41\101""#),
            vec![TokenKind::StringLit("a\nbAA".to_string()), TokenKind::EndOfFile]
        );
    }

    #[test]
    fn line_comment_is_skipped() {
        assert_eq!(
            kinds("var x // trailing comment\n"),
            vec![
                TokenKind::Keyword(Keyword::Var),
                TokenKind::Identifier("x".to_string()),
                TokenKind::EndOfFile,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "unterminated string")]
    fn unterminated_string_panics() {
        kinds("\"abc");
    }
}
