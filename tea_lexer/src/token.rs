//! Token definitions for the tea language.

use tea_common::{Span, Spanned};
use std::fmt;

/// Token categories (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(String),  // kept as text; f64 has no Eq/Hash
    Double(String),
    StringLit(String),
    CharLit(u8),
    Identifier(String),
    Keyword(Keyword),

    // Punctuation
    LParen,
    RParen,
    LBrack,
    RBrack,
    Semicolon,
    Comma,
    Colon,
    Dot,

    // Symbols
    ColonColon,
    At,
    Assign,
    Star,
    Arrow,
    Tilde,
    Amp,

    // Arithmetic
    Minus,
    Plus,
    Slash,

    // Logical
    Bang,
    AmpAmp,
    PipePipe,

    // Comparison
    EqEq,
    BangEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Bitwise
    Pipe,
    Caret,
    GtGt,
    LtLt,

    // Compound assignment (statement grammar only; §4.4)
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,

    Ellipsis,

    EndOfFile,
}

/// Reserved words (§4.3). Note `for`, `break` and `continue` are
/// deliberately absent: the reference lexer's keyword table
/// (`lang/frontend/lexer/Lexer.cpp`) only reserves
/// these seventeen spellings. `for`/`break`/`continue` are ordinary
/// identifiers lexically; the parser (§4.4) recognizes them contextually by
/// spelling at statement-start, the way a soft keyword works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Public,
    Private,
    Using,
    Import,
    If,
    Else,
    ElseIf,
    Do,
    While,
    Func,
    Return,
    End,
    Var,
    StdCall,
    FastCall,
    CDecl,
    Auto,
}

impl Keyword {
    pub fn from_text(text: &str) -> Option<Keyword> {
        Some(match text {
            "public" => Keyword::Public,
            "private" => Keyword::Private,
            "using" => Keyword::Using,
            "import" => Keyword::Import,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "elseif" => Keyword::ElseIf,
            "do" => Keyword::Do,
            "while" => Keyword::While,
            "func" => Keyword::Func,
            "return" => Keyword::Return,
            "end" => Keyword::End,
            "var" => Keyword::Var,
            "__stdcall" => Keyword::StdCall,
            "__fastcall" => Keyword::FastCall,
            "__cdecl" => Keyword::CDecl,
            "__auto" => Keyword::Auto,
            _ => return None,
        })
    }

    pub fn text(self) -> &'static str {
        match self {
            Keyword::Public => "public",
            Keyword::Private => "private",
            Keyword::Using => "using",
            Keyword::Import => "import",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::ElseIf => "elseif",
            Keyword::Do => "do",
            Keyword::While => "while",
            Keyword::Func => "func",
            Keyword::Return => "return",
            Keyword::End => "end",
            Keyword::Var => "var",
            Keyword::StdCall => "__stdcall",
            Keyword::FastCall => "__fastcall",
            Keyword::CDecl => "__cdecl",
            Keyword::Auto => "__auto",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "{n}"),
            TokenKind::Float(s) => write!(f, "{s}f"),
            TokenKind::Double(s) => write!(f, "{s}"),
            TokenKind::StringLit(s) => write!(f, "\"{s}\""),
            TokenKind::CharLit(c) => write!(f, "'{}'", *c as char),
            TokenKind::Identifier(name) => write!(f, "{name}"),
            TokenKind::Keyword(k) => write!(f, "{k}"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBrack => write!(f, "["),
            TokenKind::RBrack => write!(f, "]"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::ColonColon => write!(f, "::"),
            TokenKind::At => write!(f, "@"),
            TokenKind::Assign => write!(f, "="),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::Tilde => write!(f, "~"),
            TokenKind::Amp => write!(f, "&"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::AmpAmp => write!(f, "&&"),
            TokenKind::PipePipe => write!(f, "||"),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::BangEq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::LtEq => write!(f, "<="),
            TokenKind::GtEq => write!(f, ">="),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::GtGt => write!(f, ">>"),
            TokenKind::LtLt => write!(f, "<<"),
            TokenKind::PlusEq => write!(f, "+="),
            TokenKind::MinusEq => write!(f, "-="),
            TokenKind::StarEq => write!(f, "*="),
            TokenKind::SlashEq => write!(f, "/="),
            TokenKind::Ellipsis => write!(f, "..."),
            TokenKind::EndOfFile => write!(f, "EOF"),
        }
    }
}

pub type Token = Spanned<TokenKind>;

pub trait TokenUtils {
    fn new(kind: TokenKind, span: Span) -> Self;
    fn is_keyword(&self, kw: Keyword) -> bool;
    fn is_eof(&self) -> bool;
}

impl TokenUtils for Token {
    fn new(kind: TokenKind, span: Span) -> Self {
        Spanned::new(kind, span)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.value, TokenKind::Keyword(k) if *k == kw)
    }

    fn is_eof(&self) -> bool {
        matches!(self.value, TokenKind::EndOfFile)
    }
}
