/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Lo Source Parser - Recursive Descent
//!
//! Turns `.lo` source text into nodes appended to an [`Ast`] arena.
//! Binary operators are parsed by precedence climbing.

use crate::ast::{
    Ast, BinaryOp, Block, ElseBranch, EnumItem, ExprId, ExprKind, FieldDecl, FieldInit,
    FunctionItem, GlobalItem, ImportItem, ImportedFunction, ItemId, ItemKind, MatchArm, Param,
    Pattern, Span, StmtId, StmtKind, StructItem, TypeExpr, UnaryOp, VariantDecl,
};
use std::sync::Arc;
use thiserror::Error;

// ─── Error Types ─────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Syntax Error at {file}:{line}:{col}: {message}")]
    Syntax {
        message: String,
        line: u32,
        col: u32,
        file: String,
    },
    #[error("Unexpected token: expected {expected}, found {found} at {file}:{line}:{col}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: u32,
        col: u32,
        file: String,
    },
    #[error("Unexpected end of file in {file}")]
    UnexpectedEof { file: String },
}

impl ParseError {
    fn syntax(msg: impl Into<String>, line: u32, col: u32, file: &str) -> Self {
        ParseError::Syntax {
            message: msg.into(),
            line,
            col,
            file: file.to_string(),
        }
    }

    fn unexpected(expected: impl Into<String>, tok: &Token, file: &str) -> Self {
        if tok.kind == TokenKind::Eof {
            return ParseError::UnexpectedEof {
                file: file.to_string(),
            };
        }
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: format!("{:?}", tok.kind),
            line: tok.line,
            col: tok.col,
            file: file.to_string(),
        }
    }
}

// ─── Token Types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int { value: u64, suffix: Option<String> },
    Float { value: f64, suffix: Option<String> },
    Char(u8),
    Str(Vec<u8>),
    Ident(String),
    Label(String),

    // Keywords
    Fn,
    Export,
    Import,
    From,
    As,
    Struct,
    Enum,
    Global,
    Mut,
    Let,
    If,
    Else,
    Loop,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Defer,
    Match,
    SizeOf,
    True,
    False,
    Include,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Assign,
    CompoundAssign(BinaryOp),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    FatArrow, // =>
    DotDot,   // ..

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    ColonColon,
    Dot,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    file: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &str, file: &'a str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            file,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (line, col) = (self.line, self.col);
            let kind = match self.peek() {
                None => TokenKind::Eof,
                Some(_) => self.next_token()?,
            };
            let done = kind == TokenKind::Eof;
            tokens.push(Token {
                kind,
                line,
                col,
                end_line: self.line,
                end_col: self.col,
            });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::syntax(msg, self.line, self.col, self.file)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_ahead(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.advance();
                    self.advance();
                    loop {
                        match (self.peek(), self.peek_ahead(1)) {
                            (Some('*'), Some('/')) => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance();
                            }
                            (None, _) => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_escape(&mut self) -> Result<u8, ParseError> {
        match self.advance() {
            Some('n') => Ok(b'\n'),
            Some('t') => Ok(b'\t'),
            Some('r') => Ok(b'\r'),
            Some('0') => Ok(0),
            Some('\\') => Ok(b'\\'),
            Some('\'') => Ok(b'\''),
            Some('"') => Ok(b'"'),
            Some('x') => {
                let hi = self.advance().and_then(|c| c.to_digit(16));
                let lo = self.advance().and_then(|c| c.to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                    _ => Err(self.error("invalid \\x escape")),
                }
            }
            Some(c) => Err(self.error(format!("unknown escape sequence \\{}", c))),
            None => Err(ParseError::UnexpectedEof {
                file: self.file.to_string(),
            }),
        }
    }

    fn read_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }
        ident
    }

    fn read_number(&mut self) -> Result<TokenKind, ParseError> {
        let radix = match (self.peek(), self.peek_ahead(1)) {
            (Some('0'), Some('x')) => 16,
            (Some('0'), Some('b')) => 2,
            _ => 10,
        };
        if radix != 10 {
            self.advance();
            self.advance();
        }

        let mut digits = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c == '_' {
                self.advance();
            } else if c.is_digit(radix) {
                digits.push(c);
                self.advance();
            } else if radix == 10
                && c == '.'
                && !is_float
                && self.peek_ahead(1).is_some_and(|n| n.is_ascii_digit())
            {
                is_float = true;
                digits.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            return Err(self.error("expected digits in numeric literal"));
        }

        let suffix = match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => Some(self.read_ident()),
            _ => None,
        };
        if let Some(s) = &suffix {
            let valid = matches!(
                s.as_str(),
                "u8" | "i8" | "u16" | "i16" | "u32" | "i32" | "u64" | "i64" | "f32" | "f64"
            );
            if !valid {
                return Err(self.error(format!("invalid literal suffix `{}`", s)));
            }
        }

        let float_suffix = suffix.as_deref().is_some_and(|s| s.starts_with('f'));
        if is_float || float_suffix {
            let value: f64 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid float literal `{}`", digits)))?;
            return Ok(TokenKind::Float { value, suffix });
        }
        let value = u64::from_str_radix(&digits, radix)
            .map_err(|_| self.error(format!("integer literal `{}` does not fit in 64 bits", digits)))?;
        Ok(TokenKind::Int { value, suffix })
    }

    fn next_token(&mut self) -> Result<TokenKind, ParseError> {
        let ch = match self.peek() {
            Some(c) => c,
            None => return Ok(TokenKind::Eof),
        };

        if ch.is_ascii_digit() {
            return self.read_number();
        }

        // Strings
        if ch == '"' {
            self.advance();
            let mut bytes = Vec::new();
            loop {
                match self.advance() {
                    Some('\\') => bytes.push(self.read_escape()?),
                    Some('"') => break,
                    Some(c) => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                    None => {
                        return Err(ParseError::UnexpectedEof {
                            file: self.file.to_string(),
                        })
                    }
                }
            }
            return Ok(TokenKind::Str(bytes));
        }

        // Characters 'a' and labels 'outer
        if ch == '\'' {
            self.advance();
            if self.peek() == Some('\\') {
                self.advance();
                let value = self.read_escape()?;
                if self.advance() != Some('\'') {
                    return Err(self.error("unterminated character literal"));
                }
                return Ok(TokenKind::Char(value));
            }
            if self.peek_ahead(1) == Some('\'') {
                let c = self.advance().unwrap_or('\0');
                self.advance();
                if !c.is_ascii() {
                    return Err(self.error("character literals must be ASCII"));
                }
                return Ok(TokenKind::Char(c as u8));
            }
            let name = self.read_ident();
            if name.is_empty() {
                return Err(self.error("expected character literal or label"));
            }
            return Ok(TokenKind::Label(name));
        }

        // Identifiers and keywords
        if ch.is_ascii_alphabetic() || ch == '_' {
            let ident = self.read_ident();
            let kind = match ident.as_str() {
                "fn" => TokenKind::Fn,
                "export" => TokenKind::Export,
                "import" => TokenKind::Import,
                "from" => TokenKind::From,
                "as" => TokenKind::As,
                "struct" => TokenKind::Struct,
                "enum" => TokenKind::Enum,
                "global" => TokenKind::Global,
                "mut" => TokenKind::Mut,
                "let" => TokenKind::Let,
                "if" => TokenKind::If,
                "else" => TokenKind::Else,
                "loop" => TokenKind::Loop,
                "while" => TokenKind::While,
                "for" => TokenKind::For,
                "in" => TokenKind::In,
                "break" => TokenKind::Break,
                "continue" => TokenKind::Continue,
                "return" => TokenKind::Return,
                "defer" => TokenKind::Defer,
                "match" => TokenKind::Match,
                "sizeof" => TokenKind::SizeOf,
                "true" => TokenKind::True,
                "false" => TokenKind::False,
                "include" => TokenKind::Include,
                _ => TokenKind::Ident(ident),
            };
            return Ok(kind);
        }

        // Operators and delimiters
        self.advance();
        let next = self.peek();
        let two = |lexer: &mut Self, kind: TokenKind| {
            lexer.advance();
            kind
        };
        let kind = match (ch, next) {
            ('<', Some('<')) => {
                self.advance();
                if self.peek() == Some('=') {
                    two(self, TokenKind::CompoundAssign(BinaryOp::Shl))
                } else {
                    TokenKind::Shl
                }
            }
            ('>', Some('>')) => {
                self.advance();
                if self.peek() == Some('=') {
                    two(self, TokenKind::CompoundAssign(BinaryOp::Shr))
                } else {
                    TokenKind::Shr
                }
            }
            ('+', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::Add)),
            ('-', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::Sub)),
            ('*', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::Mul)),
            ('/', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::Div)),
            ('%', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::Rem)),
            ('&', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::BitAnd)),
            ('|', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::BitOr)),
            ('^', Some('=')) => two(self, TokenKind::CompoundAssign(BinaryOp::BitXor)),
            ('&', Some('&')) => two(self, TokenKind::AndAnd),
            ('|', Some('|')) => two(self, TokenKind::OrOr),
            ('=', Some('=')) => two(self, TokenKind::Eq),
            ('=', Some('>')) => two(self, TokenKind::FatArrow),
            ('!', Some('=')) => two(self, TokenKind::Ne),
            ('<', Some('=')) => two(self, TokenKind::Le),
            ('>', Some('=')) => two(self, TokenKind::Ge),
            (':', Some(':')) => two(self, TokenKind::ColonColon),
            ('.', Some('.')) => two(self, TokenKind::DotDot),
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('&', _) => TokenKind::Amp,
            ('|', _) => TokenKind::Pipe,
            ('^', _) => TokenKind::Caret,
            ('!', _) => TokenKind::Bang,
            ('~', _) => TokenKind::Tilde,
            ('=', _) => TokenKind::Assign,
            ('<', _) => TokenKind::Lt,
            ('>', _) => TokenKind::Gt,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            (',', _) => TokenKind::Comma,
            (';', _) => TokenKind::Semi,
            (':', _) => TokenKind::Colon,
            ('.', _) => TokenKind::Dot,
            (other, _) => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(kind)
    }
}

// ─── Parser ──────────────────────────────────────────────────────────────────

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: Arc<str>,
    ast: &'a mut Ast,
    /// Set while parsing `if`/`while`/`for`/`match` heads, where `{`
    /// opens the body rather than a struct literal.
    no_struct_literal: bool,
}

fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    Some(match kind {
        TokenKind::OrOr => (BinaryOp::Or, 1),
        TokenKind::AndAnd => (BinaryOp::And, 2),
        TokenKind::Eq => (BinaryOp::Eq, 3),
        TokenKind::Ne => (BinaryOp::Ne, 3),
        TokenKind::Lt => (BinaryOp::Lt, 3),
        TokenKind::Le => (BinaryOp::Le, 3),
        TokenKind::Gt => (BinaryOp::Gt, 3),
        TokenKind::Ge => (BinaryOp::Ge, 3),
        TokenKind::Pipe => (BinaryOp::BitOr, 4),
        TokenKind::Caret => (BinaryOp::BitXor, 5),
        TokenKind::Amp => (BinaryOp::BitAnd, 6),
        TokenKind::Shl => (BinaryOp::Shl, 7),
        TokenKind::Shr => (BinaryOp::Shr, 7),
        TokenKind::Plus => (BinaryOp::Add, 8),
        TokenKind::Minus => (BinaryOp::Sub, 8),
        TokenKind::Star => (BinaryOp::Mul, 9),
        TokenKind::Slash => (BinaryOp::Div, 9),
        TokenKind::Percent => (BinaryOp::Rem, 9),
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, file: &str, ast: &'a mut Ast) -> Self {
        Parser {
            tokens,
            pos: 0,
            file: Arc::from(file),
            ast,
            no_struct_literal: false,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<Token, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(ParseError::unexpected(format!("{:?}", expected), self.peek(), &self.file))
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn match_tok(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.check(&TokenKind::Eof)
    }

    /// Span from `start` through the most recently consumed token.
    fn span_from(&self, start: &Token) -> Span {
        let prev = &self.tokens[self.pos.saturating_sub(1)];
        Span {
            file: self.file.clone(),
            line: start.line,
            col: start.col,
            end_line: prev.end_line,
            end_col: prev.end_col,
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(ParseError::unexpected("identifier", self.peek(), &self.file)),
        }
    }

    fn string(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Str(bytes) => {
                self.advance();
                Ok(bytes)
            }
            _ => Err(ParseError::unexpected("string literal", self.peek(), &self.file)),
        }
    }

    fn string_utf8(&mut self) -> Result<String, ParseError> {
        let tok = self.peek().clone();
        let bytes = self.string()?;
        String::from_utf8(bytes)
            .map_err(|_| ParseError::syntax("expected UTF-8 text", tok.line, tok.col, &self.file))
    }

    /// `a`, `a::b`, `Type::method`.
    fn path(&mut self) -> Result<String, ParseError> {
        let mut path = self.ident()?;
        while self.check(&TokenKind::ColonColon) {
            self.advance();
            path.push_str("::");
            path.push_str(&self.ident()?);
        }
        Ok(path)
    }

    fn parse_type(&mut self) -> Result<TypeExpr, ParseError> {
        let start = self.peek().clone();
        if self.match_tok(&TokenKind::Amp) {
            let inner = self.parse_type()?;
            return Ok(TypeExpr::Pointer(Box::new(inner), self.span_from(&start)));
        }
        let name = self.path()?;
        Ok(TypeExpr::Named(name, self.span_from(&start)))
    }

    // ─── Top-Level ───────────────────────────────────────────────────────

    pub fn parse_items(&mut self) -> Result<Vec<ItemId>, ParseError> {
        let mut items = Vec::new();
        while !self.at_end() {
            if self.match_tok(&TokenKind::Semi) {
                continue;
            }
            items.push(self.parse_item()?);
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<ItemId, ParseError> {
        let start = self.peek().clone();
        let kind = match &start.kind {
            TokenKind::Include => {
                self.advance();
                let path = self.string_utf8()?;
                self.expect(&TokenKind::Semi)?;
                ItemKind::Include(path)
            }
            TokenKind::Export => {
                self.advance();
                if !self.check(&TokenKind::Fn) {
                    return Err(ParseError::unexpected("fn", self.peek(), &self.file));
                }
                ItemKind::Function(self.parse_function(true)?)
            }
            TokenKind::Fn => ItemKind::Function(self.parse_function(false)?),
            TokenKind::Import => ItemKind::Import(self.parse_import()?),
            TokenKind::Struct => ItemKind::Struct(self.parse_struct()?),
            TokenKind::Enum => ItemKind::Enum(self.parse_enum()?),
            TokenKind::Global => ItemKind::Global(self.parse_global()?),
            _ => return Err(ParseError::unexpected("top-level item", &start, &self.file)),
        };
        let span = self.span_from(&start);
        Ok(self.ast.push_item(kind, span))
    }

    // ─── Declarations ────────────────────────────────────────────────────

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let start = self.peek().clone();
            let name = self.ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type()?;
            params.push(Param {
                name,
                ty,
                span: self.span_from(&start),
            });
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_return_type(&mut self) -> Result<Option<TypeExpr>, ParseError> {
        if self.match_tok(&TokenKind::Colon) {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    fn parse_function(&mut self, exported: bool) -> Result<FunctionItem, ParseError> {
        self.expect(&TokenKind::Fn)?;
        let name = self.path()?;
        let params = self.parse_params()?;
        let ret = self.parse_return_type()?;
        let body = self.parse_block()?;
        Ok(FunctionItem {
            name,
            params,
            ret,
            body,
            exported,
        })
    }

    fn parse_import(&mut self) -> Result<ImportItem, ParseError> {
        self.expect(&TokenKind::Import)?;
        self.expect(&TokenKind::From)?;
        let module = self.string_utf8()?;
        self.expect(&TokenKind::LBrace)?;
        let mut functions = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.peek().clone();
            self.expect(&TokenKind::Fn)?;
            let field = self.ident()?;
            let params = self.parse_params()?;
            let ret = self.parse_return_type()?;
            let local_name = if self.match_tok(&TokenKind::As) {
                self.path()?
            } else {
                field.clone()
            };
            self.expect(&TokenKind::Semi)?;
            functions.push(ImportedFunction {
                field,
                local_name,
                params,
                ret,
                span: self.span_from(&start),
            });
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(ImportItem { module, functions })
    }

    fn parse_struct(&mut self) -> Result<StructItem, ParseError> {
        self.expect(&TokenKind::Struct)?;
        let name = self.ident()?;
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.peek().clone();
            let field = self.ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fields.push(FieldDecl {
                name: field,
                ty,
                span: self.span_from(&start),
            });
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(StructItem { name, fields })
    }

    fn parse_enum(&mut self) -> Result<EnumItem, ParseError> {
        self.expect(&TokenKind::Enum)?;
        let name = self.ident()?;
        self.expect(&TokenKind::LBrace)?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.peek().clone();
            let variant = self.ident()?;
            let payload = if self.match_tok(&TokenKind::LParen) {
                let ty = self.parse_type()?;
                self.expect(&TokenKind::RParen)?;
                Some(ty)
            } else {
                None
            };
            variants.push(VariantDecl {
                name: variant,
                payload,
                span: self.span_from(&start),
            });
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(EnumItem { name, variants })
    }

    fn parse_global(&mut self) -> Result<GlobalItem, ParseError> {
        self.expect(&TokenKind::Global)?;
        let mutable = self.match_tok(&TokenKind::Mut);
        let name = self.path()?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Assign)?;
        let init = self.parse_expression()?;
        self.expect(&TokenKind::Semi)?;
        Ok(GlobalItem {
            name,
            mutable,
            ty,
            init,
        })
    }

    // ─── Block ───────────────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.expect(&TokenKind::LBrace)?;
        let saved = std::mem::replace(&mut self.no_struct_literal, false);
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.at_end() {
                return Err(ParseError::UnexpectedEof {
                    file: self.file.to_string(),
                });
            }
            if self.match_tok(&TokenKind::Semi) {
                continue;
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        self.no_struct_literal = saved;
        Ok(Block {
            stmts,
            span: self.span_from(&start),
        })
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<StmtId, ParseError> {
        let start = self.peek().clone();
        let kind = match start.kind.clone() {
            TokenKind::Let => self.parse_let()?,
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(&TokenKind::Semi)?;
                StmtKind::Return(value)
            }
            TokenKind::Break | TokenKind::Continue => {
                self.advance();
                let label = match self.peek().kind.clone() {
                    TokenKind::Label(name) => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                self.expect(&TokenKind::Semi)?;
                if start.kind == TokenKind::Break {
                    StmtKind::Break(label)
                } else {
                    StmtKind::Continue(label)
                }
            }
            TokenKind::Defer => {
                self.advance();
                StmtKind::Defer(self.parse_statement()?)
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::Match => self.parse_match()?,
            TokenKind::Label(label) if *self.peek_at(1) == TokenKind::Colon => {
                self.advance();
                self.advance();
                self.parse_labeled(Some(label))?
            }
            TokenKind::Loop | TokenKind::While | TokenKind::For | TokenKind::LBrace => {
                self.parse_labeled(None)?
            }
            _ => self.parse_expr_or_assign()?,
        };
        let span = self.span_from(&start);
        Ok(self.ast.push_stmt(kind, span))
    }

    fn parse_let(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::Let)?;
        let mutable = self.match_tok(&TokenKind::Mut);
        let name = self.ident()?;
        let ty = if self.match_tok(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Assign)?;
        let init = self.parse_expression()?;
        self.expect(&TokenKind::Semi)?;
        Ok(StmtKind::Let {
            name,
            mutable,
            ty,
            init,
        })
    }

    fn parse_condition(&mut self) -> Result<ExprId, ParseError> {
        let saved = std::mem::replace(&mut self.no_struct_literal, true);
        let expr = self.parse_expression();
        self.no_struct_literal = saved;
        expr
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_condition()?;
        let then_block = self.parse_block()?;
        let else_branch = if self.match_tok(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let start = self.peek().clone();
                let nested = self.parse_if()?;
                let span = self.span_from(&start);
                Some(ElseBranch::If(self.ast.push_stmt(nested, span)))
            } else {
                Some(ElseBranch::Block(self.parse_block()?))
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_block,
            else_branch,
        })
    }

    fn parse_labeled(&mut self, label: Option<String>) -> Result<StmtKind, ParseError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Loop => {
                self.advance();
                let body = self.parse_block()?;
                Ok(StmtKind::Loop { label, body })
            }
            TokenKind::While => {
                self.advance();
                let cond = self.parse_condition()?;
                let body = self.parse_block()?;
                Ok(StmtKind::While { label, cond, body })
            }
            TokenKind::For => {
                self.advance();
                let var = self.ident()?;
                self.expect(&TokenKind::In)?;
                let start = self.parse_condition()?;
                self.expect(&TokenKind::DotDot)?;
                let end = self.parse_condition()?;
                let body = self.parse_block()?;
                Ok(StmtKind::For {
                    label,
                    var,
                    start,
                    end,
                    body,
                })
            }
            TokenKind::LBrace => {
                let body = self.parse_block()?;
                Ok(StmtKind::Block { label, body })
            }
            _ => Err(ParseError::unexpected("loop, while, for or block", &tok, &self.file)),
        }
    }

    fn parse_match(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(&TokenKind::Match)?;
        let scrutinee = self.parse_condition()?;
        self.expect(&TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.peek().clone();
            let path = self.path()?;
            let pattern = if path == "_" {
                Pattern::Wildcard(self.span_from(&start))
            } else {
                let binding = if self.match_tok(&TokenKind::LParen) {
                    let name = self.ident()?;
                    self.expect(&TokenKind::RParen)?;
                    Some(name)
                } else {
                    None
                };
                Pattern::Variant {
                    path,
                    binding,
                    span: self.span_from(&start),
                }
            };
            self.expect(&TokenKind::FatArrow)?;
            let body = self.parse_block()?;
            self.match_tok(&TokenKind::Comma);
            arms.push(MatchArm { pattern, body });
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(StmtKind::Match { scrutinee, arms })
    }

    fn parse_expr_or_assign(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.parse_expression()?;
        let op = match self.peek().kind {
            TokenKind::Assign => Some(None),
            TokenKind::CompoundAssign(op) => Some(Some(op)),
            _ => None,
        };
        let kind = match op {
            Some(op) => {
                self.advance();
                let value = self.parse_expression()?;
                StmtKind::Assign { target, op, value }
            }
            None => StmtKind::Expr(target),
        };
        self.expect(&TokenKind::Semi)?;
        Ok(kind)
    }

    // ─── Expressions (Precedence Climbing) ───────────────────────────────

    pub fn parse_expression(&mut self) -> Result<ExprId, ParseError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<ExprId, ParseError> {
        let start = self.peek().clone();
        let mut lhs = self.parse_cast()?;
        while let Some((op, prec)) = binary_op(&self.peek().kind) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = self.span_from(&start);
            lhs = self.ast.push_expr(ExprKind::Binary { op, lhs, rhs }, span);
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> Result<ExprId, ParseError> {
        let start = self.peek().clone();
        let mut expr = self.parse_unary()?;
        while self.match_tok(&TokenKind::As) {
            let ty = self.parse_type()?;
            let span = self.span_from(&start);
            expr = self.ast.push_expr(ExprKind::Cast { expr, ty }, span);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<ExprId, ParseError> {
        let start = self.peek().clone();
        let kind: Option<fn(ExprId) -> ExprKind> = match start.kind {
            TokenKind::Minus => Some(|e| ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: e,
            }),
            TokenKind::Bang => Some(|e| ExprKind::Unary {
                op: UnaryOp::Not,
                operand: e,
            }),
            TokenKind::Tilde => Some(|e| ExprKind::Unary {
                op: UnaryOp::BitNot,
                operand: e,
            }),
            TokenKind::Amp => Some(ExprKind::AddrOf),
            TokenKind::Star => Some(ExprKind::Deref),
            _ => None,
        };
        match kind {
            Some(build) => {
                self.advance();
                let operand = self.parse_unary()?;
                let span = self.span_from(&start);
                Ok(self.ast.push_expr(build(operand), span))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<ExprId, ParseError> {
        let start = self.peek().clone();
        let mut expr = self.parse_primary()?;
        loop {
            if self.match_tok(&TokenKind::Dot) {
                let name = self.ident()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    let span = self.span_from(&start);
                    expr = self.ast.push_expr(
                        ExprKind::MethodCall {
                            receiver: expr,
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = self.span_from(&start);
                    expr = self.ast.push_expr(
                        ExprKind::Field {
                            object: expr,
                            field: name,
                        },
                        span,
                    );
                }
            } else if self.match_tok(&TokenKind::LBracket) {
                let saved = std::mem::replace(&mut self.no_struct_literal, false);
                let index = self.parse_expression()?;
                self.no_struct_literal = saved;
                self.expect(&TokenKind::RBracket)?;
                let span = self.span_from(&start);
                expr = self.ast.push_expr(ExprKind::Index { object: expr, index }, span);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<ExprId>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let saved = std::mem::replace(&mut self.no_struct_literal, false);
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
        }
        self.no_struct_literal = saved;
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ExprId, ParseError> {
        let tok = self.peek().clone();
        let kind = match tok.kind.clone() {
            TokenKind::Int { value, suffix } => {
                self.advance();
                ExprKind::Int { value, suffix }
            }
            TokenKind::Float { value, suffix } => {
                self.advance();
                ExprKind::Float { value, suffix }
            }
            TokenKind::Char(c) => {
                self.advance();
                ExprKind::Char(c)
            }
            TokenKind::Str(bytes) => {
                self.advance();
                ExprKind::Str(bytes)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::SizeOf => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::RParen)?;
                ExprKind::SizeOf(ty)
            }
            TokenKind::LParen => {
                self.advance();
                let saved = std::mem::replace(&mut self.no_struct_literal, false);
                let inner = self.parse_expression()?;
                self.no_struct_literal = saved;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::Ident(_) => {
                let path = self.path()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    ExprKind::Call { callee: path, args }
                } else if self.check(&TokenKind::LBrace) && !self.no_struct_literal {
                    ExprKind::StructLit {
                        name: path,
                        fields: self.parse_field_inits()?,
                    }
                } else {
                    ExprKind::Path(path)
                }
            }
            _ => return Err(ParseError::unexpected("expression", &tok, &self.file)),
        };
        let span = self.span_from(&tok);
        Ok(self.ast.push_expr(kind, span))
    }

    fn parse_field_inits(&mut self) -> Result<Vec<FieldInit>, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let start = self.peek().clone();
            let name = self.ident()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expression()?;
            fields.push(FieldInit {
                name,
                value,
                span: self.span_from(&start),
            });
            if !self.match_tok(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(fields)
    }
}

// ─── Public API ──────────────────────────────────────────────────────────────

/// Parse one file, appending its nodes to `ast`. Returns the file's
/// top-level items in source order; `include` items are left for the
/// loader to resolve.
pub fn parse_source(source: &str, file: &str, ast: &mut Ast) -> Result<Vec<ItemId>, ParseError> {
    let tokens = Lexer::new(source, file).tokenize()?;
    let mut parser = Parser::new(tokens, file, ast);
    parser.parse_items()
}

/// Parse a single self-contained file into a fresh tree.
pub fn parse_program(source: &str, file: &str) -> Result<Ast, ParseError> {
    let mut ast = Ast::new(file);
    let items = parse_source(source, file, &mut ast)?;
    ast.order = items;
    Ok(ast)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "t.lo")
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lex_literals() {
        let tokens = lex("0xFF 1_000u64 2.5 'a' '\\n' \"hi\\x21\" 'outer");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Int { value: 255, suffix: None },
                TokenKind::Int { value: 1000, suffix: Some("u64".into()) },
                TokenKind::Float { value: 2.5, suffix: None },
                TokenKind::Char(b'a'),
                TokenKind::Char(b'\n'),
                TokenKind::Str(b"hi!".to_vec()),
                TokenKind::Label("outer".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_operators() {
        let tokens = lex("a <<= b >> c .. d :: e => f");
        assert!(tokens.contains(&TokenKind::CompoundAssign(BinaryOp::Shl)));
        assert!(tokens.contains(&TokenKind::Shr));
        assert!(tokens.contains(&TokenKind::DotDot));
        assert!(tokens.contains(&TokenKind::ColonColon));
        assert!(tokens.contains(&TokenKind::FatArrow));
    }

    #[test]
    fn test_lex_skips_comments() {
        let tokens = lex("// line\n/* block\n comment */ fn");
        assert_eq!(tokens, vec![TokenKind::Fn, TokenKind::Eof]);
    }

    #[test]
    fn test_parse_function_and_precedence() {
        let ast = parse_program("fn f(a: u32): u32 { return a + 2 * 3; }", "t.lo").unwrap();
        let (_, item) = ast.items().next().unwrap();
        let func = match &item.kind {
            ItemKind::Function(f) => f,
            other => panic!("expected function, got {:?}", other),
        };
        assert_eq!(func.name, "f");
        let ret = ast.stmt(func.body.stmts[0]);
        let value = match &ret.kind {
            StmtKind::Return(Some(v)) => *v,
            other => panic!("expected return, got {:?}", other),
        };
        match &ast.expr(value).kind {
            ExprKind::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(ast.expr(*rhs).kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected addition at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_struct_literal_not_in_condition() {
        let src = "fn f(p: P) { if p.x == 1 { return; } let q = P { x: 1 }; }";
        let result = parse_program(src, "t.lo");
        assert!(result.is_ok(), "Parse failed: {:?}", result.err());
    }

    #[test]
    fn test_parse_labels_and_defer() {
        let src = "fn f() { 'outer: loop { defer g(); while true { break 'outer; } } }";
        let ast = parse_program(src, "t.lo").unwrap();
        let (_, item) = ast.items().next().unwrap();
        let ItemKind::Function(func) = &item.kind else {
            panic!("expected function");
        };
        match &ast.stmt(func.body.stmts[0]).kind {
            StmtKind::Loop { label, body } => {
                assert_eq!(label.as_deref(), Some("outer"));
                assert!(matches!(ast.stmt(body.stmts[0]).kind, StmtKind::Defer(_)));
            }
            other => panic!("expected labeled loop, got {:?}", other),
        }
    }

    #[test]
    fn test_expression_span_covers_operands() {
        let src = "fn f() {\n    let x = a + b;\n}";
        let ast = parse_program(src, "t.lo").unwrap();
        let (_, item) = ast.items().next().unwrap();
        let ItemKind::Function(func) = &item.kind else {
            panic!("expected function");
        };
        let StmtKind::Let { init, .. } = &ast.stmt(func.body.stmts[0]).kind else {
            panic!("expected let");
        };
        let span = &ast.expr(*init).span;
        assert_eq!((span.line, span.col), (2, 13));
        assert_eq!(span.end_line, 2);
        assert!(span.end_col > span.col, "span should extend past `a`: {:?}", span);
        assert_eq!(span.to_string(), "t.lo:2:13");
    }

    #[test]
    fn test_parse_items() {
        let src = r#"
            include "std.lo";
            import from "wasi_snapshot_preview1" { fn proc_exit(code: u32); }
            struct P { x: u32, next: &P }
            enum Opt { None, Some(u32) }
            global mut COUNT: u32 = 0;
            export fn P::get(self: &P): u32 { return self.x; }
        "#;
        let ast = parse_program(src, "t.lo").unwrap();
        let kinds: Vec<&str> = ast
            .items()
            .map(|(_, i)| match &i.kind {
                ItemKind::Include(_) => "include",
                ItemKind::Import(_) => "import",
                ItemKind::Struct(_) => "struct",
                ItemKind::Enum(_) => "enum",
                ItemKind::Global(_) => "global",
                ItemKind::Function(_) => "fn",
            })
            .collect();
        assert_eq!(kinds, vec!["include", "import", "struct", "enum", "global", "fn"]);
    }

    #[test]
    fn test_parse_error_location() {
        let err = parse_program("fn f() {\n  let = 1;\n}", "bad.lo").unwrap_err();
        match err {
            ParseError::UnexpectedToken { line, file, .. } => {
                assert_eq!(line, 2);
                assert_eq!(file, "bad.lo");
            }
            other => panic!("expected UnexpectedToken, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unterminated_block_is_eof() {
        let err = parse_program("fn f() { return;", "eof.lo").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }), "got {:?}", err);
    }
}
