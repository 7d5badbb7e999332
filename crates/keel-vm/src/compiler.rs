// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source compiler.
//!
//! The language is line oriented. A statement is one of:
//!
//! ```text
//! $name = expr          # assign a global
//! expr << expr          # append to an array
//! name arg, arg         # call a function (parentheses optional)
//! expr                  # any expression
//! ```
//!
//! Expressions are string and integer literals, `nil`, `true`, `false`,
//! `__FILE__`, globals, array literals and calls. Statements are separated by
//! newlines or `;`, and `#` starts a comment.

use crate::error::{Result, VmError};
use crate::irep::{Instruction, Irep, OpCode};

/// Compiles source text into a top-level unit ending in `STOP`.
pub fn compile(source: &str, filename: &str) -> Result<Irep<'static>> {
    let mut compiler = Compiler::new(filename);
    let mut statements = 0usize;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let tokens = tokenize(line).map_err(|message| compiler.syntax(line_no, message))?;
        for stmt in tokens.split(|t| *t == Token::Semicolon) {
            if stmt.is_empty() {
                continue;
            }
            if statements > 0 {
                compiler.emit(Instruction::simple(OpCode::Pop));
            }
            let mut parser = Parser {
                tokens: stmt,
                pos: 0,
                compiler: &mut compiler,
                line: line_no,
            };
            parser.statement()?;
            statements += 1;
        }
    }

    if statements == 0 {
        compiler.emit(Instruction::simple(OpCode::LoadNil));
    }
    compiler.emit(Instruction::simple(OpCode::Stop));
    Ok(Irep::new(compiler.pool, compiler.iseq))
}

/// Maps long global aliases to their short names.
pub fn canonical_global(name: &str) -> &str {
    match name {
        "$LOAD_PATH" => "$:",
        "$LOADED_FEATURES" => "$\"",
        "$PROGRAM_NAME" => "$0",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(i64),
    Ident(String),
    Global(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Assign,
    Shovel,
    Semicolon,
}

fn tokenize(line: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '#' => break,
            '(' | ')' | '[' | ']' | ',' | ';' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    ';' => Token::Semicolon,
                    _ => Token::Assign,
                });
            }
            '<' => {
                chars.next();
                if chars.next() != Some('<') {
                    return Err("expected '<<'".to_string());
                }
                tokens.push(Token::Shovel);
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(lex_string(&mut chars, c)?));
            }
            '$' => {
                chars.next();
                let mut name = String::from("$");
                match chars.peek() {
                    Some(&p) if matches!(p, ':' | '"' | '!') => {
                        name.push(p);
                        chars.next();
                    }
                    _ => {
                        while let Some(&p) = chars.peek() {
                            if p.is_ascii_alphanumeric() || p == '_' {
                                name.push(p);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                if name.len() == 1 {
                    return Err("expected global variable name after '$'".to_string());
                }
                tokens.push(Token::Global(canonical_global(&name).to_string()));
            }
            '-' | '0'..='9' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&p) = chars.peek() {
                    if p.is_ascii_digit() || p == '_' {
                        text.push(p);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text
                    .replace('_', "")
                    .parse::<i64>()
                    .map_err(|_| format!("invalid integer literal '{}'", text))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&p) = chars.peek() {
                    if p.is_alphanumeric() || p == '_' || p == '?' || p == '!' {
                        ident.push(p);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    quote: char,
) -> std::result::Result<String, String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err("unterminated string literal".to_string()),
            Some(c) if c == quote => return Ok(out),
            Some('\\') => match chars.next() {
                Some(e) if quote == '\'' => {
                    if e != '\'' && e != '\\' {
                        out.push('\\');
                    }
                    out.push(e);
                }
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('0') => out.push('\0'),
                Some(e) => out.push(e),
                None => return Err("unterminated string literal".to_string()),
            },
            Some(c) => out.push(c),
        }
    }
}

struct Compiler {
    filename: String,
    pool: Vec<String>,
    iseq: Vec<u8>,
}

impl Compiler {
    fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            pool: Vec::new(),
            iseq: Vec::new(),
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.iseq.extend_from_slice(&instr.encode());
    }

    fn intern(&mut self, s: &str, line: usize) -> Result<u16> {
        let index = match self.pool.iter().position(|e| e == s) {
            Some(index) => index,
            None => {
                self.pool.push(s.to_string());
                self.pool.len() - 1
            }
        };
        u16::try_from(index).map_err(|_| self.syntax(line, "too many literals"))
    }

    fn syntax(&self, line: usize, message: impl Into<String>) -> VmError {
        VmError::Syntax {
            file: self.filename.clone(),
            line,
            message: message.into(),
        }
    }
}

struct Parser<'t, 'c> {
    tokens: &'t [Token],
    pos: usize,
    compiler: &'c mut Compiler,
    line: usize,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> VmError {
        self.compiler.syntax(self.line, message)
    }

    fn statement(&mut self) -> Result<()> {
        if let (Some(Token::Global(name)), Some(Token::Assign)) =
            (self.tokens.first(), self.tokens.get(1))
        {
            let name = name.clone();
            self.pos = 2;
            self.expression()?;
            let index = self.compiler.intern(&name, self.line)?;
            self.compiler
                .emit(Instruction::with_bx(OpCode::SetGlobal, index));
        } else {
            self.expression()?;
        }

        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected {:?}", token))),
        }
    }

    fn expression(&mut self) -> Result<()> {
        self.primary()?;
        while self.peek() == Some(&Token::Shovel) {
            self.advance();
            self.primary()?;
            self.compiler.emit(Instruction::simple(OpCode::ArrayPush));
        }
        Ok(())
    }

    fn primary(&mut self) -> Result<()> {
        let line = self.line;
        match self.advance() {
            Some(Token::Str(s)) => {
                let index = self.compiler.intern(&s, line)?;
                self.compiler.emit(Instruction::with_bx(OpCode::String, index));
            }
            Some(Token::Int(n)) => {
                let n = i16::try_from(n).map_err(|_| self.error("integer literal out of range"))?;
                self.compiler
                    .emit(Instruction::with_bx(OpCode::LoadInt, n as u16));
            }
            Some(Token::Global(name)) => {
                let index = self.compiler.intern(&name, line)?;
                self.compiler
                    .emit(Instruction::with_bx(OpCode::GetGlobal, index));
            }
            Some(Token::LBracket) => {
                let count = self.arguments(Token::RBracket)?;
                self.compiler.emit(Instruction::with_bx(OpCode::Array, count));
            }
            Some(Token::Ident(ident)) => self.identifier(&ident)?,
            Some(token) => return Err(self.error(format!("unexpected {:?}", token))),
            None => return Err(self.error("unexpected end of line")),
        }
        Ok(())
    }

    fn identifier(&mut self, ident: &str) -> Result<()> {
        match ident {
            "nil" => self.compiler.emit(Instruction::simple(OpCode::LoadNil)),
            "true" => self.compiler.emit(Instruction::simple(OpCode::LoadTrue)),
            "false" => self.compiler.emit(Instruction::simple(OpCode::LoadFalse)),
            "__FILE__" => {
                let filename = self.compiler.filename.clone();
                let index = self.compiler.intern(&filename, self.line)?;
                self.compiler.emit(Instruction::with_bx(OpCode::String, index));
            }
            name => {
                let argc = match self.peek() {
                    Some(Token::LParen) => {
                        self.advance();
                        self.arguments(Token::RParen)?
                    }
                    Some(
                        Token::Str(_)
                        | Token::Int(_)
                        | Token::Global(_)
                        | Token::LBracket
                        | Token::Ident(_),
                    ) => self.command_arguments()?,
                    _ => 0,
                };
                let argc = u8::try_from(argc).map_err(|_| self.error("too many arguments"))?;
                let index = self.compiler.intern(name, self.line)?;
                self.compiler.emit(Instruction {
                    opcode: OpCode::Send,
                    a: argc,
                    bx: index,
                });
            }
        }
        Ok(())
    }

    /// Comma separated expressions up to `close`, which is consumed.
    fn arguments(&mut self, close: Token) -> Result<u16> {
        let mut count = 0u16;
        if self.peek() == Some(&close) {
            self.advance();
            return Ok(0);
        }
        loop {
            self.expression()?;
            count = self.one_more(count)?;
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(ref t) if *t == close => return Ok(count),
                _ => return Err(self.error(format!("expected ',' or {:?}", close))),
            }
        }
    }

    /// Unparenthesized arguments running to the end of the statement.
    fn command_arguments(&mut self) -> Result<u16> {
        let mut count = 1u16;
        self.expression()?;
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            self.expression()?;
            count = self.one_more(count)?;
        }
        Ok(count)
    }

    /// Element counts are encoded in 16 bits.
    fn one_more(&self, count: u16) -> Result<u16> {
        count
            .checked_add(1)
            .ok_or_else(|| self.error("too many elements"))
    }
}
