//! Parser for the textual transformation language.
//!
//! The surface syntax pairs two straight-line functions around `=>`:
//!
//! ```text
//! Name: fold_shift
//! %x = shl i8 %a, 3
//! ret i8 %x
//! =>
//! %x = mul i8 %a, 8
//! ret i8 %x
//! ```
//!
//! Types are optional everywhere; an omitted type becomes a fresh symbolic
//! type for the solver to resolve. Identifiers register themselves as
//! function inputs on first use, numbers become integer constants of the
//! surrounding type, and `undef` is accepted wherever an operand is. A
//! `Pre:` line is captured verbatim into the reserved precondition slot.
//! `;` starts a line comment.

use std::collections::HashMap;

use crate::errors::ParseError;
use crate::ir::{BinOpFlags, BinOpKind, Function, Instr, ValueId};
use crate::transform::Transform;
use crate::types::Type;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Name(String),
    Pre(String),
    Ident(String),
    Num(i64),
    IntTy(u32),
    Arrow,
    Equals,
    Comma,
    Op(BinOpKind),
    Ret,
    Unreachable,
    Undef,
    Nsw,
    Nuw,
    Exact,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Name(_) => "a Name: directive".to_string(),
            Token::Pre(_) => "a Pre: directive".to_string(),
            Token::Ident(n) => format!("identifier {}", n),
            Token::Num(n) => format!("number {}", n),
            Token::IntTy(w) => format!("type i{}", w),
            Token::Arrow => "'=>'".to_string(),
            Token::Equals => "'='".to_string(),
            Token::Comma => "','".to_string(),
            Token::Op(op) => format!("'{}'", op.mnemonic()),
            Token::Ret => "'ret'".to_string(),
            Token::Unreachable => "'unreachable'".to_string(),
            Token::Undef => "'undef'".to_string(),
            Token::Nsw => "'nsw'".to_string(),
            Token::Nuw => "'nuw'".to_string(),
            Token::Exact => "'exact'".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.line, msg)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.peek_byte() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b';' => {
                    while let Some(c) = self.peek_byte() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if !pred(b) {
                break;
            }
            self.bump();
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn rest_of_line(&mut self) -> String {
        let text = self.take_while(|b| b != b'\n');
        text.trim().to_string()
    }

    fn word_token(&mut self) -> Result<Token, ParseError> {
        let word = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
        match word.as_str() {
            "Name" | "Pre" if self.peek_byte() == Some(b':') => {
                self.bump();
                let text = self.rest_of_line();
                if word == "Name" {
                    return Ok(Token::Name(text));
                }
                return Ok(Token::Pre(text));
            }
            "add" => return Ok(Token::Op(BinOpKind::Add)),
            "sub" => return Ok(Token::Op(BinOpKind::Sub)),
            "mul" => return Ok(Token::Op(BinOpKind::Mul)),
            "sdiv" => return Ok(Token::Op(BinOpKind::SDiv)),
            "udiv" => return Ok(Token::Op(BinOpKind::UDiv)),
            "shl" => return Ok(Token::Op(BinOpKind::Shl)),
            "lshr" => return Ok(Token::Op(BinOpKind::LShr)),
            "ashr" => return Ok(Token::Op(BinOpKind::AShr)),
            "ret" => return Ok(Token::Ret),
            "unreachable" => return Ok(Token::Unreachable),
            "undef" => return Ok(Token::Undef),
            "nsw" => return Ok(Token::Nsw),
            "nuw" => return Ok(Token::Nuw),
            "exact" => return Ok(Token::Exact),
            _ => {}
        }
        if let Some(digits) = word.strip_prefix('i') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                let width: u32 = digits
                    .parse()
                    .map_err(|_| self.err(format!("integer width out of range: {}", word)))?;
                if !(1..=64).contains(&width) {
                    return Err(self.err(format!("unsupported integer width: {}", word)));
                }
                return Ok(Token::IntTy(width));
            }
        }
        Err(self.err(format!("unknown token: {}", word)))
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();
        let b = match self.peek_byte() {
            Some(b) => b,
            None => return Ok(Token::Eof),
        };
        match b {
            b'%' => {
                self.bump();
                let rest =
                    self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
                if rest.is_empty() {
                    return Err(self.err("expected a name after '%'"));
                }
                Ok(Token::Ident(format!("%{}", rest)))
            }
            b'=' => {
                self.bump();
                if self.peek_byte() == Some(b'>') {
                    self.bump();
                    Ok(Token::Arrow)
                } else {
                    Ok(Token::Equals)
                }
            }
            b',' => {
                self.bump();
                Ok(Token::Comma)
            }
            b'-' | b'0'..=b'9' => {
                let start = self.pos;
                if b == b'-' {
                    self.bump();
                }
                let digits = self.take_while(|b| b.is_ascii_digit());
                if digits.is_empty() {
                    return Err(self.err("expected digits in an integer literal"));
                }
                let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                text.parse::<i64>()
                    .map(Token::Num)
                    .map_err(|_| self.err(format!("integer literal out of range: {}", text)))
            }
            b if b.is_ascii_alphabetic() => self.word_token(),
            other => Err(self.err(format!("unexpected character: {:?}", other as char))),
        }
    }
}

struct Parser<'a> {
    lx: Lexer<'a>,
    peeked: Option<Token>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Parser<'a> {
        Parser {
            lx: Lexer::new(src),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<&Token, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lx.next()?);
        }
        Ok(self.peeked.as_ref().expect("just filled"))
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        match self.peeked.take() {
            Some(t) => Ok(t),
            None => self.lx.next(),
        }
    }

    fn consume_if(&mut self, t: &Token) -> Result<bool, ParseError> {
        if self.peek()? == t {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn ensure(&mut self, t: Token) -> Result<(), ParseError> {
        let got = self.next()?;
        if got != t {
            return Err(self
                .lx
                .err(format!("expected {}, got {}", t.describe(), got.describe())));
        }
        Ok(())
    }

    fn parse_type(&mut self, optional: bool) -> Result<Type, ParseError> {
        if let Token::IntTy(w) = *self.peek()? {
            self.next()?;
            return Ok(Type::int(w));
        }
        if optional {
            return Ok(Type::symbolic());
        }
        let got = self.peek()?.describe();
        Err(self.lx.err(format!("expected a type, got {}", got)))
    }

    fn parse_operand(
        &mut self,
        f: &mut Function,
        idents: &mut HashMap<String, ValueId>,
        ty: &Type,
    ) -> Result<ValueId, ParseError> {
        match self.next()? {
            Token::Num(n) => Ok(f.add_constant(ty.clone(), n)),
            Token::Undef => Ok(f.add_undef(ty.clone())),
            Token::Ident(name) => {
                if let Some(&id) = idents.get(&name) {
                    return Ok(id);
                }
                let id = f.add_input(ty.clone(), name.clone());
                idents.insert(name, id);
                Ok(id)
            }
            got => Err(self
                .lx
                .err(format!("expected an operand, got {}", got.describe()))),
        }
    }

    fn parse_flags(&mut self, op: BinOpKind) -> Result<BinOpFlags, ParseError> {
        let mut flags = BinOpFlags::NONE;
        if op.takes_wrap_flags() {
            loop {
                if self.consume_if(&Token::Nsw)? {
                    flags.nsw = true;
                } else if self.consume_if(&Token::Nuw)? {
                    flags.nuw = true;
                } else {
                    break;
                }
            }
        } else if self.consume_if(&Token::Exact)? {
            flags.exact = true;
        }
        Ok(flags)
    }

    fn parse_fn(&mut self, f: &mut Function) -> Result<(), ParseError> {
        let mut idents: HashMap<String, ValueId> = HashMap::new();
        loop {
            match self.peek()? {
                Token::Ident(_) => {
                    let name = match self.next()? {
                        Token::Ident(n) => n,
                        _ => unreachable!(),
                    };
                    self.ensure(Token::Equals)?;
                    let op = match self.next()? {
                        Token::Op(op) => op,
                        got => {
                            return Err(self.lx.err(format!(
                                "expected an instruction, got {}",
                                got.describe()
                            )))
                        }
                    };
                    let flags = self.parse_flags(op)?;
                    let ty = self.parse_type(true)?;
                    let lhs = self.parse_operand(f, &mut idents, &ty)?;
                    self.ensure(Token::Comma)?;
                    let rhs = self.parse_operand(f, &mut idents, &ty)?;
                    let id = f.push_instr(
                        ty,
                        &name,
                        Instr::BinOp {
                            op,
                            flags,
                            lhs,
                            rhs,
                        },
                    );
                    idents.insert(name, id);
                }
                Token::Ret => {
                    self.next()?;
                    let ty = self.parse_type(true)?;
                    let val = self.parse_operand(f, &mut idents, &ty)?;
                    f.push_instr(ty, "", Instr::Return { val });
                }
                Token::Unreachable => {
                    self.next()?;
                    f.push_instr(Type::Void, "", Instr::Unreachable);
                }
                _ => return Ok(()),
            }
        }
    }
}

/// Parse a buffer of transformations.
pub fn parse(buf: &str) -> Result<Vec<Transform>, ParseError> {
    let mut p = Parser::new(buf);
    let mut out = Vec::new();
    while *p.peek()? != Token::Eof {
        let mut t = Transform::new("", Function::new("src"), Function::new("tgt"));
        if matches!(p.peek()?, Token::Name(_)) {
            if let Token::Name(n) = p.next()? {
                t.name = n;
            }
        }
        if matches!(p.peek()?, Token::Pre(_)) {
            if let Token::Pre(text) = p.next()? {
                t.precondition = Some(text);
            }
        }
        p.parse_fn(&mut t.src)?;
        p.ensure(Token::Arrow)?;
        p.parse_fn(&mut t.tgt)?;
        out.push(t);
    }
    Ok(out)
}
