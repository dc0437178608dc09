//! Reader for the textual IR dump format.
//!
//! The format is line-oriented: one declaration or instruction per line,
//! `#` starts a comment, blank lines are ignored.  `Display` on
//! [`Program`] emits exactly this format, so `parse(render(p))` gives
//! back a structurally equal program.
//!
//! Operand classification is contextual: a name declared by a `string`
//! line is a [`AddrKind::StringRef`], a name listed under `temps:` is a
//! [`AddrKind::Temp`], a parameter or `locals:` name is a
//! [`AddrKind::Local`], and anything else is a [`AddrKind::Global`].

use super::{Addr, AddrKind, BinOp, Function, Instr, Program, StringLit, Width};
use logos::Logos;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
enum Token {
    // --- Keywords ---
    #[token("string")]
    String,
    #[token("fun")]
    Fun,
    #[token("locals")]
    Locals,
    #[token("temps")]
    Temps,
    #[token("end")]
    End,
    #[token("goto")]
    Goto,
    #[token("if")]
    If,
    #[token("iffalse")]
    IfFalse,
    #[token("param")]
    Param,
    #[token("call")]
    Call,
    #[token("ret")]
    Ret,
    #[token("new")]
    New,
    #[token("byte")]
    Byte,

    // --- Identifiers and literals ---
    // `$` prefixes temporaries, `.` occurs in generated labels.
    #[regex(r"[$.A-Za-z_][$.A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse().ok())]
    Number(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| lex.slice().to_string())]
    Str(String),

    // --- Operators ---
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("!")]
    Bang,

    // --- Punctuation ---
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
}

impl Token {
    /// The binary operator this token denotes, if any.
    fn binop(&self) -> Option<BinOp> {
        match self {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::EqEq => Some(BinOp::Eq),
            Token::Neq => Some(BinOp::Ne),
            Token::Lt => Some(BinOp::Lt),
            Token::Gt => Some(BinOp::Gt),
            Token::Le => Some(BinOp::Le),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s}"),
            other => {
                let text = match other {
                    Token::String => "string",
                    Token::Fun => "fun",
                    Token::Locals => "locals",
                    Token::Temps => "temps",
                    Token::End => "end",
                    Token::Goto => "goto",
                    Token::If => "if",
                    Token::IfFalse => "iffalse",
                    Token::Param => "param",
                    Token::Call => "call",
                    Token::Ret => "ret",
                    Token::New => "new",
                    Token::Byte => "byte",
                    Token::EqEq => "==",
                    Token::Neq => "!=",
                    Token::Le => "<=",
                    Token::Ge => ">=",
                    Token::Lt => "<",
                    Token::Gt => ">",
                    Token::Assign => "=",
                    Token::Plus => "+",
                    Token::Minus => "-",
                    Token::Star => "*",
                    Token::Slash => "/",
                    Token::Bang => "!",
                    Token::Colon => ":",
                    Token::LParen => "(",
                    Token::RParen => ")",
                    Token::LBracket => "[",
                    Token::RBracket => "]",
                    Token::Comma => ",",
                    _ => unreachable!(),
                };
                write!(f, "{text}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("line {line}: unrecognized input `{text}`")]
    Lex { line: usize, text: String },

    #[error("line {line}: unexpected `{found}`, expected {expected}")]
    Unexpected {
        line: usize,
        found: String,
        expected: &'static str,
    },

    #[error("line {line}: unexpected end of line, expected {expected}")]
    LineEnd { line: usize, expected: &'static str },

    #[error("line {line}: instruction outside a function")]
    OutsideFunction { line: usize },

    #[error("function `{func}` is missing its `end` line")]
    UnterminatedFunction { func: String },
}

/// Parse a textual IR dump into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ReadError> {
    let mut program = Program::default();
    let mut strings: HashSet<String> = HashSet::new();
    let mut current: Option<FnCtx> = None;

    for (idx, text) in source.lines().enumerate() {
        let line = idx + 1;
        let mut toks = lex_line(text, line)?;
        if toks.done() {
            continue;
        }

        match toks.peek() {
            Some(Token::String) => {
                toks.next();
                let label = toks.ident("string label")?;
                let raw = toks.string_lit()?;
                toks.finish()?;
                strings.insert(label.clone());
                program.strings.push(StringLit {
                    label,
                    text: unescape(&raw),
                });
            }
            Some(Token::Fun) => {
                if let Some(ctx) = current {
                    return Err(ReadError::UnterminatedFunction { func: ctx.name });
                }
                toks.next();
                let name = toks.ident("function name")?;
                toks.expect(Token::LParen, "`(`")?;
                let params = toks.name_list(Token::RParen)?;
                toks.expect(Token::Colon, "`:`")?;
                toks.finish()?;
                current = Some(FnCtx::new(name, params));
            }
            Some(Token::Locals) => {
                let ctx = current
                    .as_mut()
                    .ok_or(ReadError::OutsideFunction { line })?;
                toks.next();
                toks.expect(Token::Colon, "`:`")?;
                let names = toks.rest_of_names()?;
                ctx.frame_names.extend(names.iter().cloned());
                ctx.locals.extend(names);
            }
            Some(Token::Temps) => {
                let ctx = current
                    .as_mut()
                    .ok_or(ReadError::OutsideFunction { line })?;
                toks.next();
                toks.expect(Token::Colon, "`:`")?;
                let names = toks.rest_of_names()?;
                ctx.temp_names.extend(names.iter().cloned());
                ctx.temps.extend(names);
            }
            Some(Token::End) => {
                toks.next();
                toks.finish()?;
                let ctx = current
                    .take()
                    .ok_or(ReadError::OutsideFunction { line })?;
                program.functions.push(ctx.into_function());
            }
            _ => {
                let ctx = current
                    .as_mut()
                    .ok_or(ReadError::OutsideFunction { line })?;
                let instr = parse_instr(&mut toks, ctx, &strings)?;
                ctx.code.push(instr);
            }
        }
    }

    if let Some(ctx) = current {
        return Err(ReadError::UnterminatedFunction { func: ctx.name });
    }
    Ok(program)
}

// ============================================================================
// Per-line parsing
// ============================================================================

/// Accumulated context for the function currently being read.
struct FnCtx {
    name: String,
    params: Vec<String>,
    locals: Vec<String>,
    temps: Vec<String>,
    /// Params plus locals, for operand classification.
    frame_names: HashSet<String>,
    temp_names: HashSet<String>,
    code: Vec<Instr>,
}

impl FnCtx {
    fn new(name: String, params: Vec<String>) -> Self {
        let frame_names = params.iter().cloned().collect();
        FnCtx {
            name,
            params,
            locals: Vec::new(),
            temps: Vec::new(),
            frame_names,
            temp_names: HashSet::new(),
            code: Vec::new(),
        }
    }

    fn into_function(self) -> Function {
        Function {
            name: self.name,
            params: self.params,
            locals: self.locals,
            temps: self.temps,
            code: self.code,
        }
    }

    /// Classify a bare name in this function's scope.
    fn classify(&self, name: String, strings: &HashSet<String>) -> Addr {
        if strings.contains(&name) {
            Addr::string_ref(name)
        } else if self.temp_names.contains(&name) {
            Addr::temp(name)
        } else if self.frame_names.contains(&name) {
            Addr::local(name)
        } else {
            Addr::global(name)
        }
    }
}

fn parse_instr(
    toks: &mut Line,
    ctx: &FnCtx,
    strings: &HashSet<String>,
) -> Result<Instr, ReadError> {
    let instr = match toks.peek() {
        Some(Token::Goto) => {
            toks.next();
            Instr::Goto(toks.ident("jump target")?)
        }
        Some(Token::If) => {
            toks.next();
            let cond = toks.operand(ctx, strings)?;
            toks.expect(Token::Goto, "`goto`")?;
            Instr::If {
                cond,
                target: toks.ident("jump target")?,
            }
        }
        Some(Token::IfFalse) => {
            toks.next();
            let cond = toks.operand(ctx, strings)?;
            toks.expect(Token::Goto, "`goto`")?;
            Instr::IfFalse {
                cond,
                target: toks.ident("jump target")?,
            }
        }
        Some(Token::Param) => {
            toks.next();
            Instr::Param {
                value: toks.operand(ctx, strings)?,
            }
        }
        Some(Token::Call) => {
            toks.next();
            Instr::Call {
                dst: None,
                func: Addr::label_ref(toks.ident("callee name")?),
            }
        }
        Some(Token::Ret) => {
            toks.next();
            if toks.done() {
                Instr::Ret
            } else {
                Instr::RetVal {
                    value: toks.operand(ctx, strings)?,
                }
            }
        }
        Some(Token::Ident(_)) => {
            let name = toks.ident("name")?;
            match toks.peek() {
                // `L0:`
                Some(Token::Colon) => {
                    toks.next();
                    Instr::Label(name)
                }
                // `x[y] = z`
                Some(Token::LBracket) => {
                    toks.next();
                    let base = ctx.classify(name, strings);
                    let index = toks.operand(ctx, strings)?;
                    toks.expect(Token::RBracket, "`]`")?;
                    toks.expect(Token::Assign, "`=`")?;
                    let width = toks.opt_byte();
                    Instr::IdxSet {
                        width,
                        base,
                        index,
                        src: toks.operand(ctx, strings)?,
                    }
                }
                // `x = ...`
                Some(Token::Assign) => {
                    toks.next();
                    let dst = ctx.classify(name, strings);
                    parse_assignment(toks, ctx, strings, dst)?
                }
                _ => return Err(toks.unexpected("`:`, `[`, or `=`")),
            }
        }
        _ => return Err(toks.unexpected("an instruction")),
    };
    toks.finish()?;
    Ok(instr)
}

/// Parse the right-hand side of `<dst> = ...`.
fn parse_assignment(
    toks: &mut Line,
    ctx: &FnCtx,
    strings: &HashSet<String>,
    dst: Addr,
) -> Result<Instr, ReadError> {
    match toks.peek() {
        Some(Token::Call) => {
            toks.next();
            Ok(Instr::Call {
                dst: Some(dst),
                func: Addr::label_ref(toks.ident("callee name")?),
            })
        }
        Some(Token::New) => {
            toks.next();
            let width = toks.opt_byte();
            Ok(Instr::New {
                width,
                dst,
                len: toks.operand(ctx, strings)?,
            })
        }
        Some(Token::Minus) => {
            toks.next();
            Ok(Instr::Neg {
                dst,
                src: toks.operand(ctx, strings)?,
            })
        }
        Some(Token::Bang) => {
            toks.next();
            Ok(Instr::Not {
                dst,
                src: toks.operand(ctx, strings)?,
            })
        }
        // `x = byte y` / `x = byte y[z]`
        Some(Token::Byte) => {
            toks.next();
            let src = toks.operand(ctx, strings)?;
            if toks.peek() == Some(&Token::LBracket) {
                toks.next();
                let index = toks.operand(ctx, strings)?;
                toks.expect(Token::RBracket, "`]`")?;
                Ok(Instr::SetIdx {
                    width: Width::Byte,
                    dst,
                    base: src,
                    index,
                })
            } else {
                Ok(Instr::Set {
                    width: Width::Byte,
                    dst,
                    src,
                })
            }
        }
        _ => {
            let first = toks.operand(ctx, strings)?;
            match toks.peek() {
                None => Ok(Instr::Set {
                    width: Width::Word,
                    dst,
                    src: first,
                }),
                Some(Token::LBracket) => {
                    toks.next();
                    let index = toks.operand(ctx, strings)?;
                    toks.expect(Token::RBracket, "`]`")?;
                    Ok(Instr::SetIdx {
                        width: Width::Word,
                        dst,
                        base: first,
                        index,
                    })
                }
                Some(tok) => match tok.binop() {
                    Some(op) => {
                        toks.next();
                        Ok(Instr::Binary {
                            op,
                            dst,
                            left: first,
                            right: toks.operand(ctx, strings)?,
                        })
                    }
                    None => Err(toks.unexpected("an operator, `[`, or end of line")),
                },
            }
        }
    }
}

// ============================================================================
// Token stream over one line
// ============================================================================

struct Line {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

fn lex_line(text: &str, line: usize) -> Result<Line, ReadError> {
    let mut tokens = Vec::new();
    for (result, span) in Token::lexer(text).spanned() {
        match result {
            Ok(tok) => tokens.push(tok),
            Err(()) => {
                return Err(ReadError::Lex {
                    line,
                    text: text[span].to_string(),
                })
            }
        }
    }
    Ok(Line {
        tokens,
        pos: 0,
        line,
    })
}

impl Line {
    fn done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &'static str) -> ReadError {
        match self.peek() {
            Some(tok) => ReadError::Unexpected {
                line: self.line,
                found: tok.to_string(),
                expected,
            },
            None => ReadError::LineEnd {
                line: self.line,
                expected,
            },
        }
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<(), ReadError> {
        if self.peek() == Some(&want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<String, ReadError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn string_lit(&mut self) -> Result<String, ReadError> {
        match self.peek().cloned() {
            // Strip the surrounding quotes.
            Some(Token::Str(raw)) => {
                self.pos += 1;
                Ok(raw[1..raw.len() - 1].to_string())
            }
            _ => Err(self.unexpected("a string literal")),
        }
    }

    /// An operand: an integer literal or a name classified in scope.
    fn operand(&mut self, ctx: &FnCtx, strings: &HashSet<String>) -> Result<Addr, ReadError> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Addr::new(AddrKind::Number(n)))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(ctx.classify(name, strings))
            }
            _ => Err(self.unexpected("an operand")),
        }
    }

    /// Consume `byte` if present.
    fn opt_byte(&mut self) -> Width {
        if self.peek() == Some(&Token::Byte) {
            self.pos += 1;
            Width::Byte
        } else {
            Width::Word
        }
    }

    /// Comma-separated names up to (and including) `close`; may be empty.
    fn name_list(&mut self, close: Token) -> Result<Vec<String>, ReadError> {
        let mut names = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(names);
        }
        loop {
            names.push(self.ident("a name")?);
            match self.next() {
                Some(tok) if tok == close => return Ok(names),
                Some(Token::Comma) => continue,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected("`,` or a closing delimiter"));
                }
            }
        }
    }

    /// Comma-separated names to the end of the line; must be non-empty.
    fn rest_of_names(&mut self) -> Result<Vec<String>, ReadError> {
        let mut names = vec![self.ident("a name")?];
        while !self.done() {
            self.expect(Token::Comma, "`,`")?;
            names.push(self.ident("a name")?);
        }
        Ok(names)
    }

    /// Require that the whole line has been consumed.
    fn finish(&mut self) -> Result<(), ReadError> {
        if self.done() {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }
}

/// Undo the escaping applied by [`super::escape`].
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
