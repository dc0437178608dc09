// A linear three-address IR with labels, gotos, and simple assignments.
//
// The IR is the sole input artifact to the backend.  It is produced by an
// external lowering pass (or by the textual reader in [`reader`]) and is
// never structurally mutated by the backend; only the `next_use` / `live_out`
// annotations on operands are written during liveness analysis.

pub mod reader;

use std::fmt;

// ============================================================================
// Operands
// ============================================================================

/// Operand kind.  Variables are `Temp`, `Local`, and `Global`; everything
/// else is a constant or a symbolic reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrKind {
    /// Integer literal.
    Number(i64),
    /// Reference to a string literal by its data-section label.
    StringRef(String),
    /// Compiler-generated temporary (by convention `$`-prefixed).
    Temp(String),
    /// Function-scoped variable (parameter or local).
    Local(String),
    /// Module-level variable, addressed by name.
    Global(String),
    /// Reference to a code label (callee names).
    LabelRef(String),
}

/// A tagged operand with its liveness annotations.
///
/// `next_use` is the distance in instructions to the next read of this
/// variable within the same basic block (`None` if there is none);
/// `live_out` marks variables that must be assumed live past the block.
/// Both are written by the liveness pass and are meaningless for
/// non-variable kinds.
#[derive(Debug, Clone)]
pub struct Addr {
    pub kind: AddrKind,
    pub next_use: Option<u32>,
    pub live_out: bool,
}

impl Addr {
    pub fn new(kind: AddrKind) -> Self {
        Addr {
            kind,
            next_use: None,
            live_out: false,
        }
    }

    pub fn number(n: i64) -> Self {
        Addr::new(AddrKind::Number(n))
    }

    pub fn string_ref(label: impl Into<String>) -> Self {
        Addr::new(AddrKind::StringRef(label.into()))
    }

    pub fn temp(name: impl Into<String>) -> Self {
        Addr::new(AddrKind::Temp(name.into()))
    }

    pub fn local(name: impl Into<String>) -> Self {
        Addr::new(AddrKind::Local(name.into()))
    }

    pub fn global(name: impl Into<String>) -> Self {
        Addr::new(AddrKind::Global(name.into()))
    }

    pub fn label_ref(name: impl Into<String>) -> Self {
        Addr::new(AddrKind::LabelRef(name.into()))
    }

    /// The variable name, if this operand is a variable.
    pub fn var_name(&self) -> Option<&str> {
        match &self.kind {
            AddrKind::Temp(n) | AddrKind::Local(n) | AddrKind::Global(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_var(&self) -> bool {
        self.var_name().is_some()
    }

    pub fn is_temp(&self) -> bool {
        matches!(self.kind, AddrKind::Temp(_))
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, AddrKind::Global(_))
    }
}

// Operands compare by name for variables and by value for constants;
// annotations do not participate.
impl PartialEq for Addr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Addr {}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AddrKind::Number(n) => write!(f, "{n}"),
            AddrKind::StringRef(s)
            | AddrKind::Temp(s)
            | AddrKind::Local(s)
            | AddrKind::Global(s)
            | AddrKind::LabelRef(s) => write!(f, "{s}"),
        }
    }
}

// ============================================================================
// Opcodes
// ============================================================================

/// Access width for moves, allocations, and indexed accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Word,
    Byte,
}

impl Width {
    /// Element size in bytes for indexed addressing.
    pub fn scale(self) -> u8 {
        match self {
            Width::Word => 4,
            Width::Byte => 1,
        }
    }
}

/// Binary operator: arithmetic or comparison (comparisons materialize 0/1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// A three-address instruction: one opcode, up to three operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `<label>:`
    Label(String),
    /// `goto <target>`
    Goto(String),
    /// `if <cond> goto <target>`
    If { cond: Addr, target: String },
    /// `iffalse <cond> goto <target>`
    IfFalse { cond: Addr, target: String },
    /// `dst = src` (`dst = byte src`)
    Set { width: Width, dst: Addr, src: Addr },
    /// `dst = -src`
    Neg { dst: Addr, src: Addr },
    /// `dst = !src`
    Not { dst: Addr, src: Addr },
    /// `dst = new len` (`dst = new byte len`) — heap allocation of
    /// `len` elements of the given width.
    New { width: Width, dst: Addr, len: Addr },
    /// `dst = left <op> right`
    Binary {
        op: BinOp,
        dst: Addr,
        left: Addr,
        right: Addr,
    },
    /// `dst = base[index]` (`dst = byte base[index]`)
    SetIdx {
        width: Width,
        dst: Addr,
        base: Addr,
        index: Addr,
    },
    /// `base[index] = src` (`base[index] = byte src`)
    IdxSet {
        width: Width,
        base: Addr,
        index: Addr,
        src: Addr,
    },
    /// `param value` — push an argument for an upcoming call.
    Param { value: Addr },
    /// `dst = call func` / `call func`.  `func` must be a `LabelRef`.
    Call { dst: Option<Addr>, func: Addr },
    /// `ret`
    Ret,
    /// `ret value`
    RetVal { value: Addr },
}

impl Instr {
    /// The operand defined (written) by this instruction, if any.
    pub fn def(&self) -> Option<&Addr> {
        match self {
            Instr::Set { dst, .. }
            | Instr::Neg { dst, .. }
            | Instr::Not { dst, .. }
            | Instr::New { dst, .. }
            | Instr::Binary { dst, .. }
            | Instr::SetIdx { dst, .. } => Some(dst),
            Instr::Call { dst: Some(d), .. } => Some(d),
            _ => None,
        }
    }

    /// Mutable access to the defined operand, if any.
    pub fn def_mut(&mut self) -> Option<&mut Addr> {
        match self {
            Instr::Set { dst, .. }
            | Instr::Neg { dst, .. }
            | Instr::Not { dst, .. }
            | Instr::New { dst, .. }
            | Instr::Binary { dst, .. }
            | Instr::SetIdx { dst, .. } => Some(dst),
            Instr::Call { dst: Some(d), .. } => Some(d),
            _ => None,
        }
    }

    /// The operands read by this instruction.
    pub fn uses_mut(&mut self) -> Vec<&mut Addr> {
        match self {
            Instr::If { cond, .. } | Instr::IfFalse { cond, .. } => vec![cond],
            Instr::Set { src, .. } | Instr::Neg { src, .. } | Instr::Not { src, .. } => vec![src],
            Instr::New { len, .. } => vec![len],
            Instr::Binary { left, right, .. } => vec![left, right],
            Instr::SetIdx { base, index, .. } => vec![base, index],
            Instr::IdxSet {
                base, index, src, ..
            } => vec![base, index, src],
            Instr::Param { value } | Instr::RetVal { value } => vec![value],
            _ => Vec::new(),
        }
    }

    /// Visit every operand (defs and uses) immutably.
    pub fn for_each_addr(&self, mut f: impl FnMut(&Addr)) {
        match self {
            Instr::If { cond, .. } | Instr::IfFalse { cond, .. } => f(cond),
            Instr::Set { dst, src, .. }
            | Instr::Neg { dst, src }
            | Instr::Not { dst, src } => {
                f(dst);
                f(src);
            }
            Instr::New { dst, len, .. } => {
                f(dst);
                f(len);
            }
            Instr::Binary {
                dst, left, right, ..
            } => {
                f(dst);
                f(left);
                f(right);
            }
            Instr::SetIdx {
                dst, base, index, ..
            } => {
                f(dst);
                f(base);
                f(index);
            }
            Instr::IdxSet {
                base, index, src, ..
            } => {
                f(base);
                f(index);
                f(src);
            }
            Instr::Param { value } | Instr::RetVal { value } => f(value),
            Instr::Call { dst, func } => {
                if let Some(d) = dst {
                    f(d);
                }
                f(func);
            }
            Instr::Label(_) | Instr::Goto(_) | Instr::Ret => {}
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let byte = |w: &Width| if *w == Width::Byte { "byte " } else { "" };
        match self {
            Instr::Label(l) => write!(f, "{l}:"),
            Instr::Goto(t) => write!(f, "  goto {t}"),
            Instr::If { cond, target } => write!(f, "  if {cond} goto {target}"),
            Instr::IfFalse { cond, target } => write!(f, "  iffalse {cond} goto {target}"),
            Instr::Set { width, dst, src } => write!(f, "  {dst} = {}{src}", byte(width)),
            Instr::Neg { dst, src } => write!(f, "  {dst} = -{src}"),
            Instr::Not { dst, src } => write!(f, "  {dst} = !{src}"),
            Instr::New { width, dst, len } => write!(f, "  {dst} = new {}{len}", byte(width)),
            Instr::Binary {
                op,
                dst,
                left,
                right,
            } => write!(f, "  {dst} = {left} {op} {right}"),
            Instr::SetIdx {
                width,
                dst,
                base,
                index,
            } => write!(f, "  {dst} = {}{base}[{index}]", byte(width)),
            Instr::IdxSet {
                width,
                base,
                index,
                src,
            } => write!(f, "  {base}[{index}] = {}{src}", byte(width)),
            Instr::Param { value } => write!(f, "  param {value}"),
            Instr::Call { dst: Some(d), func } => write!(f, "  {d} = call {func}"),
            Instr::Call { dst: None, func } => write!(f, "  call {func}"),
            Instr::Ret => write!(f, "  ret"),
            Instr::RetVal { value } => write!(f, "  ret {value}"),
        }
    }
}

// ============================================================================
// Program structure
// ============================================================================

/// A string-literal definition for the data section.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLit {
    pub label: String,
    /// Unescaped text (actual bytes, without the trailing NUL).
    pub text: String,
}

/// One function: its frame names plus the owned instruction list.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Parameter names in declaration order (pushed last-to-first by callers).
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub temps: Vec<String>,
    pub code: Vec<Instr>,
}

/// A whole IR program: string literals plus functions, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub strings: Vec<StringLit>,
    pub functions: Vec<Function>,
}

/// Escape string-literal text for the textual dump and for `.asciz`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.strings {
            writeln!(f, "string {} \"{}\"", s.label, escape(&s.text))?;
        }
        if !self.strings.is_empty() {
            writeln!(f)?;
        }
        for func in &self.functions {
            writeln!(f, "fun {}({}):", func.name, func.params.join(", "))?;
            if !func.locals.is_empty() {
                writeln!(f, "  locals: {}", func.locals.join(", "))?;
            }
            if !func.temps.is_empty() {
                writeln!(f, "  temps: {}", func.temps.join(", "))?;
            }
            for ins in &func.code {
                writeln!(f, "{ins}")?;
            }
            writeln!(f, "end")?;
        }
        Ok(())
    }
}
