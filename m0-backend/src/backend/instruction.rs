//! Typed x86-32 machine instructions and assembly output items.
//!
//! This module defines source operands (`Src`), memory homes (`Home`),
//! condition codes (`Cond`), the typed instruction set (`MachInstr`), and
//! the structured output type (`AsmItem`) used throughout the backend.
//! Everything lowers to AT&T syntax via `Display`.

use super::abi::Register;
use crate::ir::Width;
use std::fmt;

// ============================================================================
// Operands
// ============================================================================

/// A read operand: register, immediate, or symbol address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Src {
    Reg(Register),
    Imm(i64),
    /// `$label` — the address of a data-section symbol.
    Label(String),
}

impl fmt::Display for Src {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Src::Reg(r) => write!(f, "{r}"),
            Src::Imm(n) => write!(f, "${n}"),
            Src::Label(l) => write!(f, "${l}"),
        }
    }
}

/// A variable's home location in memory: a frame slot or a global cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Home {
    /// `disp(%ebp)` — negative for locals/temps, positive for parameters.
    Frame(i32),
    /// A labelled cell in the data section.
    Global(String),
}

impl fmt::Display for Home {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Home::Frame(disp) => write!(f, "{disp}(%ebp)"),
            Home::Global(name) => write!(f, "{name}"),
        }
    }
}

// ============================================================================
// Condition codes
// ============================================================================

/// Condition code for conditional jumps (signed comparisons).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Cond {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "je",
            Cond::Ne => "jne",
            Cond::Lt => "jl",
            Cond::Gt => "jg",
            Cond::Le => "jle",
            Cond::Ge => "jge",
        }
    }
}

// ============================================================================
// ALU operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Imul,
    Xor,
}

impl AluOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "addl",
            AluOp::Sub => "subl",
            AluOp::Imul => "imull",
            AluOp::Xor => "xorl",
        }
    }
}

// ============================================================================
// Typed machine instruction
// ============================================================================

/// A typed x86-32 instruction.
///
/// The indexed forms carry the IR access width: word accesses use scale 4
/// and plain `movl`; byte accesses use scale 1 with `movzbl`/`movb`.
#[derive(Debug, Clone, PartialEq)]
pub enum MachInstr {
    /// `movl src, dst`
    Mov { src: Src, dst: Register },
    /// `movl home, dst` — load a variable from its home location.
    Load { home: Home, dst: Register },
    /// `movl src, home` — store to a variable's home location.
    Store { src: Src, home: Home },
    /// `op src, dst`
    Alu {
        op: AluOp,
        src: Src,
        dst: Register,
    },
    /// `negl reg`
    Neg { reg: Register },
    /// `cmpl right, left` — sets flags of `left - right`.
    Cmp { left: Register, right: Src },
    /// `cdq` — sign-extend `%eax` into `%edx:%eax`.
    Cdq,
    /// `idivl reg` — quotient in `%eax`, remainder in `%edx`.
    Idiv { reg: Register },
    /// Indexed load: `movl (base,index,4), dst` or `movzbl (base,index,1), dst`.
    IdxLoad {
        width: Width,
        base: Register,
        index: Register,
        dst: Register,
    },
    /// Indexed store: `movl src, (base,index,4)` or `movb src, (base,index,1)`.
    /// Byte stores with a register source must use a byte-capable register.
    IdxStore {
        width: Width,
        src: Src,
        base: Register,
        index: Register,
    },
    /// `pushl src`
    Push { src: Src },
    /// `call func`
    Call { func: String },
    /// `addl $bytes, %esp` — pop call arguments.
    AddEsp { bytes: i64 },
    /// `jmp target`
    Jmp { target: String },
    /// `jCC target`
    JmpCond { cond: Cond, target: String },
    /// `pushl %ebp`
    PushEbp,
    /// `movl %esp, %ebp`
    SetupFrame,
    /// `subl $bytes, %esp`
    AllocFrame { bytes: u32 },
    /// `leave`
    Leave,
    /// `ret`
    Ret,
}

impl MachInstr {
    /// Idiomatic register move, skipping no-op moves at construction sites.
    pub fn mov(src: Register, dst: Register) -> Self {
        MachInstr::Mov {
            src: Src::Reg(src),
            dst,
        }
    }
}

impl fmt::Display for MachInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachInstr::Mov { src, dst } => write!(f, "  movl {src}, {dst}"),
            MachInstr::Load { home, dst } => write!(f, "  movl {home}, {dst}"),
            MachInstr::Store { src, home } => write!(f, "  movl {src}, {home}"),
            MachInstr::Alu { op, src, dst } => write!(f, "  {} {src}, {dst}", op.mnemonic()),
            MachInstr::Neg { reg } => write!(f, "  negl {reg}"),
            MachInstr::Cmp { left, right } => write!(f, "  cmpl {right}, {left}"),
            MachInstr::Cdq => write!(f, "  cdq"),
            MachInstr::Idiv { reg } => write!(f, "  idivl {reg}"),
            MachInstr::IdxLoad {
                width,
                base,
                index,
                dst,
            } => match width {
                Width::Word => write!(f, "  movl ({base},{index},4), {dst}"),
                Width::Byte => write!(f, "  movzbl ({base},{index},1), {dst}"),
            },
            MachInstr::IdxStore {
                width,
                src,
                base,
                index,
            } => match (width, src) {
                (Width::Word, src) => write!(f, "  movl {src}, ({base},{index},4)"),
                (Width::Byte, Src::Reg(r)) => {
                    write!(f, "  movb {}, ({base},{index},1)", r.byte_name())
                }
                (Width::Byte, src) => write!(f, "  movb {src}, ({base},{index},1)"),
            },
            MachInstr::Push { src } => write!(f, "  pushl {src}"),
            MachInstr::Call { func } => write!(f, "  call {func}"),
            MachInstr::AddEsp { bytes } => write!(f, "  addl ${bytes}, %esp"),
            MachInstr::Jmp { target } => write!(f, "  jmp {target}"),
            MachInstr::JmpCond { cond, target } => {
                write!(f, "  {} {target}", cond.mnemonic())
            }
            MachInstr::PushEbp => write!(f, "  pushl %ebp"),
            MachInstr::SetupFrame => write!(f, "  movl %esp, %ebp"),
            MachInstr::AllocFrame { bytes } => write!(f, "  subl ${bytes}, %esp"),
            MachInstr::Leave => write!(f, "  leave"),
            MachInstr::Ret => write!(f, "  ret"),
        }
    }
}

// ============================================================================
// Annotated instruction (regalloc output)
// ============================================================================

/// An instruction paired with an optional assembly comment.
/// Used as the output type for register allocator operations.
pub type AnnotatedInstr = (MachInstr, Option<String>);

/// Push an instruction with a comment.
#[inline]
pub(crate) fn emit_c(out: &mut Vec<AnnotatedInstr>, instr: MachInstr, comment: impl Into<String>) {
    out.push((instr, Some(comment.into())));
}

// ============================================================================
// AsmItem — top-level assembly output element
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Data,
    Text,
}

/// A structured assembly output element, flattened to text at the end.
#[derive(Debug, Clone)]
pub enum AsmItem {
    /// A label on its own line.
    Label(String),
    /// A typed machine instruction with an optional comment.
    Instr {
        instr: MachInstr,
        comment: Option<String>,
    },
    /// `.globl name`
    Globl(String),
    /// `.data` / `.text`
    Section(Section),
    /// `label: .asciz "text"` — a NUL-terminated string literal.
    Asciz { label: String, text: String },
    /// `.comm name,size` — a zero-initialized global cell.
    Comm { name: String, size: u32 },
    /// Empty line separator.
    Blank,
}
