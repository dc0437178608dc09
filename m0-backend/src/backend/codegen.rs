//! Code generation driver and per-opcode emission.
//!
//! [`Codegen`] walks a program function by function.  Each function is cut
//! into basic blocks, every block is liveness-annotated and then driven
//! forward through the register allocator, producing one assembly fragment
//! per IR instruction.  Descriptors are flushed and cleared at every block
//! boundary, before calls, and before returns.

use super::abi::Register;
use super::block::{self, BasicBlock, InstrClass};
use super::instruction::{AluOp, AnnotatedInstr, AsmItem, Cond, MachInstr, Section, Src};
use super::liveness;
use super::regalloc::{Frame, RegAlloc, SpillPolicy};
use super::CodegenError;
use crate::ir::{escape, Addr, AddrKind, BinOp, Function, Instr, Program, Width};
use std::collections::HashSet;

/// Symbol of the runtime allocation routine backing `new`.
const ALLOC_FN: &str = "__m0_alloc";

// ============================================================================
// Output type
// ============================================================================

/// Final generated assembly.
#[derive(Debug, Clone)]
pub struct Asm {
    pub lines: Vec<String>,
}

impl Asm {
    pub fn join(&self) -> String {
        self.lines.join("\n")
    }
}

// ============================================================================
// Codegen state
// ============================================================================

/// Central code-generation driver.
pub struct Codegen {
    items: Vec<AsmItem>,
    policy: SpillPolicy,
    /// Fresh-label counter for comparison materialization; shared across
    /// all functions of one program, starting at zero.
    label_counter: usize,
    /// Referenced globals, in first-use order (emitted as `.comm` cells).
    globals: Vec<String>,
    globals_seen: HashSet<String>,
    /// Arguments pushed since the last call.
    args_pushed: usize,
}

impl Codegen {
    pub fn new(policy: SpillPolicy) -> Self {
        Codegen {
            items: Vec::new(),
            policy,
            label_counter: 0,
            globals: Vec::new(),
            globals_seen: HashSet::new(),
            args_pushed: 0,
        }
    }

    // ── Item emission helpers ───────────────────────────────────────────

    fn push_asm(&mut self, instr: MachInstr) {
        self.items.push(AsmItem::Instr {
            instr,
            comment: None,
        });
    }

    fn push_commented(&mut self, instr: MachInstr, comment: impl Into<String>) {
        self.items.push(AsmItem::Instr {
            instr,
            comment: Some(comment.into()),
        });
    }

    /// Drain register-allocator-emitted instructions into the output.
    fn drain(&mut self, out: Vec<AnnotatedInstr>) {
        for (instr, comment) in out {
            self.items.push(AsmItem::Instr { instr, comment });
        }
    }

    fn fresh_label(&mut self) -> String {
        let label = format!(".Lc{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    fn note_globals(&mut self, instr: &Instr) {
        let globals = &mut self.globals;
        let seen = &mut self.globals_seen;
        instr.for_each_addr(|a| {
            if let AddrKind::Global(name) = &a.kind {
                if seen.insert(name.clone()) {
                    globals.push(name.clone());
                }
            }
        });
    }

    // ── Program driver ──────────────────────────────────────────────────

    pub fn emit_program(&mut self, program: &mut Program) -> Result<(), CodegenError> {
        self.items.push(AsmItem::Section(Section::Data));
        for s in &program.strings {
            self.items.push(AsmItem::Asciz {
                label: s.label.clone(),
                text: s.text.clone(),
            });
        }
        self.items.push(AsmItem::Blank);
        self.items.push(AsmItem::Section(Section::Text));

        for func in &mut program.functions {
            self.emit_function(func)?;
        }
        Ok(())
    }

    fn emit_function(&mut self, func: &mut Function) -> Result<(), CodegenError> {
        let frame = Frame::build(func)?;
        let frame_size = frame.size;
        let mut alloc = RegAlloc::new(frame, self.policy);

        self.items.push(AsmItem::Blank);
        self.items.push(AsmItem::Globl(func.name.clone()));
        self.items.push(AsmItem::Label(func.name.clone()));
        self.push_asm(MachInstr::PushEbp);
        self.push_asm(MachInstr::SetupFrame);
        if frame_size > 0 {
            self.push_commented(
                MachInstr::AllocFrame { bytes: frame_size },
                format!("frame ({} slots)", frame_size / 4),
            );
        }

        let blks: Vec<BasicBlock> = block::blocks(&func.code).collect();
        for b in &blks {
            liveness::annotate(&mut func.code, b);
            alloc.begin_block();

            for i in b.start..=b.end {
                let instr = &func.code[i];
                self.note_globals(instr);
                self.emit_instr(&mut alloc, instr, &func.name)?;

                // Values with no further use in the block are safe to
                // discard once the instruction has emitted.
                instr.for_each_addr(|a| {
                    if let Some(name) = a.var_name() {
                        if a.next_use.is_none() && !a.live_out {
                            alloc.discard(name);
                        }
                    }
                });
                alloc.clear_pins();
            }

            // Blocks ending in a jump flush inside the jump's own arm;
            // fallthrough blocks flush here.
            if block::classify(&func.code[b.end]) != InstrClass::BlockEnd {
                let mut out = Vec::new();
                alloc.flush_block(&mut out);
                self.drain(out);
            }
        }

        self.items.push(AsmItem::Label(ret_label(&func.name)));
        self.push_asm(MachInstr::Leave);
        self.push_asm(MachInstr::Ret);
        Ok(())
    }

    // ── Per-instruction emission ────────────────────────────────────────

    fn emit_instr(
        &mut self,
        alloc: &mut RegAlloc,
        instr: &Instr,
        func_name: &str,
    ) -> Result<(), CodegenError> {
        // Shape check: a definition target that is not a variable cannot be
        // given a unique descriptor entry; abort the whole compilation.
        if let Some(d) = instr.def() {
            if !d.is_var() {
                return Err(CodegenError::MalformedInstr {
                    func: func_name.to_string(),
                    instr: instr.to_string().trim().to_string(),
                });
            }
        }

        let mut out = Vec::new();
        match instr {
            Instr::Label(name) => {
                self.items.push(AsmItem::Label(name.clone()));
            }

            Instr::Goto(target) => {
                alloc.flush_block(&mut out);
                self.drain(out);
                self.push_asm(MachInstr::Jmp {
                    target: target.clone(),
                });
            }

            Instr::If { cond, target } => {
                self.emit_branch(alloc, cond, target, Cond::Eq);
            }
            Instr::IfFalse { cond, target } => {
                self.emit_branch(alloc, cond, target, Cond::Ne);
            }

            Instr::Set { dst, src, .. } => {
                self.emit_set(alloc, dst, src);
            }

            Instr::Neg { dst, src } => {
                self.emit_unary(alloc, dst, src, |rd| MachInstr::Neg { reg: rd });
            }
            Instr::Not { dst, src } => {
                self.emit_unary(alloc, dst, src, |rd| MachInstr::Alu {
                    op: AluOp::Xor,
                    src: Src::Imm(1),
                    dst: rd,
                });
            }

            Instr::Binary {
                op,
                dst,
                left,
                right,
            } => {
                if op.is_comparison() {
                    self.emit_comparison(alloc, *op, dst, left, right);
                } else {
                    self.emit_arith(alloc, *op, dst, left, right);
                }
            }

            Instr::New { width, dst, len } => {
                let ls = alloc.ensure_src(len, &mut out);
                self.drain(out);
                self.push_asm(MachInstr::Mov {
                    src: ls,
                    dst: Register::RETURN,
                });
                if *width == Width::Word {
                    self.push_commented(
                        MachInstr::Alu {
                            op: AluOp::Imul,
                            src: Src::Imm(4),
                            dst: Register::RETURN,
                        },
                        "element size",
                    );
                }
                let mut out = Vec::new();
                alloc.flush_block(&mut out);
                self.drain(out);
                self.push_asm(MachInstr::Push {
                    src: Src::Reg(Register::RETURN),
                });
                self.push_asm(MachInstr::Call {
                    func: ALLOC_FN.to_string(),
                });
                self.push_asm(MachInstr::AddEsp { bytes: 4 });
                self.bind_result(alloc, dst, format!("{dst} = new"));
            }

            Instr::SetIdx {
                width,
                dst,
                base,
                index,
            } => {
                let rb = alloc.ensure_reg(base, &mut out);
                let ri = alloc.ensure_reg(index, &mut out);
                let rd = self.def_reg(alloc, dst, &mut out);
                self.drain(out);
                self.push_commented(
                    MachInstr::IdxLoad {
                        width: *width,
                        base: rb,
                        index: ri,
                        dst: rd,
                    },
                    format!("{dst} = {base}[{index}]"),
                );
                bind(alloc, dst, rd);
            }

            Instr::IdxSet {
                width,
                base,
                index,
                src,
            } => {
                let rb = alloc.ensure_reg(base, &mut out);
                let ri = alloc.ensure_reg(index, &mut out);
                let mut sv = alloc.ensure_src(src, &mut out);
                self.drain(out);
                // Pool registers lack byte sub-registers; route byte
                // stores through the shuttle.
                if *width == Width::Byte {
                    if let Src::Reg(r) = sv {
                        self.push_asm(MachInstr::mov(r, Register::BYTE_SHUTTLE));
                        sv = Src::Reg(Register::BYTE_SHUTTLE);
                    }
                }
                self.push_commented(
                    MachInstr::IdxStore {
                        width: *width,
                        src: sv,
                        base: rb,
                        index: ri,
                    },
                    format!("{base}[{index}] = {src}"),
                );
            }

            Instr::Param { value } => {
                let src = alloc.ensure_src(value, &mut out);
                self.drain(out);
                self.push_commented(MachInstr::Push { src }, format!("param {value}"));
                self.args_pushed += 1;
            }

            Instr::Call { dst, func } => {
                let callee = match &func.kind {
                    AddrKind::LabelRef(name) => name.clone(),
                    _ => {
                        return Err(CodegenError::MalformedInstr {
                            func: func_name.to_string(),
                            instr: instr.to_string().trim().to_string(),
                        })
                    }
                };
                alloc.flush_block(&mut out);
                self.drain(out);
                self.push_asm(MachInstr::Call { func: callee });
                if self.args_pushed > 0 {
                    self.push_asm(MachInstr::AddEsp {
                        bytes: 4 * self.args_pushed as i64,
                    });
                    self.args_pushed = 0;
                }
                if let Some(d) = dst {
                    self.bind_result(alloc, d, format!("{d} = call result"));
                }
            }

            Instr::Ret => {
                alloc.flush_block(&mut out);
                self.drain(out);
                self.push_asm(MachInstr::Jmp {
                    target: ret_label(func_name),
                });
            }

            Instr::RetVal { value } => {
                let src = alloc.ensure_src(value, &mut out);
                self.drain(out);
                self.push_commented(
                    MachInstr::Mov {
                        src,
                        dst: Register::RETURN,
                    },
                    format!("return {value}"),
                );
                let mut out = Vec::new();
                alloc.flush_block(&mut out);
                self.drain(out);
                self.push_asm(MachInstr::Jmp {
                    target: ret_label(func_name),
                });
            }
        }
        Ok(())
    }

    // ── Emission helpers ────────────────────────────────────────────────

    /// Conditional branch: compare the condition against boolean true and
    /// jump on (not-)equal.  Descriptors flush before the flags are set;
    /// the stores are plain moves and leave the flags alone either way.
    fn emit_branch(
        &mut self,
        alloc: &mut RegAlloc,
        cond: &Addr,
        target: &str,
        cc: Cond,
    ) {
        let mut out = Vec::new();
        let rc = alloc.ensure_reg(cond, &mut out);
        alloc.flush_block(&mut out);
        self.drain(out);
        self.push_commented(
            MachInstr::Cmp {
                left: rc,
                right: Src::Imm(1),
            },
            format!("{cond}?"),
        );
        self.push_asm(MachInstr::JmpCond {
            cond: cc,
            target: target.to_string(),
        });
    }

    /// `dst = src` — move into the destination register when one exists,
    /// otherwise write straight through to the destination's memory home.
    fn emit_set(
        &mut self,
        alloc: &mut RegAlloc,
        dst: &Addr,
        src: &Addr,
    ) {
        let name = var_name(dst);
        let mut out = Vec::new();
        let sv = alloc.ensure_src(src, &mut out);
        self.drain(out);

        if let Some(rd) = alloc.reg_of(name) {
            if sv != Src::Reg(rd) {
                self.push_commented(
                    MachInstr::Mov { src: sv, dst: rd },
                    format!("{dst} = {src}"),
                );
            }
            bind(alloc, dst, rd);
        } else {
            let home = alloc.frame().home_of(name);
            self.push_commented(MachInstr::Store { src: sv, home }, format!("{dst} = {src}"));
            alloc.set_in_memory(name, dst.live_out);
        }
    }

    fn emit_unary(
        &mut self,
        alloc: &mut RegAlloc,
        dst: &Addr,
        src: &Addr,
        op: impl FnOnce(Register) -> MachInstr,
    ) {
        let mut out = Vec::new();
        let sv = alloc.ensure_src(src, &mut out);
        let rd = self.def_reg(alloc, dst, &mut out);
        self.drain(out);
        if sv != Src::Reg(rd) {
            self.push_asm(MachInstr::Mov { src: sv, dst: rd });
        }
        self.push_asm(op(rd));
        bind(alloc, dst, rd);
    }

    /// Binary arithmetic computes in the scratch register, then moves into
    /// the destination, leaving both source descriptors intact.
    fn emit_arith(
        &mut self,
        alloc: &mut RegAlloc,
        op: BinOp,
        dst: &Addr,
        left: &Addr,
        right: &Addr,
    ) {
        let mut out = Vec::new();
        let scratch = Register::RETURN;
        match op {
            BinOp::Div => {
                let ls = alloc.ensure_src(left, &mut out);
                let rr = alloc.ensure_reg(right, &mut out);
                self.drain(out);
                self.push_asm(MachInstr::Mov {
                    src: ls,
                    dst: scratch,
                });
                self.push_asm(MachInstr::Cdq);
                self.push_asm(MachInstr::Idiv { reg: rr });
            }
            _ => {
                let alu = match op {
                    BinOp::Add => AluOp::Add,
                    BinOp::Sub => AluOp::Sub,
                    BinOp::Mul => AluOp::Imul,
                    _ => unreachable!("comparison handled separately"),
                };
                let ls = alloc.ensure_src(left, &mut out);
                let rs = alloc.ensure_src(right, &mut out);
                self.drain(out);
                self.push_asm(MachInstr::Mov {
                    src: ls,
                    dst: scratch,
                });
                self.push_asm(MachInstr::Alu {
                    op: alu,
                    src: rs,
                    dst: scratch,
                });
            }
        }
        let mut out = Vec::new();
        let rd = self.def_reg(alloc, dst, &mut out);
        self.drain(out);
        self.push_commented(
            MachInstr::mov(scratch, rd),
            format!("{dst} = {left} {op} {right}"),
        );
        bind(alloc, dst, rd);
    }

    /// Comparisons materialize a 0/1 boolean via a short branching idiom
    /// with a fresh label.
    fn emit_comparison(
        &mut self,
        alloc: &mut RegAlloc,
        op: BinOp,
        dst: &Addr,
        left: &Addr,
        right: &Addr,
    ) {
        let mut out = Vec::new();
        let rl = alloc.ensure_reg(left, &mut out);
        let rs = alloc.ensure_src(right, &mut out);
        self.drain(out);
        self.push_commented(
            MachInstr::Cmp {
                left: rl,
                right: rs,
            },
            format!("{left} {op} {right}?"),
        );

        // Any spill emitted while picking the destination is a plain move
        // and preserves the flags.
        let mut out = Vec::new();
        let rd = self.def_reg(alloc, dst, &mut out);
        self.drain(out);

        let done = self.fresh_label();
        self.push_asm(MachInstr::Mov {
            src: Src::Imm(1),
            dst: rd,
        });
        self.push_asm(MachInstr::JmpCond {
            cond: cond_of(op),
            target: done.clone(),
        });
        self.push_asm(MachInstr::Mov {
            src: Src::Imm(0),
            dst: rd,
        });
        self.items.push(AsmItem::Label(done));
        bind(alloc, dst, rd);
    }

    /// Pick a destination register for `dst` without loading its stale value.
    fn def_reg(
        &mut self,
        alloc: &mut RegAlloc,
        dst: &Addr,
        out: &mut Vec<AnnotatedInstr>,
    ) -> Register {
        alloc.prepare_def(var_name(dst), out)
    }

    /// Move a call-style result out of the return register and bind it.
    fn bind_result(
        &mut self,
        alloc: &mut RegAlloc,
        dst: &Addr,
        comment: String,
    ) {
        let mut out = Vec::new();
        let rd = self.def_reg(alloc, dst, &mut out);
        self.drain(out);
        self.push_commented(MachInstr::mov(Register::RETURN, rd), comment);
        bind(alloc, dst, rd);
    }

    // ── Final output ────────────────────────────────────────────────────

    pub fn finish(mut self) -> Asm {
        if !self.globals.is_empty() {
            self.items.push(AsmItem::Blank);
            let globals = std::mem::take(&mut self.globals);
            for name in globals {
                self.items.push(AsmItem::Comm { name, size: 4 });
            }
        }

        let mut lines = Vec::new();
        for item in &self.items {
            match item {
                AsmItem::Label(name) => lines.push(format!("{name}:")),
                AsmItem::Instr { instr, comment } => {
                    let base = instr.to_string();
                    let line = if let Some(c) = comment {
                        const COMMENT_COL: usize = 32;
                        let pad = if base.len() < COMMENT_COL {
                            COMMENT_COL - base.len()
                        } else {
                            2
                        };
                        format!("{}{}# {}", base, " ".repeat(pad), c)
                    } else {
                        base
                    };
                    lines.push(line);
                }
                AsmItem::Globl(name) => lines.push(format!("  .globl {name}")),
                AsmItem::Section(Section::Data) => lines.push("  .data".to_string()),
                AsmItem::Section(Section::Text) => lines.push("  .text".to_string()),
                AsmItem::Asciz { label, text } => {
                    lines.push(format!("{label}: .asciz \"{}\"", escape(text)));
                }
                AsmItem::Comm { name, size } => lines.push(format!("  .comm {name},{size}")),
                AsmItem::Blank => lines.push(String::new()),
            }
        }
        Asm { lines }
    }
}

// ============================================================================
// Free helpers
// ============================================================================

fn ret_label(func: &str) -> String {
    format!(".Lret_{func}")
}

fn cond_of(op: BinOp) -> Cond {
    match op {
        BinOp::Eq => Cond::Eq,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => Cond::Lt,
        BinOp::Gt => Cond::Gt,
        BinOp::Le => Cond::Le,
        BinOp::Ge => Cond::Ge,
        _ => unreachable!("not a comparison"),
    }
}

fn bind(alloc: &mut RegAlloc, dst: &Addr, reg: Register) {
    if let Some(name) = dst.var_name() {
        alloc.bind_def(name, reg, dst.live_out);
    }
}

// Definition targets are shape-checked in `emit_instr` before any helper
// runs, so a non-variable here is unreachable.
fn var_name(addr: &Addr) -> &str {
    match addr.var_name() {
        Some(n) => n,
        None => unreachable!("destination operand is not a variable"),
    }
}
